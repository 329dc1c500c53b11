//! Track download orchestration.
//!
//! This module turns queued tracks into files in the shared library and
//! links them into playlist folders.
//!
//! # Features
//!
//! - Fixed worker pool with round-robin fairness across jobs
//! - Rolling-window admission cap shared by every worker
//! - Hard per-track timeout; external tools are killed when it fires
//! - Exponential backoff with jitter for transient failures
//! - Structured error kinds recorded on each failed track
//!
//! See [`DownloadEngine`] for a usage example.

mod constants;
mod engine;
mod error;
mod executor;
pub mod rate_limiter;
mod retry;

pub use constants::{
    DEFAULT_EVENT_BUFFER, DEFAULT_RATE_WINDOW, DEFAULT_SHUTDOWN_GRACE, DEFAULT_TRACK_TIMEOUT,
    MAX_ADMISSION_BACKOFF, MIN_ADMISSION_BACKOFF,
};
pub use engine::{
    DEFAULT_CONCURRENCY, DownloadEngine, EngineError, EngineSettings, EngineStats,
    MAX_CONCURRENCY, MIN_CONCURRENCY, SubmitRequest, WorkItem, WorkQueue,
};
pub use error::{ErrorKind, FetchError};
pub use executor::{ExecutorOptions, FetchOutcome, TrackFetchExecutor};
pub use rate_limiter::RateLimiter;
pub use retry::{DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error};
