//! Playlist Downloader Core Library
//!
//! This library turns playlists (Spotify or YouTube URLs, Exportify CSV
//! files) into a shared, deduplicated music library plus one folder and
//! `playlist.m3u` per playlist.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Worker pool, rate limiter, retry policy, fetch executor
//! - [`library`] - Deduplicated library index with per-key claims and link fan-out
//! - [`job`] - Job/track model, state machine, registry and M3U manifest
//! - [`events`] - Per-job progress subscriptions
//! - [`source`] - Expanding a URL or CSV into ordered tracks
//! - [`resolver`] - Searching and fetching one track with yt-dlp
//! - [`config`] - TOML configuration
//!
//! Jobs live in memory only; nothing persists across restarts except the
//! files in the library and playlist folders.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod events;
pub mod job;
pub mod library;
pub mod resolver;
pub mod source;

// Re-export commonly used types
pub use config::{Config, ConfigError, LoadedConfig};
pub use download::{
    DEFAULT_CONCURRENCY, DownloadEngine, EngineError, EngineSettings, EngineStats, ErrorKind,
    FetchError, RateLimiter, RetryPolicy, SubmitRequest,
};
pub use events::{EventBus, JobSubscription};
pub use job::{Job, JobId, JobSnapshot, JobSource, JobStatus, Track, TrackRequest, TrackStatus};
pub use library::{LibraryIndex, LibraryKey};
pub use resolver::{FetchRequest, FetchedFile, SearchProvider, TrackResolver, YtDlpResolver};
pub use source::{SourceRegistry, SourceResolver, build_default_source_registry};
