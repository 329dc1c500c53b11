//! Rolling-window admission control for track fetches.
//!
//! This module provides the [`RateLimiter`] struct which bounds how many
//! track fetches may *start* within a trailing time window (for example
//! "at most 200 fetches per hour"), so the external search/download
//! providers never see more than the configured request rate.
//!
//! # Overview
//!
//! Admission is a non-blocking check-and-record: [`RateLimiter::try_admit`]
//! either records the current instant and returns `true`, or returns `false`
//! without recording anything. Workers that are denied re-queue their item
//! and retry after [`RateLimiter::retry_after`] instead of spinning.
//!
//! Stale admissions are pruned lazily on every call; there is no background
//! timer, so the limiter holds no state beyond the admission timestamps.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use playlist_core::download::RateLimiter;
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(1));
//! assert!(limiter.try_admit());
//! assert!(limiter.try_admit());
//! assert!(!limiter.try_admit());
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Rolling-window rate limiter shared by all workers.
///
/// # Thread Safety
///
/// `RateLimiter` is `Send + Sync`; wrap it in `Arc` and share it across
/// worker tasks. The prune, count and record steps run inside one
/// critical section, so concurrent callers can never over-admit.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum admissions inside the window. Zero disables limiting.
    cap: usize,

    /// Length of the trailing window.
    window: Duration,

    /// Admission instants inside the window, oldest first.
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter admitting at most `cap` fetch starts per `window`.
    ///
    /// A `cap` of zero produces a disabled limiter (see [`RateLimiter::disabled`]).
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use playlist_core::download::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(100, Duration::from_secs(3600));
    /// assert_eq!(limiter.cap(), 100);
    /// ```
    #[must_use]
    #[instrument(skip_all, fields(cap = cap, window_secs = window.as_secs()))]
    pub fn new(cap: usize, window: Duration) -> Self {
        debug!(cap, "creating rate limiter");
        Self {
            cap,
            window,
            admissions: Mutex::new(VecDeque::with_capacity(cap.min(1024))),
        }
    }

    /// Creates a disabled rate limiter that admits everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Returns whether rate limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.cap == 0
    }

    /// Returns the configured admission cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Returns the configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Attempts to admit one fetch start.
    ///
    /// Returns `true` and records the admission if fewer than `cap`
    /// admissions fall within the trailing window; otherwise returns `false`
    /// without recording.
    pub fn try_admit(&self) -> bool {
        if self.is_disabled() {
            return true;
        }

        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        if admissions.len() < self.cap {
            admissions.push_back(now);
            trace!(in_window = admissions.len(), cap = self.cap, "admitted");
            true
        } else {
            debug!(in_window = admissions.len(), cap = self.cap, "admission denied");
            false
        }
    }

    /// Returns how long until the oldest admission leaves the window.
    ///
    /// `Duration::ZERO` means a slot is free right now.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        if admissions.len() < self.cap {
            return Duration::ZERO;
        }
        admissions
            .front()
            .map_or(Duration::ZERO, |oldest| {
                (*oldest + self.window).saturating_duration_since(now)
            })
    }

    /// Returns the number of admissions currently inside the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, Instant::now());
        admissions.len()
    }

    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admissions.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }
    }
}
