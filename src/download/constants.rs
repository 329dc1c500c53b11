//! Constants for the download module (timeouts, pool sizing, backoff bounds).

use std::time::Duration;

/// Default hard wall-clock bound for one track (5 minutes).
pub const DEFAULT_TRACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default rolling window for the admission cap (1 hour).
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(3600);

/// Shortest delay before a denied item is offered to the pool again.
pub const MIN_ADMISSION_BACKOFF: Duration = Duration::from_millis(250);

/// Longest delay before a denied item is offered to the pool again.
pub const MAX_ADMISSION_BACKOFF: Duration = Duration::from_secs(30);

/// Default grace period for in-flight fetches at pool shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default per-subscriber progress buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 64;
