//! Download engine: job submission plus a fixed pool of workers.
//!
//! # Overview
//!
//! A submission creates a [`JobHandle`] in the registry. A preparation task
//! runs the resolver preflight and expands the source into tracks, then
//! pushes one [`WorkItem`] per track onto the shared round-robin
//! [`WorkQueue`]. Workers drain that queue across all jobs.
//!
//! # Concurrency Model
//!
//! - `concurrency` worker tasks are spawned at start and live until shutdown
//! - Each worker asks the [`RateLimiter`] for admission before starting a
//!   track; a denied item goes back on the queue after a bounded delay
//! - Admitted items run through the [`TrackFetchExecutor`] under the
//!   per-track timeout, and the outcome is posted to the job state machine
//! - Library claims are the only cross-job exclusion, and they are per key
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use playlist_core::download::{DownloadEngine, EngineSettings, SubmitRequest};
//! use playlist_core::job::JobSource;
//! use playlist_core::resolver::{SearchProvider, YtDlpResolver};
//! use playlist_core::source::{SourceOptions, build_default_source_registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = EngineSettings::new("downloads");
//! let resolver = Arc::new(YtDlpResolver::new(
//!     "yt-dlp",
//!     vec![SearchProvider::YoutubeMusic],
//!     true,
//!     settings.staging_root(),
//! ));
//! let sources = build_default_source_registry(&SourceOptions {
//!     spotdl_path: "spotdl".into(),
//!     ytdlp_path: "yt-dlp".into(),
//!     spotify_client_id: None,
//!     spotify_client_secret: None,
//!     staging_root: settings.staging_root(),
//! });
//! let engine = DownloadEngine::start(settings, resolver, sources).await?;
//! let job = engine
//!     .submit(SubmitRequest::new(JobSource::Csv("mix.csv".into())))
//!     .await?;
//! let finished = engine.wait(job.id).await;
//! println!("{:?}", finished.map(|j| j.status));
//! engine.shutdown(std::time::Duration::from_secs(10)).await;
//! # Ok(())
//! # }
//! ```

mod work_queue;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::FetchError;
use super::constants::{
    DEFAULT_EVENT_BUFFER, DEFAULT_RATE_WINDOW, DEFAULT_TRACK_TIMEOUT, MAX_ADMISSION_BACKOFF,
};
use super::executor::{ExecutorOptions, FetchOutcome, TrackFetchExecutor};
use super::rate_limiter::RateLimiter;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::events::{EventBus, JobSubscription};
use crate::job::{JobHandle, JobId, JobRegistry, JobSnapshot, JobSource, TransitionError};
use crate::library::{DEFAULT_TEMPLATE, LibraryIndex};
use crate::resolver::{DEFAULT_AUDIO_FORMAT, DEFAULT_AUDIO_QUALITY, TrackResolver};
use crate::source::SourceRegistry;

pub use work_queue::{WorkItem, WorkQueue};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default worker count.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// No job with this id exists.
    #[error("unknown job {0}")]
    UnknownJob(JobId),

    /// The requested transition is not allowed.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The library directory could not be prepared.
    #[error("cannot open library {path}: {source}")]
    Library {
        /// Library root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The engine no longer accepts work.
    #[error("engine is shut down")]
    ShutDown,
}

/// Everything the engine needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Worker count.
    pub concurrency: usize,
    /// Hard wall-clock bound per track attempt.
    pub track_timeout: Duration,
    /// Retry policy for retryable failures.
    pub retry_policy: RetryPolicy,
    /// Admissions per window, 0 for unbounded.
    pub rate_limit: usize,
    /// Rolling window length.
    pub rate_window: Duration,
    /// Shared library directory.
    pub library_root: PathBuf,
    /// Parent of the per-job playlist folders.
    pub playlists_root: PathBuf,
    /// Library file name template.
    pub template: String,
    /// Audio format hint.
    pub format: String,
    /// Audio quality hint.
    pub quality: String,
    /// Per-subscriber snapshot buffer.
    pub event_buffer: usize,
}

impl EngineSettings {
    /// Defaults rooted at `output_dir` (`library/` and `playlists/` inside).
    #[must_use]
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let output_dir = output_dir.as_ref();
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            track_timeout: DEFAULT_TRACK_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            rate_limit: 0,
            rate_window: DEFAULT_RATE_WINDOW,
            library_root: output_dir.join("library"),
            playlists_root: output_dir.join("playlists"),
            template: DEFAULT_TEMPLATE.to_string(),
            format: DEFAULT_AUDIO_FORMAT.to_string(),
            quality: DEFAULT_AUDIO_QUALITY.to_string(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Scratch directory for resolver output, next to the library.
    #[must_use]
    pub fn staging_root(&self) -> PathBuf {
        self.library_root
            .parent()
            .map_or_else(|| PathBuf::from(".staging"), |p| p.join(".staging"))
    }
}

/// What to download.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// URL or CSV file.
    pub source: JobSource,
    /// Overrides the name reported by the source.
    pub display_name: Option<String>,
    /// Caps the number of tracks taken from the source.
    pub limit: Option<usize>,
}

impl SubmitRequest {
    /// Submits `source` with default options.
    #[must_use]
    pub fn new(source: JobSource) -> Self {
        Self {
            source,
            display_name: None,
            limit: None,
        }
    }

    /// Sets a fixed display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Caps the number of tracks.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// Counters across all jobs since start.
#[derive(Debug, Default)]
pub struct EngineStats {
    fetched: AtomicUsize,
    reused: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    admission_denied: AtomicUsize,
}

impl EngineStats {
    /// Tracks placed by an external fetch.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.fetched.load(Ordering::SeqCst)
    }

    /// Tracks satisfied from the library without fetching.
    #[must_use]
    pub fn reused(&self) -> usize {
        self.reused.load(Ordering::SeqCst)
    }

    /// Tracks that ended in error.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Fetch cycles that were queued again.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Starts deferred by the rate limiter.
    #[must_use]
    pub fn admission_denied(&self) -> usize {
        self.admission_denied.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

struct Shared {
    settings: EngineSettings,
    registry: JobRegistry,
    queue: Arc<WorkQueue>,
    limiter: RateLimiter,
    executor: TrackFetchExecutor,
    resolver: Arc<dyn TrackResolver>,
    sources: SourceRegistry,
    stats: EngineStats,
    accepting: AtomicBool,
    shutdown: CancellationToken,
}

/// Job orchestration engine.
pub struct DownloadEngine {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("concurrency", &self.shared.settings.concurrency)
            .field("jobs", &self.shared.registry.len())
            .field("queued", &self.shared.queue.len())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Opens the library, seeds its index and starts the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the worker count is
    /// outside 1..=100, or [`EngineError::Library`] if the library directory
    /// cannot be prepared.
    #[instrument(skip_all, fields(concurrency = settings.concurrency, library = %settings.library_root.display()))]
    pub async fn start(
        settings: EngineSettings,
        resolver: Arc<dyn TrackResolver>,
        sources: SourceRegistry,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&settings.concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: settings.concurrency,
            });
        }
        let library =
            LibraryIndex::open_with_template(settings.library_root.clone(), &settings.template)
                .await
                .map_err(|source| EngineError::Library {
                    path: settings.library_root.clone(),
                    source,
                })?;

        debug!(
            concurrency = settings.concurrency,
            max_attempts = settings.retry_policy.max_attempts(),
            rate_limit = settings.rate_limit,
            rate_window_secs = settings.rate_window.as_secs(),
            timeout_secs = settings.track_timeout.as_secs(),
            resolver = resolver.name(),
            sources = ?sources.names(),
            "creating download engine"
        );

        let bus = Arc::new(EventBus::new(settings.event_buffer));
        let executor = TrackFetchExecutor::new(
            library,
            Arc::clone(&resolver),
            ExecutorOptions {
                template: settings.template.clone(),
                format: settings.format.clone(),
                quality: settings.quality.clone(),
            },
        );
        let shared = Arc::new(Shared {
            registry: JobRegistry::new(settings.playlists_root.clone(), bus),
            queue: Arc::new(WorkQueue::new()),
            limiter: RateLimiter::new(settings.rate_limit, settings.rate_window),
            executor,
            resolver,
            sources,
            stats: EngineStats::default(),
            accepting: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
            settings,
        });

        let workers = (0..shared.settings.concurrency)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { worker_loop(shared, worker).await })
            })
            .collect();
        info!(concurrency = shared.settings.concurrency, "Download engine started");

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Returns the configured worker count.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.shared.settings.concurrency
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.shared.settings
    }

    /// Shared library index.
    #[must_use]
    pub fn library(&self) -> &LibraryIndex {
        self.shared.executor.library()
    }

    /// Counters since start.
    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.shared.stats
    }

    /// Creates a job for `request` and schedules its tracks.
    ///
    /// The returned snapshot is taken right after creation. Source expansion
    /// and the resolver preflight run in the background; if either fails
    /// the job ends `failed` without any track starting.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutDown`] once shutdown has begun.
    #[instrument(skip(self), fields(source = %request.source))]
    pub async fn submit(&self, request: SubmitRequest) -> Result<JobSnapshot, EngineError> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let name = request
            .display_name
            .clone()
            .unwrap_or_else(|| default_display_name(&request.source));
        let handle = self.shared.registry.create(request.source.clone(), name);
        info!(job_id = %handle.id(), "Job submitted");

        let shared = Arc::clone(&self.shared);
        let job = Arc::clone(&handle);
        tokio::spawn(async move { shared.prepare(job, request).await });

        Ok(handle.snapshot())
    }

    /// Snapshots of every job in submission order.
    #[must_use]
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.shared.registry.list()
    }

    /// Current snapshot of one job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.shared.registry.get(id)
    }

    /// Cooperatively cancels a job.
    ///
    /// # Errors
    ///
    /// Fails for unknown or already terminal jobs.
    pub fn cancel(&self, id: JobId) -> Result<JobSnapshot, EngineError> {
        let handle = self.shared.registry.handle(id).ok_or(EngineError::UnknownJob(id))?;
        handle.cancel()?;
        let purged = self.shared.queue.purge(id);
        debug!(job_id = %id, purged, "Purged queued work for cancelled job");
        Ok(handle.snapshot())
    }

    /// Progress subscription for one job.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownJob`] for unknown ids.
    pub fn subscribe(&self, id: JobId) -> Result<JobSubscription, EngineError> {
        self.shared
            .registry
            .subscribe(id)
            .ok_or(EngineError::UnknownJob(id))
    }

    /// Receiver for snapshots of every job.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobSnapshot> {
        self.shared.registry.bus().subscribe_all()
    }

    /// Waits until the job is terminal and returns its final snapshot.
    pub async fn wait(&self, id: JobId) -> Option<JobSnapshot> {
        let mut subscription = self.shared.registry.subscribe(id)?;
        let mut last = None;
        while let Some(snapshot) = subscription.next().await {
            last = Some(snapshot);
        }
        last
    }

    /// Stops the pool.
    ///
    /// New submissions are refused and every live job is cancelled, so
    /// queued tracks end `cancelled`. In-flight fetches get `grace` to finish;
    /// after that the workers are aborted and their tracks end in `error`.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        for handle in self.shared.registry.handles() {
            if !handle.status().is_terminal() {
                let _ = handle.cancel();
            }
        }
        self.shared.shutdown.cancel();

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, join_all(workers)).await.is_err() {
            warn!(grace_secs = grace.as_secs_f64(), "Grace period expired, aborting workers");
            for abort in aborts {
                abort.abort();
            }
            for handle in self.shared.registry.handles() {
                let aborted = handle.abort_in_flight(grace);
                if aborted > 0 {
                    warn!(job_id = %handle.id(), aborted, "Aborted in-flight tracks");
                }
            }
        }
        info!(
            fetched = self.shared.stats.fetched(),
            reused = self.shared.stats.reused(),
            failed = self.shared.stats.failed(),
            retried = self.shared.stats.retried(),
            "Download engine stopped"
        );
    }
}

impl Shared {
    // Preflight, expand, then enqueue. Any failure here fails the whole job.
    async fn prepare(&self, job: Arc<JobHandle>, request: SubmitRequest) {
        if let Err(error) = self.resolver.preflight().await {
            warn!(job_id = %job.id(), %error, "Preflight failed");
            let _ = job.fail(&error);
            return;
        }
        let expansion = match self.sources.expand(&request.source, request.limit).await {
            Ok(expansion) => expansion,
            Err(error) => {
                let _ = job.fail(&error.into_fetch_error());
                return;
            }
        };
        for note in &expansion.skipped {
            job.log(format!("Skipped {note}"));
        }
        if expansion.tracks.is_empty() {
            let error = FetchError::precondition(format!(
                "no tracks resolved from {}",
                request.source
            ));
            let _ = job.fail(&error);
            return;
        }

        let name = request.display_name.or(expansion.display_name);
        match job.add_tracks(name, expansion.tracks) {
            Ok(range) => {
                for track in range {
                    self.queue.push(WorkItem {
                        job: job.id(),
                        track,
                    });
                }
            }
            Err(error) => debug!(job_id = %job.id(), %error, "Job ended before tracks were added"),
        }
    }

    async fn process(&self, item: WorkItem) {
        let Some(job) = self.registry.handle(item.job) else {
            return;
        };
        let Some(spent) = job.queued_attempts(item.track) else {
            debug!(job_id = %item.job, track = item.track, "Skipping track that is no longer queued");
            return;
        };

        if !self.limiter.try_admit() {
            Self::count(&self.stats.admission_denied);
            let denied = FetchError::AdmissionDenied {
                retry_after: self.limiter.retry_after(),
            };
            let delay = match self
                .settings
                .retry_policy
                .should_retry(classify_error(&denied), spent)
            {
                RetryDecision::Retry { delay, .. } => delay,
                RetryDecision::DoNotRetry { .. } => MAX_ADMISSION_BACKOFF,
            };
            debug!(job_id = %item.job, track = item.track, delay_ms = delay.as_millis(), %denied, "Admission denied, requeueing");
            self.queue.push_delayed(item, delay, self.shutdown.clone());
            return;
        }

        let start = match job.start_track(item.track) {
            Ok(start) => start,
            Err(error) => {
                debug!(%error, "Track could not start");
                return;
            }
        };

        let outcome = self
            .executor
            .fetch(&start.request, &start.folder, self.settings.track_timeout)
            .await;
        let posted = match outcome {
            FetchOutcome::Done { path, reused } => {
                Self::count(if reused { &self.stats.reused } else { &self.stats.fetched });
                job.complete_track(start.index, path, reused)
            }
            FetchOutcome::Error(error) => {
                match self
                    .settings
                    .retry_policy
                    .should_retry(classify_error(&error), start.attempt)
                {
                    RetryDecision::Retry { delay, attempt } => {
                        match job.requeue_track(start.index, &error, delay) {
                            Ok(true) => {
                                Self::count(&self.stats.retried);
                                info!(job_id = %item.job, track = item.track, attempt, delay_ms = delay.as_millis(), %error, "Retrying track");
                                self.queue.push_delayed(item, delay, self.shutdown.clone());
                                Ok(())
                            }
                            Ok(false) => {
                                Self::count(&self.stats.failed);
                                Ok(())
                            }
                            Err(e) => Err(e),
                        }
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(job_id = %item.job, track = item.track, %reason, "Not retrying track");
                        Self::count(&self.stats.failed);
                        job.fail_track(start.index, &error)
                    }
                }
            }
        };
        if let Err(error) = posted {
            warn!(%error, "Could not record track outcome");
        }
    }

    fn count(counter: &AtomicUsize) {
        EngineStats::bump(counter);
    }
}

async fn worker_loop(shared: Arc<Shared>, worker: usize) {
    debug!(worker, "Worker started");
    while let Some(item) = shared.queue.next(&shared.shutdown).await {
        shared.process(item).await;
    }
    debug!(worker, "Worker stopped");
}

fn default_display_name(source: &JobSource) -> String {
    match source {
        JobSource::Url(url) => url.clone(),
        JobSource::Csv(path) => path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("playlist")
            .to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::resolver::{FetchRequest, FetchedFile};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct Unused;

    #[async_trait]
    impl TrackResolver for Unused {
        fn name(&self) -> &str {
            "unused"
        }

        async fn resolve_and_fetch(&self, _request: &FetchRequest) -> Result<FetchedFile, FetchError> {
            Err(FetchError::not_found("x", "unused"))
        }
    }

    fn settings(temp: &TempDir, concurrency: usize) -> EngineSettings {
        EngineSettings {
            concurrency,
            ..EngineSettings::new(temp.path())
        }
    }

    #[tokio::test]
    async fn test_engine_start_valid_concurrency() {
        let temp = TempDir::new().unwrap();
        for value in [MIN_CONCURRENCY, DEFAULT_CONCURRENCY, MAX_CONCURRENCY] {
            let engine = DownloadEngine::start(settings(&temp, value), Arc::new(Unused), SourceRegistry::new())
                .await
                .unwrap();
            assert_eq!(engine.concurrency(), value);
            engine.shutdown(Duration::from_secs(1)).await;
        }
    }

    #[tokio::test]
    async fn test_engine_start_invalid_concurrency() {
        let temp = TempDir::new().unwrap();
        for value in [0, 101] {
            let result =
                DownloadEngine::start(settings(&temp, value), Arc::new(Unused), SourceRegistry::new()).await;
            assert!(matches!(result, Err(EngineError::InvalidConcurrency { value: v }) if v == value));
        }
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_refused() {
        let temp = TempDir::new().unwrap();
        let engine = DownloadEngine::start(settings(&temp, 1), Arc::new(Unused), SourceRegistry::new())
            .await
            .unwrap();
        engine.shutdown(Duration::from_secs(1)).await;
        let result = engine
            .submit(SubmitRequest::new(JobSource::Url("https://x".into())))
            .await;
        assert!(matches!(result, Err(EngineError::ShutDown)));
    }

    #[tokio::test]
    async fn test_unsupported_source_fails_job() {
        let temp = TempDir::new().unwrap();
        let engine = DownloadEngine::start(settings(&temp, 1), Arc::new(Unused), SourceRegistry::new())
            .await
            .unwrap();
        let job = engine
            .submit(SubmitRequest::new(JobSource::Url("https://x".into())))
            .await
            .unwrap();
        let done = engine.wait(job.id).await.unwrap();
        assert_eq!(done.status, crate::job::JobStatus::Failed);
        assert!(done.logs.iter().any(|l| l.contains("unsupported source")));
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidConcurrency { value: 0 }.to_string();
        assert!(msg.contains("invalid concurrency"));
        assert!(msg.contains("100"));
    }

    #[test]
    fn test_default_display_name() {
        assert_eq!(default_display_name(&JobSource::Csv("a/Road Trip.csv".into())), "Road Trip");
        assert_eq!(default_display_name(&JobSource::Url("https://x/y".into())), "https://x/y");
    }

    #[test]
    fn test_staging_root_is_outside_library() {
        let settings = EngineSettings::new("/data/out");
        assert_eq!(settings.staging_root(), PathBuf::from("/data/out/.staging"));
        assert!(!settings.staging_root().starts_with(&settings.library_root));
    }
}
