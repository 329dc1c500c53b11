//! Shared test doubles for engine integration tests.
//!
//! `ScriptedResolver` stands in for yt-dlp: it writes a small file per
//! successful fetch and can be told to fail, hang or slow down per title.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use playlist_core::download::{DownloadEngine, EngineSettings, RetryPolicy};
use playlist_core::job::{JobSnapshot, TrackRequest};
use playlist_core::resolver::{FetchRequest, FetchedFile, TrackResolver};
use playlist_core::source::{
    Expansion, SourceError, SourcePriority, SourceRegistry, SourceResolver,
};
use playlist_core::{FetchError, JobSource};
use tempfile::TempDir;

/// What one resolver call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Succeed,
    NotFound,
    Network,
    Hang,
}

/// Scripted in-process resolver that counts its calls.
pub struct ScriptedResolver {
    staging: PathBuf,
    delay: Duration,
    calls: AtomicUsize,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default_step: Step,
    preflight_error: Option<String>,
}

impl ScriptedResolver {
    pub fn new(staging: &Path) -> Self {
        std::fs::create_dir_all(staging).unwrap();
        Self {
            staging: staging.to_path_buf(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            scripts: Mutex::new(HashMap::new()),
            default_step: Step::Succeed,
            preflight_error: None,
        }
    }

    /// Every fetch waits this long before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Steps for calls about `title`, consumed in order; afterwards the
    /// default step applies.
    pub fn script(self, title: &str, steps: &[Step]) -> Self {
        self.scripts
            .lock()
            .insert(title.to_string(), steps.iter().copied().collect());
        self
    }

    /// Step for titles without a script.
    pub fn by_default(mut self, step: Step) -> Self {
        self.default_step = step;
        self
    }

    pub fn failing_preflight(mut self, message: &str) -> Self {
        self.preflight_error = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, title: &str) -> Step {
        self.scripts
            .lock()
            .get_mut(title)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default_step)
    }
}

#[async_trait]
impl TrackResolver for ScriptedResolver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn preflight(&self) -> Result<(), FetchError> {
        match &self.preflight_error {
            Some(message) => Err(FetchError::precondition(message.clone())),
            None => Ok(()),
        }
    }

    async fn resolve_and_fetch(&self, request: &FetchRequest) -> Result<FetchedFile, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_step(&request.title) {
            Step::Succeed => {
                let path = self.staging.join(format!("fetch-{call}.{}", request.format));
                tokio::fs::write(&path, request.label()).await.unwrap();
                Ok(FetchedFile::unmanaged(path))
            }
            Step::NotFound => Err(FetchError::not_found(request.label(), "no results")),
            Step::Network => Err(FetchError::network("connection reset by peer")),
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Source that serves fixed track lists for `test://<name>` URLs.
#[derive(Default)]
pub struct FixedSource {
    playlists: HashMap<String, Vec<TrackRequest>>,
}

impl FixedSource {
    pub fn with(mut self, name: &str, tracks: Vec<TrackRequest>) -> Self {
        self.playlists.insert(name.to_string(), tracks);
        self
    }
}

#[async_trait]
impl SourceResolver for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Specialized
    }

    fn can_handle(&self, source: &JobSource) -> bool {
        matches!(source, JobSource::Url(url) if url.starts_with("test://"))
    }

    async fn expand(
        &self,
        source: &JobSource,
        _limit: Option<usize>,
    ) -> Result<Expansion, SourceError> {
        let JobSource::Url(url) = source else {
            return Err(SourceError::Unsupported(source.to_string()));
        };
        let name = url.trim_start_matches("test://");
        let tracks = self
            .playlists
            .get(name)
            .cloned()
            .ok_or_else(|| SourceError::Unsupported(url.clone()))?;
        Ok(Expansion {
            display_name: Some(name.to_string()),
            tracks,
            skipped: Vec::new(),
        })
    }
}

pub fn playlist(name: &str) -> JobSource {
    JobSource::Url(format!("test://{name}"))
}

pub fn tracks(pairs: &[(&str, &str)]) -> Vec<TrackRequest> {
    pairs
        .iter()
        .map(|(artist, title)| TrackRequest::new(*artist, *title))
        .collect()
}

/// Settings rooted in `temp` with quick retries and no rate limit.
pub fn settings(temp: &TempDir) -> EngineSettings {
    EngineSettings {
        concurrency: 4,
        track_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy::new(
            2,
            Duration::from_millis(10),
            Duration::from_millis(50),
            2.0,
        ),
        event_buffer: 1024,
        ..EngineSettings::new(temp.path())
    }
}

pub async fn start(
    settings: EngineSettings,
    resolver: Arc<ScriptedResolver>,
    source: FixedSource,
) -> DownloadEngine {
    let mut sources = SourceRegistry::new();
    sources.register(Box::new(source));
    DownloadEngine::start(settings, resolver, sources).await.unwrap()
}

/// Waits for the job's terminal snapshot, failing the test after `limit`.
pub async fn finish(engine: &DownloadEngine, job: &JobSnapshot, limit: Duration) -> JobSnapshot {
    tokio::time::timeout(limit, engine.wait(job.id))
        .await
        .expect("job did not finish in time")
        .expect("job vanished")
}

/// Lines of the job's manifest.
pub fn manifest_lines(job: &JobSnapshot) -> Vec<String> {
    let path = job.manifest.as_ref().expect("manifest was not written");
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}
