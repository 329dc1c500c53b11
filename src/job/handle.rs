//! Single-writer owner of one job's state.
//!
//! Each transition takes the job lock, validates, mutates, appends a log
//! line and publishes a snapshot before the lock is released. Subscribers
//! therefore see every mutation, and see them in order.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::manifest::write_manifest;
use super::{
    Job, JobId, JobSnapshot, JobSource, JobStatus, Track, TrackRequest, TrackStatus,
    TransitionError,
};
use crate::download::FetchError;
use crate::events::{EventBus, JobSubscription};
use crate::library::sanitize_filename;

/// What a worker needs to run one fetch cycle.
#[derive(Debug, Clone)]
pub struct TrackStart {
    /// Track index within the job.
    pub index: usize,
    /// Attempt number of this cycle, starting at 1.
    pub attempt: u32,
    /// Track metadata.
    pub request: TrackRequest,
    /// Playlist folder to link the result into.
    pub folder: PathBuf,
}

struct State {
    job: Job,
    cancel_requested: bool,
}

/// Handle to a live job.
pub struct JobHandle {
    id: JobId,
    seq: u64,
    playlists_root: PathBuf,
    state: Mutex<State>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

impl JobHandle {
    /// Creates a queued job with no tracks and publishes it.
    #[must_use]
    pub fn new(
        seq: u64,
        source: JobSource,
        display_name: impl Into<String>,
        playlists_root: impl Into<PathBuf>,
        bus: Arc<EventBus>,
    ) -> Self {
        let id = JobId::new();
        let display_name = display_name.into();
        let playlists_root = playlists_root.into();
        let folder = playlist_folder(&playlists_root, &display_name);
        let job = Job {
            id,
            display_name,
            source,
            status: JobStatus::Queued,
            logs: Vec::new(),
            tracks: Vec::new(),
            folder,
            manifest: None,
            created_at: Utc::now(),
        };
        let handle = Self {
            id,
            seq,
            playlists_root,
            state: Mutex::new(State {
                job,
                cancel_requested: false,
            }),
            bus,
        };
        {
            let mut state = handle.state.lock();
            let line = format!("Job created from {}", state.job.source);
            handle.commit(&mut state, line);
        }
        handle
    }

    /// Job identifier.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Submission order, used for stable listing.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        Arc::new(self.state.lock().job.clone())
    }

    /// Current job status.
    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.state.lock().job.status
    }

    /// Subscribes to this job's progress.
    ///
    /// The current snapshot and the receiver are taken under the job lock,
    /// so no update is missed or delivered twice.
    #[must_use]
    pub fn subscribe(&self) -> JobSubscription {
        let state = self.state.lock();
        let current = Arc::new(state.job.clone());
        let receiver = (!current.is_terminal()).then(|| self.bus.subscribe_job(self.id));
        JobSubscription::new(current, receiver)
    }

    /// Appends a diagnostic line to the job log.
    pub fn log(&self, line: impl Into<String>) {
        let mut state = self.state.lock();
        self.commit(&mut state, line.into());
    }

    /// Adds the expanded tracks, optionally renaming the job first.
    ///
    /// Returns the index range of the new tracks.
    ///
    /// # Errors
    ///
    /// Fails unless the job is still queued.
    pub fn add_tracks(
        &self,
        display_name: Option<String>,
        requests: Vec<TrackRequest>,
    ) -> Result<Range<usize>, TransitionError> {
        let mut state = self.state.lock();
        if state.job.status != JobStatus::Queued {
            return Err(self.not_queued(&state));
        }
        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            state.job.folder = playlist_folder(&self.playlists_root, &name);
            state.job.display_name = name;
        }
        let start = state.job.tracks.len();
        let added = requests.len();
        state.job.tracks.extend(
            requests
                .into_iter()
                .enumerate()
                .map(|(offset, request)| Track::from_request(start + offset, request)),
        );
        let line = format!("Queued {added} track(s) for '{}'", state.job.display_name);
        self.commit(&mut state, line);
        Ok(start..start + added)
    }

    /// `queued -> fetching` for one track, and `queued -> running` for the
    /// job on its first start.
    ///
    /// # Errors
    ///
    /// Fails if the job is terminal or the track is not queued.
    pub fn start_track(&self, index: usize) -> Result<TrackStart, TransitionError> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        self.expect_track(&state, index, TrackStatus::Queued)?;

        if state.job.status == JobStatus::Queued {
            state.job.status = JobStatus::Running;
        }
        let folder = state.job.folder.clone();
        let track = &mut state.job.tracks[index];
        track.status = TrackStatus::Fetching;
        track.attempt += 1;
        track.message = None;
        let start = TrackStart {
            index,
            attempt: track.attempt,
            request: track.request(),
            folder,
        };
        let line = if start.attempt > 1 {
            format!("Fetching {} (attempt {})", track.label(), start.attempt)
        } else {
            format!("Fetching {}", track.label())
        };
        self.commit(&mut state, line);
        Ok(start)
    }

    /// `fetching -> done` with the library-relative path.
    ///
    /// # Errors
    ///
    /// Fails if the track is not fetching.
    pub fn complete_track(
        &self,
        index: usize,
        path: PathBuf,
        reused: bool,
    ) -> Result<(), TransitionError> {
        let mut state = self.state.lock();
        self.expect_track(&state, index, TrackStatus::Fetching)?;
        let track = &mut state.job.tracks[index];
        track.status = TrackStatus::Done;
        let line = format!(
            "Done {} -> {}{}",
            track.label(),
            path.display(),
            if reused { " (already in library)" } else { "" }
        );
        track.path = Some(path);
        self.commit(&mut state, line);
        self.settle(&mut state);
        Ok(())
    }

    /// `fetching -> error` with the classified cause.
    ///
    /// # Errors
    ///
    /// Fails if the track is not fetching.
    pub fn fail_track(&self, index: usize, error: &FetchError) -> Result<(), TransitionError> {
        let mut state = self.state.lock();
        self.expect_track(&state, index, TrackStatus::Fetching)?;
        let track = &mut state.job.tracks[index];
        track.status = TrackStatus::Error;
        track.message = Some(error.to_string());
        track.error_kind = Some(error.kind());
        let line = format!("Error {} ({}): {error}", track.label(), error.kind());
        self.commit(&mut state, line);
        self.settle(&mut state);
        Ok(())
    }

    /// Ends a failed fetch cycle so a fresh one can start later.
    ///
    /// Returns `false` when the job was cancelled meanwhile; the track then
    /// ends in `error` instead of being queued again.
    ///
    /// # Errors
    ///
    /// Fails if the track is not fetching.
    pub fn requeue_track(
        &self,
        index: usize,
        error: &FetchError,
        delay: Duration,
    ) -> Result<bool, TransitionError> {
        let mut state = self.state.lock();
        if state.cancel_requested {
            drop(state);
            self.fail_track(index, error)?;
            return Ok(false);
        }
        self.expect_track(&state, index, TrackStatus::Fetching)?;
        let track = &mut state.job.tracks[index];
        track.status = TrackStatus::Queued;
        track.message = Some(format!("retrying: {error}"));
        track.error_kind = Some(error.kind());
        let line = format!(
            "Retrying {} after attempt {} in {:.1}s: {error}",
            track.label(),
            track.attempt,
            delay.as_secs_f64()
        );
        self.commit(&mut state, line);
        Ok(true)
    }

    /// Cooperatively cancels the job.
    ///
    /// Queued tracks become `cancelled`; fetching tracks run to completion.
    /// Returns how many tracks were cancelled.
    ///
    /// # Errors
    ///
    /// Fails if the job is already terminal.
    pub fn cancel(&self) -> Result<usize, TransitionError> {
        let mut state = self.state.lock();
        self.ensure_live(&state)?;
        state.cancel_requested = true;
        let mut cancelled = 0;
        for track in &mut state.job.tracks {
            if track.status == TrackStatus::Queued {
                track.status = TrackStatus::Cancelled;
                cancelled += 1;
            }
        }
        let in_flight = state.job.count(TrackStatus::Fetching);
        let line = format!("Cancel requested: {cancelled} queued track(s) cancelled, {in_flight} in flight");
        self.commit(&mut state, line);
        info!(job_id = %self.id, cancelled, in_flight, "Job cancel requested");

        if state.job.tracks.is_empty() {
            self.finish(&mut state, JobStatus::Cancelled);
        } else {
            self.settle(&mut state);
        }
        Ok(cancelled)
    }

    /// Ends every fetching track in `error` after its worker was aborted at
    /// shutdown. Returns how many tracks were affected.
    pub fn abort_in_flight(&self, grace: Duration) -> usize {
        let mut state = self.state.lock();
        if state.job.status.is_terminal() {
            return 0;
        }
        let mut aborted = 0;
        for track in &mut state.job.tracks {
            if track.status == TrackStatus::Fetching {
                let error = FetchError::timeout(track.label(), grace);
                track.status = TrackStatus::Error;
                track.message = Some(error.to_string());
                track.error_kind = Some(error.kind());
                aborted += 1;
            }
        }
        if aborted > 0 {
            let line = format!("Aborted {aborted} in-flight track(s) at shutdown");
            self.commit(&mut state, line);
            self.settle(&mut state);
        }
        aborted
    }

    /// Fetch cycles already spent by a track that is still queued.
    ///
    /// `None` once the track has started, finished or been cancelled.
    #[must_use]
    pub fn queued_attempts(&self, index: usize) -> Option<u32> {
        let state = self.state.lock();
        let track = state.job.tracks.get(index)?;
        (track.status == TrackStatus::Queued).then_some(track.attempt)
    }

    /// `queued -> failed` on a precondition failure before any track started.
    ///
    /// Every track is marked `error` with the cause.
    ///
    /// # Errors
    ///
    /// Fails unless the job is still queued.
    pub fn fail(&self, error: &FetchError) -> Result<(), TransitionError> {
        let mut state = self.state.lock();
        if state.job.status != JobStatus::Queued {
            return Err(self.not_queued(&state));
        }
        let message = error.to_string();
        for track in &mut state.job.tracks {
            track.status = TrackStatus::Error;
            track.message = Some(message.clone());
            track.error_kind = Some(error.kind());
        }
        state.job.logs.push(stamp(&format!("Job failed: {message}")));
        warn!(job_id = %self.id, error = %message, "Job failed before any track started");
        self.finish(&mut state, JobStatus::Failed);
        Ok(())
    }

    fn commit(&self, state: &mut State, line: String) {
        debug!(job_id = %self.id, "{line}");
        state.job.logs.push(stamp(&line));
        self.bus.publish(self.id, Arc::new(state.job.clone()));
    }

    // Closes the job once every track is terminal.
    fn settle(&self, state: &mut State) {
        let job = &state.job;
        if job.status.is_terminal()
            || job.tracks.is_empty()
            || !job.tracks.iter().all(|t| t.status.is_terminal())
        {
            return;
        }
        // A cancel that caught no queued track leaves the outcome to the tracks.
        let status = if job.tracks.iter().any(|t| t.status == TrackStatus::Cancelled) {
            JobStatus::Cancelled
        } else if job.tracks.iter().all(|t| t.status == TrackStatus::Done) {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        // Written under the job lock so the terminal snapshot always carries
        // the manifest path. The file is a few hundred bytes; the blocking
        // write is the price of keeping transitions synchronous.
        self.write_manifest(state);
        self.finish(state, status);
    }

    fn write_manifest(&self, state: &mut State) {
        let folder = state.job.folder.clone();
        match write_manifest(&folder, &state.job) {
            Ok(path) => {
                let line = format!("Wrote manifest {}", path.display());
                state.job.logs.push(stamp(&line));
                state.job.manifest = Some(path);
            }
            Err(e) => {
                warn!(job_id = %self.id, folder = %folder.display(), error = %e, "Failed to write manifest");
                state
                    .job
                    .logs
                    .push(stamp(&format!("Manifest write failed in {}: {e}", folder.display())));
            }
        }
    }

    fn finish(&self, state: &mut State, status: JobStatus) {
        state.job.status = status;
        let job = &state.job;
        let line = format!(
            "Job {status}: {} done, {} error, {} cancelled",
            job.count(TrackStatus::Done),
            job.count(TrackStatus::Error),
            job.count(TrackStatus::Cancelled)
        );
        info!(job_id = %self.id, %status, name = %job.display_name, "Job finished");
        self.commit(state, line);
        self.bus.close(self.id);
    }

    fn ensure_live(&self, state: &State) -> Result<(), TransitionError> {
        if state.job.status.is_terminal() {
            return Err(TransitionError::JobTerminal {
                job: self.id,
                status: state.job.status,
            });
        }
        Ok(())
    }

    fn not_queued(&self, state: &State) -> TransitionError {
        if state.job.status.is_terminal() {
            TransitionError::JobTerminal {
                job: self.id,
                status: state.job.status,
            }
        } else {
            TransitionError::NotQueued {
                job: self.id,
                status: state.job.status,
            }
        }
    }

    fn expect_track(
        &self,
        state: &State,
        index: usize,
        expected: TrackStatus,
    ) -> Result<(), TransitionError> {
        let track = state.job.tracks.get(index).ok_or(TransitionError::UnknownTrack {
            job: self.id,
            index,
        })?;
        if track.status != expected {
            return Err(TransitionError::TrackState {
                job: self.id,
                index,
                actual: track.status,
                expected,
            });
        }
        Ok(())
    }
}

/// Folder a job named `display_name` links into.
#[must_use]
pub fn playlist_folder(playlists_root: &Path, display_name: &str) -> PathBuf {
    playlists_root.join(sanitize_filename(display_name))
}

fn stamp(line: &str) -> String {
    format!("[{}] {line}", Utc::now().format("%H:%M:%S"))
}
