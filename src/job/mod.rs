//! Jobs, tracks and their lifecycle.
//!
//! A [`Job`] is one submitted download request; its [`Track`]s are scheduled
//! independently. The only way to mutate a job is through a [`JobHandle`],
//! which validates each transition, appends it to the job log and publishes
//! a snapshot before returning.

mod handle;
mod manifest;
mod registry;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::download::ErrorKind;

pub use handle::{JobHandle, TrackStart};
pub use manifest::{MANIFEST_FILE_NAME, render_manifest, write_manifest};
pub use registry::JobRegistry;

/// Immutable point-in-time copy of a job, as delivered to subscribers.
pub type JobSnapshot = Arc<Job>;

/// Opaque unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a job's tracks come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum JobSource {
    /// Playlist, album or track URL.
    Url(String),
    /// Exportify-style CSV file.
    Csv(PathBuf),
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Csv(path) => write!(f, "csv:{}", path.display()),
        }
    }
}

/// Overall job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no track has started yet.
    Queued,
    /// At least one track has been dequeued.
    Running,
    /// Every track is done.
    Completed,
    /// Every track is terminal and at least one ended in error.
    CompletedWithErrors,
    /// A precondition failed before any track started.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl JobStatus {
    /// Returns true for states with no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }

    /// Returns the snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-track state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Waiting for a worker.
    Queued,
    /// A worker is running the fetch executor for it.
    Fetching,
    /// Placed in the library and linked into the playlist folder.
    Done,
    /// Failed; see the track message.
    Error,
    /// Never started because the job was cancelled or failed.
    Cancelled,
}

impl TrackStatus {
    /// Returns true for states with no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Returns the snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one track as produced by source expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    /// Comma separated artist list.
    pub artist: String,
    /// Track title.
    pub title: String,
    /// Album name when known.
    pub album: Option<String>,
    /// Provider identifier (for example a Spotify URI).
    pub provider_id: Option<String>,
}

impl TrackRequest {
    /// Creates a request from artist and title.
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            ..Self::default()
        }
    }

    /// Sets the album.
    #[must_use]
    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = Some(album.into());
        self
    }

    /// Sets the provider identifier.
    #[must_use]
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    /// `Artist - Title` label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// One song within a job.
#[derive(Debug, Clone, Serialize)]
pub struct Track {
    /// Position in the source playlist.
    pub index: usize,
    /// Comma separated artist list.
    pub artist: String,
    /// Track title.
    pub title: String,
    /// Album name when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Current state.
    pub status: TrackStatus,
    /// Number of fetch cycles started so far.
    pub attempt: u32,
    /// Library-relative path once done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Error or retry explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Classification of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Provider identifier used for library lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

impl Track {
    fn from_request(index: usize, request: TrackRequest) -> Self {
        Self {
            index,
            artist: request.artist,
            title: request.title,
            album: request.album,
            status: TrackStatus::Queued,
            attempt: 0,
            path: None,
            message: None,
            error_kind: None,
            provider_id: request.provider_id,
        }
    }

    /// Rebuilds the request this track was created from.
    #[must_use]
    pub fn request(&self) -> TrackRequest {
        TrackRequest {
            artist: self.artist.clone(),
            title: self.title.clone(),
            album: self.album.clone(),
            provider_id: self.provider_id.clone(),
        }
    }

    /// `Artist - Title` label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// A submitted download request and all of its tracks.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,
    /// Human readable name, also used for the playlist folder.
    pub display_name: String,
    /// Submission source.
    pub source: JobSource,
    /// Overall state.
    pub status: JobStatus,
    /// Append-only diagnostic log.
    pub logs: Vec<String>,
    /// Tracks in source order.
    pub tracks: Vec<Track>,
    /// Folder receiving links and the manifest.
    pub folder: PathBuf,
    /// Written manifest, once the job is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Returns true when no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of tracks in the given state.
    #[must_use]
    pub fn count(&self, status: TrackStatus) -> usize {
        self.tracks.iter().filter(|t| t.status == status).count()
    }

    /// Number of tracks that reached a terminal state.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.tracks.iter().filter(|t| t.status.is_terminal()).count()
    }
}

/// Rejected state machine transition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    /// The job already reached a terminal state.
    #[error("job {job} is already {status}")]
    JobTerminal {
        /// Job identifier.
        job: JobId,
        /// Its terminal state.
        status: JobStatus,
    },

    /// No track at this index.
    #[error("job {job} has no track #{index}")]
    UnknownTrack {
        /// Job identifier.
        job: JobId,
        /// Requested index.
        index: usize,
    },

    /// The track is not in the state the transition starts from.
    #[error("track #{index} of job {job} is {actual}, expected {expected}")]
    TrackState {
        /// Job identifier.
        job: JobId,
        /// Track index.
        index: usize,
        /// Current state.
        actual: TrackStatus,
        /// State required by the transition.
        expected: TrackStatus,
    },

    /// Tracks can only be added or the job failed before anything started.
    #[error("job {job} is {status}, expected queued")]
    NotQueued {
        /// Job identifier.
        job: JobId,
        /// Current state.
        status: JobStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::CompletedWithErrors.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_track_status_terminal_states() {
        assert!(!TrackStatus::Queued.is_terminal());
        assert!(!TrackStatus::Fetching.is_terminal());
        assert!(TrackStatus::Done.is_terminal());
        assert!(TrackStatus::Error.is_terminal());
        assert!(TrackStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_job_id_parse_round_trip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap_or_default();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::CompletedWithErrors).unwrap_or_default();
        assert_eq!(json, "\"completed_with_errors\"");
    }

    #[test]
    fn test_track_request_label() {
        let request = TrackRequest::new("Daft Punk", "Aerodynamic").with_album("Discovery");
        assert_eq!(request.label(), "Daft Punk - Aerodynamic");
        assert_eq!(request.album.as_deref(), Some("Discovery"));
    }
}
