//! Track resolution: turning artist/title metadata into a local audio file.
//!
//! The engine only depends on the [`TrackResolver`] capability. The
//! production implementation is [`YtDlpResolver`], which searches an ordered
//! list of [`SearchProvider`]s and stops at the first one that yields a file.
//!
//! # Object Safety
//!
//! The trait uses `async_trait` so resolvers can be shared as
//! `Arc<dyn TrackResolver>` between workers.

mod process;
mod ytdlp;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::download::FetchError;
use crate::job::TrackRequest;

pub use process::{ToolOutput, classify_tool_failure, run_tool, tool_version};
pub use ytdlp::YtDlpResolver;

/// Default audio format passed to the converter.
pub const DEFAULT_AUDIO_FORMAT: &str = "mp3";

/// Default audio quality passed to the converter.
pub const DEFAULT_AUDIO_QUALITY: &str = "192";

/// Format value that keeps the source stream without conversion.
pub const KEEP_SOURCE_FORMAT: &str = "best";

/// Everything a resolver needs to fetch one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Comma separated artist list.
    pub artist: String,
    /// Track title.
    pub title: String,
    /// Album, used to sharpen the search.
    pub album: Option<String>,
    /// Target audio format, or [`KEEP_SOURCE_FORMAT`].
    pub format: String,
    /// Target audio quality hint.
    pub quality: String,
}

impl FetchRequest {
    /// Builds a request from track metadata and the format hint.
    #[must_use]
    pub fn from_track(track: &TrackRequest, format: &str, quality: &str) -> Self {
        Self {
            artist: track.artist.clone(),
            title: track.title.clone(),
            album: track.album.clone(),
            format: format.to_string(),
            quality: quality.to_string(),
        }
    }

    /// `Artist - Title` label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Free-text search query: title, artists, optional album, then `audio`
    /// to bias results away from music videos.
    ///
    /// Returns `None` when title or artist is missing.
    #[must_use]
    pub fn search_query(&self, include_album: bool) -> Option<String> {
        let title = self.title.trim();
        let artist = self.artist.trim();
        if title.is_empty() || artist.is_empty() {
            return None;
        }
        let mut parts = vec![title, artist];
        if include_album {
            if let Some(album) = self.album.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
                parts.push(album);
            }
        }
        parts.push("audio");
        Some(parts.join(" "))
    }
}

/// A fetched file waiting to be moved into the library.
///
/// Keeps the staging directory alive; the file disappears when this value
/// is dropped without being imported.
#[derive(Debug)]
pub struct FetchedFile {
    path: PathBuf,
    _staging: Option<TempDir>,
}

impl FetchedFile {
    /// Wraps a file inside a staging directory owned by this value.
    #[must_use]
    pub fn staged(path: PathBuf, staging: TempDir) -> Self {
        Self {
            path,
            _staging: Some(staging),
        }
    }

    /// Wraps a file whose lifetime is managed by the caller.
    #[must_use]
    pub fn unmanaged(path: PathBuf) -> Self {
        Self {
            path,
            _staging: None,
        }
    }

    /// Location of the fetched file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File extension of the fetched file, without the dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin")
    }
}

/// Search backend for [`YtDlpResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchProvider {
    /// YouTube Music search, best metadata.
    YoutubeMusic,
    /// Regular YouTube search.
    Youtube,
}

impl SearchProvider {
    /// yt-dlp search prefix returning the first hit.
    #[must_use]
    pub fn search_prefix(self) -> &'static str {
        match self {
            Self::YoutubeMusic => "ytmusicsearch1",
            Self::Youtube => "ytsearch1",
        }
    }

    /// Returns the configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::YoutubeMusic => "youtube-music",
            Self::Youtube => "youtube",
        }
    }
}

impl fmt::Display for SearchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube-music" | "ytmusic" => Ok(Self::YoutubeMusic),
            "youtube" | "yt" => Ok(Self::Youtube),
            other => Err(format!("unknown search provider: {other}")),
        }
    }
}

/// Capability that resolves and downloads one track.
///
/// Implementations must report failures deterministically through
/// [`FetchError`], honor the format/quality hint, and return a file outside
/// the library root.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Checks external prerequisites once per job.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Precondition`] when the resolver cannot work at all.
    async fn preflight(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Searches for the track and downloads it to a staging location.
    async fn resolve_and_fetch(&self, request: &FetchRequest) -> Result<FetchedFile, FetchError>;
}
