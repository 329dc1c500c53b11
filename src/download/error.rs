//! Error types for track fetching.
//!
//! Every failure a Track can end with is a [`FetchError`]. The display
//! string always starts with a bracketed cause tag (`[TIMEOUT]`,
//! `[NOT_FOUND]`, ...) followed by the original message, so the Track's
//! `message` field carries both the classification and the detail.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limiter denied the start; retried silently.
    AdmissionDenied,
    /// Search found nothing usable.
    ResolveNotFound,
    /// Network failure talking to the provider.
    FetchNetworkError,
    /// Audio extraction or transcoding failed.
    ConversionError,
    /// The per-track wall-clock bound elapsed.
    Timeout,
    /// Local filesystem permission problem.
    Permission,
    /// Every linking strategy failed.
    LinkFailure,
    /// Missing external tool or credentials; fails the whole job.
    PreconditionFailure,
}

impl ErrorKind {
    /// Returns the stable snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdmissionDenied => "admission_denied",
            Self::ResolveNotFound => "resolve_not_found",
            Self::FetchNetworkError => "fetch_network_error",
            Self::ConversionError => "conversion_error",
            Self::Timeout => "timeout",
            Self::Permission => "permission",
            Self::LinkFailure => "link_failure",
            Self::PreconditionFailure => "precondition_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can end a track fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The rate limiter refused to admit the fetch.
    #[error("[RATE_LIMITED] admission denied, retry in {retry_after:?}")]
    AdmissionDenied {
        /// Time until a slot frees up.
        retry_after: Duration,
    },

    /// No search result could be downloaded for the query.
    #[error("[NOT_FOUND] no result for '{query}': {detail}")]
    NotFound {
        /// The search query that was tried last.
        query: String,
        /// Tool output explaining the miss.
        detail: String,
    },

    /// Network-level failure reported by the external tool.
    #[error("[NETWORK] {detail}")]
    Network {
        /// Tool output or IO error text.
        detail: String,
    },

    /// Post-processing (audio extraction, conversion, tagging) failed.
    #[error("[CONVERSION] {detail}")]
    Conversion {
        /// Tool output explaining the failure.
        detail: String,
    },

    /// The track did not finish within its wall-clock bound.
    #[error("[TIMEOUT] '{track}' did not finish within {limit:?}")]
    Timeout {
        /// Display label of the track.
        track: String,
        /// The bound that was exceeded.
        limit: Duration,
    },

    /// Filesystem permission problem while writing into the library.
    #[error("[PERMISSION] cannot write {path}: {source}")]
    Permission {
        /// Path that could not be written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Hardlink, symlink and copy all failed for a destination.
    #[error("[LINK] could not place {path} (last error: {source})")]
    LinkFailure {
        /// Destination that could not be produced.
        path: PathBuf,
        /// Error from the last strategy tried.
        #[source]
        source: std::io::Error,
    },

    /// Missing external tool or credentials.
    #[error("[PRECONDITION] {detail}")]
    Precondition {
        /// What is missing.
        detail: String,
    },
}

impl FetchError {
    /// Creates a not-found error.
    pub fn not_found(query: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NotFound {
            query: query.into(),
            detail: detail.into(),
        }
    }

    /// Creates a network error.
    pub fn network(detail: impl Into<String>) -> Self {
        Self::Network {
            detail: detail.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(detail: impl Into<String>) -> Self {
        Self::Conversion {
            detail: detail.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(track: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            track: track.into(),
            limit,
        }
    }

    /// Creates a precondition error.
    pub fn precondition(detail: impl Into<String>) -> Self {
        Self::Precondition {
            detail: detail.into(),
        }
    }

    /// Maps a local filesystem error on `path`.
    ///
    /// Permission problems are surfaced as such; any other filesystem error
    /// prevents placement and is reported as a link failure.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission { path, source }
        } else {
            Self::LinkFailure { path, source }
        }
    }

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdmissionDenied { .. } => ErrorKind::AdmissionDenied,
            Self::NotFound { .. } => ErrorKind::ResolveNotFound,
            Self::Network { .. } => ErrorKind::FetchNetworkError,
            Self::Conversion { .. } => ErrorKind::ConversionError,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::LinkFailure { .. } => ErrorKind::LinkFailure,
            Self::Precondition { .. } => ErrorKind::PreconditionFailure,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_timeout_display_carries_tag_and_limit() {
        let error = FetchError::timeout("Daft Punk - Around the World", Duration::from_secs(1));
        let msg = error.to_string();
        assert!(msg.starts_with("[TIMEOUT]"), "Expected tag in: {msg}");
        assert!(msg.contains("Around the World"), "Expected track in: {msg}");
        assert_eq!(error.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_fetch_error_not_found_display() {
        let error = FetchError::not_found("ytmusicsearch1:nothing", "no entries");
        let msg = error.to_string();
        assert!(msg.starts_with("[NOT_FOUND]"), "Expected tag in: {msg}");
        assert!(msg.contains("ytmusicsearch1:nothing"));
        assert!(msg.contains("no entries"));
        assert_eq!(error.kind(), ErrorKind::ResolveNotFound);
    }

    #[test]
    fn test_fetch_error_io_permission_denied_maps_to_permission() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = FetchError::io("/library/a.mp3", source);
        assert_eq!(error.kind(), ErrorKind::Permission);
        assert!(error.to_string().contains("/library/a.mp3"));
    }

    #[test]
    fn test_fetch_error_io_other_maps_to_link_failure() {
        let source = std::io::Error::other("disk full");
        let error = FetchError::io("/library/a.mp3", source);
        assert_eq!(error.kind(), ErrorKind::LinkFailure);
    }

    #[test]
    fn test_error_kind_labels_are_snake_case() {
        assert_eq!(ErrorKind::ResolveNotFound.as_str(), "resolve_not_found");
        assert_eq!(ErrorKind::PreconditionFailure.to_string(), "precondition_failure");
    }
}
