//! Expanding a submission source into an ordered list of tracks.
//!
//! Sources are handled by a priority-ordered [`SourceRegistry`] of
//! [`SourceResolver`]s: the first resolver whose `can_handle` accepts the
//! source expands it. Within one priority level, registration order wins.

mod csv;
mod spotdl;
mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::download::FetchError;
use crate::job::{JobSource, TrackRequest};

pub use self::csv::{CsvSource, parse_csv};
pub use spotdl::{SpotdlSource, is_spotify_url, parse_spotdl_songs};
pub use ytdlp::{YtDlpSource, parse_flat_playlist};

/// Errors from source expansion.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed CSV.
    #[error("invalid CSV {path}: {source}")]
    Csv {
        /// CSV file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: ::csv::Error,
    },

    /// A required CSV column is absent.
    #[error("CSV {path} has no '{column}' column")]
    MissingColumn {
        /// CSV file.
        path: PathBuf,
        /// Column header that was expected.
        column: &'static str,
    },

    /// Tool output could not be parsed.
    #[error("cannot parse {tool} output: {detail}")]
    Parse {
        /// Tool name.
        tool: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// Running an external tool failed.
    #[error(transparent)]
    Tool(#[from] FetchError),

    /// No registered resolver accepts the source.
    #[error("unsupported source: {0}")]
    Unsupported(String),
}

impl SourceError {
    /// Converts into the job-level precondition failure.
    #[must_use]
    pub fn into_fetch_error(self) -> FetchError {
        match self {
            Self::Tool(error @ FetchError::Precondition { .. }) => error,
            other => FetchError::precondition(other.to_string()),
        }
    }
}

/// Tracks produced by expanding one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    /// Playlist or album name reported by the source, if any.
    pub display_name: Option<String>,
    /// Tracks in source order.
    pub tracks: Vec<TrackRequest>,
    /// Human readable notes about skipped entries.
    pub skipped: Vec<String>,
}

/// Priority level for source resolver ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourcePriority {
    /// Handles one specific service or file type.
    Specialized = 0,
    /// Handles anything it can parse.
    Fallback = 1,
}

/// Expands one kind of source.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// Returns the resolver's name.
    fn name(&self) -> &str;

    /// Returns the resolver's priority level.
    fn priority(&self) -> SourcePriority;

    /// Returns true if this resolver can expand `source`.
    fn can_handle(&self, source: &JobSource) -> bool;

    /// Expands `source` into at most `limit` tracks.
    async fn expand(
        &self,
        source: &JobSource,
        limit: Option<usize>,
    ) -> Result<Expansion, SourceError>;
}

/// Priority-ordered collection of source resolvers.
#[derive(Default)]
pub struct SourceRegistry {
    resolvers: Vec<Box<dyn SourceResolver>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.resolvers.iter().map(|r| r.name()))
            .finish()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resolver, keeping priority order stable.
    pub fn register(&mut self, resolver: Box<dyn SourceResolver>) {
        debug!(name = resolver.name(), priority = ?resolver.priority(), "Registering source resolver");
        self.resolvers.push(resolver);
        self.resolvers.sort_by_key(|r| r.priority());
    }

    /// Names of registered resolvers in the order they are consulted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Expands `source` with the first resolver that accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] when nothing accepts the source,
    /// or the chosen resolver's error.
    #[instrument(skip(self), fields(source = %source))]
    pub async fn expand(
        &self,
        source: &JobSource,
        limit: Option<usize>,
    ) -> Result<Expansion, SourceError> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.can_handle(source))
            .ok_or_else(|| SourceError::Unsupported(source.to_string()))?;
        let mut expansion = resolver.expand(source, limit).await?;
        if let Some(limit) = limit {
            expansion.tracks.truncate(limit);
        }
        info!(
            resolver = resolver.name(),
            tracks = expansion.tracks.len(),
            skipped = expansion.skipped.len(),
            "Source expanded"
        );
        Ok(expansion)
    }
}

/// Options for the default source registry.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// spotdl executable.
    pub spotdl_path: PathBuf,
    /// yt-dlp executable.
    pub ytdlp_path: PathBuf,
    /// Spotify API client id forwarded to spotdl.
    pub spotify_client_id: Option<String>,
    /// Spotify API client secret forwarded to spotdl.
    pub spotify_client_secret: Option<String>,
    /// Scratch directory for tool output.
    pub staging_root: PathBuf,
}

/// Builds the registry used by the engine: CSV, Spotify, then any URL
/// yt-dlp understands.
#[must_use]
pub fn build_default_source_registry(options: &SourceOptions) -> SourceRegistry {
    let mut registry = SourceRegistry::new();
    registry.register(Box::new(CsvSource::new()));
    registry.register(Box::new(SpotdlSource::new(
        options.spotdl_path.clone(),
        options.spotify_client_id.clone(),
        options.spotify_client_secret.clone(),
        options.staging_root.clone(),
    )));
    registry.register(Box::new(YtDlpSource::new(options.ytdlp_path.clone())));
    registry
}
