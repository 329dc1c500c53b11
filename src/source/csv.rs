//! Exportify CSV playlists.

use std::io::Read;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{Expansion, SourceError, SourcePriority, SourceResolver};
use crate::job::{JobSource, TrackRequest};

const TITLE_COLUMN: &str = "Track Name";
const ARTIST_COLUMN: &str = "Artist Name(s)";
const ALBUM_COLUMN: &str = "Album Name";
const URI_COLUMN: &str = "Track URI";

/// Reads playlists exported by Exportify.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSource;

impl CsvSource {
    /// Creates the CSV source resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceResolver for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Specialized
    }

    fn can_handle(&self, source: &JobSource) -> bool {
        matches!(source, JobSource::Csv(_))
    }

    async fn expand(
        &self,
        source: &JobSource,
        limit: Option<usize>,
    ) -> Result<Expansion, SourceError> {
        let JobSource::Csv(path) = source else {
            return Err(SourceError::Unsupported(source.to_string()));
        };
        let bytes = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let mut expansion = parse_csv(bytes.as_slice(), path, limit)?;
        expansion.display_name = display_name_for(path);
        Ok(expansion)
    }
}

/// Parses Exportify CSV content.
///
/// `limit` caps the number of data rows read, counting rows that are
/// skipped for missing title or artist.
///
/// # Errors
///
/// Fails on malformed CSV or when the title or artist column is absent.
pub fn parse_csv<R: Read>(
    reader: R,
    path: &Path,
    limit: Option<usize>,
) -> Result<Expansion, SourceError> {
    let csv_error = |source| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ::csv::ReaderBuilder::new()
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers().map_err(csv_error)?.clone();
    let column = |name: &'static str| headers.iter().position(|h| h.trim_start_matches('\u{feff}') == name);
    let title_at = column(TITLE_COLUMN).ok_or_else(|| SourceError::MissingColumn {
        path: path.to_path_buf(),
        column: TITLE_COLUMN,
    })?;
    let artist_at = column(ARTIST_COLUMN).ok_or_else(|| SourceError::MissingColumn {
        path: path.to_path_buf(),
        column: ARTIST_COLUMN,
    })?;
    let album_at = column(ALBUM_COLUMN);
    let uri_at = column(URI_COLUMN);

    let mut expansion = Expansion::default();
    for (row, record) in reader.records().enumerate() {
        if limit.is_some_and(|limit| row >= limit) {
            break;
        }
        let record = record.map_err(csv_error)?;
        let field = |at: usize| record.get(at).unwrap_or("").to_string();
        let optional = |at: Option<usize>| {
            at.and_then(|at| record.get(at))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let title = field(title_at);
        let artist = field(artist_at);
        // Row numbers are 1-based and count the header line.
        let line = row + 2;
        if title.is_empty() || artist.is_empty() {
            debug!(line, "Skipping CSV row without title or artist");
            expansion
                .skipped
                .push(format!("line {line}: missing track name or artist"));
            continue;
        }
        expansion.tracks.push(TrackRequest {
            artist,
            title,
            album: optional(album_at),
            provider_id: optional(uri_at),
        });
    }
    Ok(expansion)
}

fn display_name_for(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const EXPORT: &str = "\
Track URI,Track Name,Artist Name(s),Album Name,Duration (ms)
spotify:track:1,One More Time,Daft Punk,Discovery,320357
spotify:track:2,,Nobody,Nothing,1
spotify:track:3,Teardrop,Massive Attack,,330000
";

    #[test]
    fn test_parse_csv_reads_rows_in_order() {
        let expansion = parse_csv(EXPORT.as_bytes(), Path::new("mix.csv"), None).unwrap();
        assert_eq!(expansion.tracks.len(), 2);
        assert_eq!(expansion.tracks[0].title, "One More Time");
        assert_eq!(expansion.tracks[0].album.as_deref(), Some("Discovery"));
        assert_eq!(expansion.tracks[0].provider_id.as_deref(), Some("spotify:track:1"));
        assert_eq!(expansion.tracks[1].artist, "Massive Attack");
        assert_eq!(expansion.tracks[1].album, None);
        assert_eq!(expansion.skipped, vec!["line 3: missing track name or artist"]);
    }

    #[test]
    fn test_parse_csv_limit_counts_skipped_rows() {
        let expansion = parse_csv(EXPORT.as_bytes(), Path::new("mix.csv"), Some(2)).unwrap();
        assert_eq!(expansion.tracks.len(), 1);
        assert_eq!(expansion.skipped.len(), 1);
    }

    #[test]
    fn test_parse_csv_missing_column() {
        let error = parse_csv("Name,Artist\nx,y\n".as_bytes(), Path::new("bad.csv"), None)
            .unwrap_err();
        assert!(matches!(error, SourceError::MissingColumn { column: "Track Name", .. }));
    }

    #[test]
    fn test_parse_csv_handles_quoted_artist_lists() {
        let data = "Track Name,Artist Name(s)\n\"Get Lucky\",\"Daft Punk, Pharrell Williams\"\n";
        let expansion = parse_csv(data.as_bytes(), Path::new("x.csv"), None).unwrap();
        assert_eq!(expansion.tracks[0].artist, "Daft Punk, Pharrell Williams");
    }

    #[tokio::test]
    async fn test_expand_uses_file_stem_as_name() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Road Trip.csv");
        std::fs::write(&path, EXPORT).unwrap();

        let expansion = CsvSource::new()
            .expand(&JobSource::Csv(path.clone()), None)
            .await
            .unwrap();
        assert_eq!(expansion.display_name.as_deref(), Some("Road Trip"));
        assert_eq!(expansion.tracks.len(), 2);
    }

    #[tokio::test]
    async fn test_expand_missing_file_is_io_error() {
        let error = CsvSource::new()
            .expand(&JobSource::Csv(PathBuf::from("/nonexistent/x.csv")), None)
            .await
            .unwrap_err();
        assert!(matches!(error, SourceError::Io { .. }));
    }
}
