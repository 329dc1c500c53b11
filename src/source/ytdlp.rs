//! Any other URL: let yt-dlp list the playlist without downloading.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::{Expansion, SourceError, SourcePriority, SourceResolver};
use crate::job::{JobSource, TrackRequest};
use crate::resolver::{classify_tool_failure, run_tool};

#[derive(Debug, Default, Deserialize)]
struct FlatInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    entries: Option<Vec<FlatInfo>>,
    #[serde(default)]
    track: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl FlatInfo {
    fn into_request(self) -> Option<TrackRequest> {
        let provider_id = self.webpage_url.or(self.url);
        let title = self.track.or(self.title).filter(|t| !t.trim().is_empty())?;
        let artist = self
            .artist
            .or(self.uploader)
            .or(self.channel)
            .map(|a| a.trim_end_matches(" - Topic").to_string())
            .filter(|a| !a.trim().is_empty());

        let (artist, title) = match artist {
            Some(artist) => (artist, title),
            None => {
                let (artist, title) = title.split_once(" - ")?;
                (artist.trim().to_string(), title.trim().to_string())
            }
        };
        Some(TrackRequest {
            artist,
            title,
            album: self.album,
            provider_id,
        })
    }
}

/// Parses `yt-dlp --flat-playlist -J` output.
///
/// A playlist yields one track per entry; a single video yields one track.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] for malformed JSON.
pub fn parse_flat_playlist(json: &str) -> Result<Expansion, SourceError> {
    let info: FlatInfo = serde_json::from_str(json).map_err(|e| SourceError::Parse {
        tool: "yt-dlp",
        detail: e.to_string(),
    })?;

    let mut expansion = Expansion::default();
    match info.entries {
        Some(entries) => {
            expansion.display_name = info.title;
            for (index, entry) in entries.into_iter().enumerate() {
                match entry.into_request() {
                    Some(request) => expansion.tracks.push(request),
                    None => expansion
                        .skipped
                        .push(format!("entry {}: no artist or title", index + 1)),
                }
            }
        }
        None => {
            let single = FlatInfo {
                entries: None,
                ..info
            };
            match single.into_request() {
                Some(request) => expansion.tracks.push(request),
                None => expansion.skipped.push("video has no artist or title".to_string()),
            }
        }
    }
    Ok(expansion)
}

/// Expands generic media URLs with yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpSource {
    binary: PathBuf,
}

impl YtDlpSource {
    /// Creates the resolver using `binary`.
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl SourceResolver for YtDlpSource {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Fallback
    }

    fn can_handle(&self, source: &JobSource) -> bool {
        match source {
            JobSource::Url(url) => {
                Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
            }
            JobSource::Csv(_) => false,
        }
    }

    async fn expand(
        &self,
        source: &JobSource,
        limit: Option<usize>,
    ) -> Result<Expansion, SourceError> {
        let JobSource::Url(url) = source else {
            return Err(SourceError::Unsupported(source.to_string()));
        };
        let mut args = vec!["--flat-playlist".to_string(), "-J".to_string()];
        if let Some(limit) = limit {
            args.extend(["--playlist-end".to_string(), limit.to_string()]);
        }
        args.push(url.clone());

        let output = run_tool(&self.binary, &args).await?;
        if !output.success() {
            return Err(classify_tool_failure(url, &output).into());
        }
        parse_flat_playlist(&output.stdout)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_playlist_entries() {
        let json = r#"{
            "title": "Chill Mix",
            "entries": [
                {"title": "Teardrop", "channel": "Massive Attack - Topic", "url": "https://y/1"},
                {"title": "Portishead - Glory Box", "url": "https://y/2"},
                {"title": "untitled upload"}
            ]
        }"#;
        let expansion = parse_flat_playlist(json).unwrap();
        assert_eq!(expansion.display_name.as_deref(), Some("Chill Mix"));
        assert_eq!(expansion.tracks.len(), 2);
        assert_eq!(expansion.tracks[0].artist, "Massive Attack");
        assert_eq!(expansion.tracks[1].artist, "Portishead");
        assert_eq!(expansion.tracks[1].title, "Glory Box");
        assert_eq!(expansion.skipped, vec!["entry 3: no artist or title"]);
    }

    #[test]
    fn test_parse_single_video_prefers_track_metadata() {
        let json = r#"{"title": "Air - Sexy Boy (Official Video)", "track": "Sexy Boy",
                       "artist": "Air", "album": "Moon Safari",
                       "webpage_url": "https://www.youtube.com/watch?v=x"}"#;
        let expansion = parse_flat_playlist(json).unwrap();
        assert_eq!(expansion.display_name, None);
        assert_eq!(
            expansion.tracks,
            vec![
                TrackRequest::new("Air", "Sexy Boy")
                    .with_album("Moon Safari")
                    .with_provider_id("https://www.youtube.com/watch?v=x")
            ]
        );
    }

    #[test]
    fn test_can_handle_http_urls_only() {
        let source = YtDlpSource::new(PathBuf::from("yt-dlp"));
        assert!(source.can_handle(&JobSource::Url("https://youtube.com/playlist?list=x".into())));
        assert!(!source.can_handle(&JobSource::Url("spotify:track:1".into())));
        assert!(!source.can_handle(&JobSource::Csv(PathBuf::from("x.csv"))));
    }

    #[test]
    fn test_parse_flat_playlist_rejects_garbage() {
        assert!(parse_flat_playlist("nope").is_err());
    }
}
