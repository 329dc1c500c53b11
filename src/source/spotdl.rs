//! Spotify playlists, albums and tracks via `spotdl save`.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{Expansion, SourceError, SourcePriority, SourceResolver};
use crate::download::FetchError;
use crate::job::{JobSource, TrackRequest};
use crate::resolver::run_tool;

/// Song entry written by `spotdl save`.
#[derive(Debug, Clone, Deserialize)]
struct SpotdlSong {
    name: String,
    #[serde(default)]
    artists: Vec<String>,
    #[serde(default)]
    album_name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    list_name: Option<String>,
}

/// Returns true for Spotify web URLs and `spotify:` URIs.
#[must_use]
pub fn is_spotify_url(source: &str) -> bool {
    if source.starts_with("spotify:") {
        return true;
    }
    Url::parse(source)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| host == "open.spotify.com" || host == "spotify.link")
}

/// Parses the JSON list written by `spotdl save`.
///
/// # Errors
///
/// Returns [`SourceError::Parse`] for malformed JSON.
pub fn parse_spotdl_songs(json: &str) -> Result<Expansion, SourceError> {
    let songs: Vec<SpotdlSong> = serde_json::from_str(json).map_err(|e| SourceError::Parse {
        tool: "spotdl",
        detail: e.to_string(),
    })?;

    let display_name = songs
        .iter()
        .find_map(|song| song.list_name.clone())
        .filter(|name| !name.trim().is_empty());
    let mut expansion = Expansion {
        display_name,
        ..Expansion::default()
    };
    for (index, song) in songs.into_iter().enumerate() {
        if song.name.trim().is_empty() || song.artists.is_empty() {
            expansion
                .skipped
                .push(format!("entry {}: missing name or artists", index + 1));
            continue;
        }
        expansion.tracks.push(TrackRequest {
            artist: song.artists.join(", "),
            title: song.name,
            album: song.album_name.filter(|a| !a.is_empty()),
            provider_id: song.url,
        });
    }
    Ok(expansion)
}

/// Expands Spotify links with spotdl.
#[derive(Debug, Clone)]
pub struct SpotdlSource {
    binary: PathBuf,
    client_id: Option<String>,
    client_secret: Option<String>,
    staging_root: PathBuf,
}

impl SpotdlSource {
    /// Creates the resolver; credentials are forwarded when both are set.
    #[must_use]
    pub fn new(
        binary: PathBuf,
        client_id: Option<String>,
        client_secret: Option<String>,
        staging_root: PathBuf,
    ) -> Self {
        Self {
            binary,
            client_id,
            client_secret,
            staging_root,
        }
    }

    fn args(&self, url: &str, save_file: &std::path::Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = vec![
            "save".into(),
            url.into(),
            "--save-file".into(),
            save_file.as_os_str().to_os_string(),
        ];
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            args.extend(["--client-id".into(), id.into(), "--client-secret".into(), secret.into()]);
        }
        args
    }
}

#[async_trait]
impl SourceResolver for SpotdlSource {
    fn name(&self) -> &str {
        "spotdl"
    }

    fn priority(&self) -> SourcePriority {
        SourcePriority::Specialized
    }

    fn can_handle(&self, source: &JobSource) -> bool {
        matches!(source, JobSource::Url(url) if is_spotify_url(url))
    }

    #[instrument(skip(self, _limit), fields(binary = %self.binary.display()))]
    async fn expand(
        &self,
        source: &JobSource,
        _limit: Option<usize>,
    ) -> Result<Expansion, SourceError> {
        let JobSource::Url(url) = source else {
            return Err(SourceError::Unsupported(source.to_string()));
        };
        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| FetchError::io(&self.staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix("spotdl-")
            .tempdir_in(&self.staging_root)
            .map_err(|e| FetchError::io(&self.staging_root, e))?;
        let save_file = staging.path().join("songs.spotdl");

        let output = run_tool(&self.binary, self.args(url, &save_file)).await?;
        if !output.success() {
            return Err(FetchError::precondition(format!(
                "spotdl could not list {url}: {}",
                output.last_error_line()
            ))
            .into());
        }
        let json = tokio::fs::read_to_string(&save_file)
            .await
            .map_err(|source| SourceError::Io {
                path: save_file.clone(),
                source,
            })?;
        debug!(bytes = json.len(), "Read spotdl save file");
        parse_spotdl_songs(&json)
    }
}
