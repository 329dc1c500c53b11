//! yt-dlp backed resolver.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::process::{classify_tool_failure, run_tool, tool_version};
use super::{FetchRequest, FetchedFile, KEEP_SOURCE_FORMAT, SearchProvider, TrackResolver};
use crate::download::{ErrorKind, FetchError};

// Skips live streams and music videos; the query already ends in "audio".
const MATCH_FILTER: &str =
    "!is_live & title !~= '(?i)(official (music )?video|music video)'";

/// Searches with yt-dlp and extracts audio into a staging directory.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: PathBuf,
    providers: Vec<SearchProvider>,
    include_album: bool,
    staging_root: PathBuf,
}

impl YtDlpResolver {
    /// Creates a resolver using `binary`, trying `providers` in order.
    ///
    /// Staging directories are created under `staging_root`, which must lie
    /// outside the library root.
    #[must_use]
    pub fn new(
        binary: impl Into<PathBuf>,
        providers: Vec<SearchProvider>,
        include_album: bool,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        let providers = if providers.is_empty() {
            vec![SearchProvider::YoutubeMusic, SearchProvider::Youtube]
        } else {
            providers
        };
        Self {
            binary: binary.into(),
            providers,
            include_album,
            staging_root: staging_root.into(),
        }
    }

    /// Search providers in the order they are tried.
    #[must_use]
    pub fn providers(&self) -> &[SearchProvider] {
        &self.providers
    }

    /// Full yt-dlp search targets for a request, one per provider.
    #[must_use]
    pub fn search_targets(&self, request: &FetchRequest) -> Vec<String> {
        let Some(query) = request.search_query(self.include_album) else {
            return Vec::new();
        };
        self.providers
            .iter()
            .map(|provider| format!("{}:{query}", provider.search_prefix()))
            .collect()
    }

    /// yt-dlp argument list for one search target.
    #[must_use]
    pub fn download_args(&self, target: &str, request: &FetchRequest, out_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--no-playlist",
            "--no-progress",
            "--no-simulate",
            "--format",
            "bestaudio/best",
            "--match-filters",
            MATCH_FILTER,
            "--embed-metadata",
            "--print",
            "after_move:filepath",
            "--output",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(out_dir.join("%(title)s.%(ext)s").into_os_string());
        if request.format != KEEP_SOURCE_FORMAT {
            args.extend(
                [
                    "--extract-audio",
                    "--audio-format",
                    request.format.as_str(),
                    "--audio-quality",
                    request.quality.as_str(),
                ]
                .into_iter()
                .map(OsString::from),
            );
        }
        args.push(OsString::from(target));
        args
    }

    async fn fetch_with(&self, target: &str, request: &FetchRequest) -> Result<FetchedFile, FetchError> {
        tokio::fs::create_dir_all(&self.staging_root)
            .await
            .map_err(|e| FetchError::io(&self.staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix("fetch-")
            .tempdir_in(&self.staging_root)
            .map_err(|e| FetchError::io(&self.staging_root, e))?;

        let output = run_tool(&self.binary, self.download_args(target, request, staging.path())).await?;
        if !output.success() {
            return Err(classify_tool_failure(target, &output));
        }

        let Some(printed) = output.stdout.lines().map(str::trim).rev().find(|l| !l.is_empty()) else {
            return Err(FetchError::not_found(target, "no result passed the filters"));
        };
        let path = PathBuf::from(printed);
        if !path.is_file() {
            return Err(FetchError::conversion(format!(
                "yt-dlp reported {} but the file does not exist",
                path.display()
            )));
        }
        Ok(FetchedFile::staged(path, staging))
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn preflight(&self) -> Result<(), FetchError> {
        let version = tool_version(&self.binary).await?;
        debug!(binary = %self.binary.display(), %version, "yt-dlp available");
        Ok(())
    }

    #[instrument(skip(self, request), fields(track = %request.label()))]
    async fn resolve_and_fetch(&self, request: &FetchRequest) -> Result<FetchedFile, FetchError> {
        let targets = self.search_targets(request);
        if targets.is_empty() {
            return Err(FetchError::not_found(
                request.label(),
                "title or artist is missing",
            ));
        }

        let mut last_error = None;
        for target in targets {
            match self.fetch_with(&target, request).await {
                Ok(file) => {
                    info!(%target, path = %file.path().display(), "Fetched");
                    return Ok(file);
                }
                // Only a miss moves on to the next provider.
                Err(error) if error.kind() == ErrorKind::ResolveNotFound => {
                    warn!(%target, %error, "No usable result, trying next provider");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error.unwrap_or_else(|| FetchError::not_found(request.label(), "no providers")))
    }
}
