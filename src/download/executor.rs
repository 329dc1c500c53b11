//! Track fetch executor: one bounded attempt at materializing a track.
//!
//! Flow: claim the library key, short-circuit if the content is already
//! present, otherwise run the resolver, move its file into the library,
//! complete the claim and link the library file into the job folder. The
//! whole sequence runs under a hard wall-clock timeout owned by the
//! executor; external tools are killed when it fires.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::FetchError;
use crate::job::TrackRequest;
use crate::library::{Claim, LibraryIndex, LibraryKey, render_file_name};
use crate::resolver::{FetchRequest, TrackResolver};

/// Result of [`TrackFetchExecutor::fetch`].
#[derive(Debug)]
pub enum FetchOutcome {
    /// The track is linked into the job folder.
    Done {
        /// Library-relative path of the file.
        path: PathBuf,
        /// True when no fetch happened because the library already had it.
        reused: bool,
    },
    /// The attempt failed.
    Error(FetchError),
}

/// Naming and format options for fetched files.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Library file name template.
    pub template: String,
    /// Audio format hint.
    pub format: String,
    /// Audio quality hint.
    pub quality: String,
}

/// Runs single fetch attempts against the shared library.
pub struct TrackFetchExecutor {
    library: LibraryIndex,
    resolver: Arc<dyn TrackResolver>,
    options: ExecutorOptions,
}

impl std::fmt::Debug for TrackFetchExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackFetchExecutor")
            .field("library", &self.library)
            .field("resolver", &self.resolver.name())
            .field("options", &self.options)
            .finish()
    }
}

impl TrackFetchExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        library: LibraryIndex,
        resolver: Arc<dyn TrackResolver>,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            library,
            resolver,
            options,
        }
    }

    /// Library this executor places files into.
    #[must_use]
    pub fn library(&self) -> &LibraryIndex {
        &self.library
    }

    /// Fetches `track` and links it into `folder`, giving up after `limit`.
    #[instrument(skip(self, track, folder), fields(track = %track.label(), timeout_secs = limit.as_secs_f64()))]
    pub async fn fetch(&self, track: &TrackRequest, folder: &Path, limit: Duration) -> FetchOutcome {
        match tokio::time::timeout(limit, self.fetch_inner(track, folder)).await {
            Ok(Ok((path, reused))) => FetchOutcome::Done { path, reused },
            Ok(Err(error)) => FetchOutcome::Error(error),
            Err(_elapsed) => {
                warn!(limit_ms = limit.as_millis(), "Track fetch timed out");
                FetchOutcome::Error(FetchError::timeout(track.label(), limit))
            }
        }
    }

    async fn fetch_inner(
        &self,
        track: &TrackRequest,
        folder: &Path,
    ) -> Result<(PathBuf, bool), FetchError> {
        let key = LibraryKey::new(&track.artist, &track.title, track.provider_id.as_deref());
        match self.library.claim(&key).await {
            Claim::AlreadyPresent(existing) => {
                debug!(%key, path = %existing.display(), "Already in library");
                self.library.link_into(&key, folder).await?;
                Ok((self.library.relative_path(&existing), true))
            }
            Claim::Claimed(ticket) => {
                let placed = match self.materialize(track).await {
                    Ok(placed) => placed,
                    Err(error) => {
                        ticket.fail();
                        return Err(error);
                    }
                };
                ticket.complete(placed.clone());
                self.library.link_into(&key, folder).await?;
                Ok((self.library.relative_path(&placed), false))
            }
        }
    }

    async fn materialize(&self, track: &TrackRequest) -> Result<PathBuf, FetchError> {
        let request = FetchRequest::from_track(track, &self.options.format, &self.options.quality);
        let fetched = self.resolver.resolve_and_fetch(&request).await?;
        let file_name = render_file_name(
            &self.options.template,
            &track.artist,
            &track.title,
            track.album.as_deref(),
            fetched.extension(),
        );
        self.library.import(fetched.path(), &file_name).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::download::ErrorKind;
    use crate::library::DEFAULT_TEMPLATE;
    use crate::resolver::FetchedFile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct WritesFile {
        staging: PathBuf,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TrackResolver for WritesFile {
        fn name(&self) -> &str {
            "writes-file"
        }

        async fn resolve_and_fetch(&self, request: &FetchRequest) -> Result<FetchedFile, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let path = self.staging.join(format!("download-{n}.{}", request.format));
            std::fs::write(&path, request.label()).unwrap();
            Ok(FetchedFile::unmanaged(path))
        }
    }

    struct Hangs;

    #[async_trait]
    impl TrackResolver for Hangs {
        fn name(&self) -> &str {
            "hangs"
        }

        async fn resolve_and_fetch(&self, _request: &FetchRequest) -> Result<FetchedFile, FetchError> {
            std::future::pending().await
        }
    }

    fn options() -> ExecutorOptions {
        ExecutorOptions {
            template: DEFAULT_TEMPLATE.to_string(),
            format: "mp3".to_string(),
            quality: "192".to_string(),
        }
    }

    #[tokio::test]
    async fn test_fetch_places_file_and_links_into_folder() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let library = LibraryIndex::open(temp.path().join("library")).await.unwrap();
        let resolver = Arc::new(WritesFile {
            staging,
            calls: AtomicUsize::new(0),
        });
        let executor = TrackFetchExecutor::new(library.clone(), resolver.clone(), options());
        let folder = temp.path().join("playlists").join("Mix");

        let track = TrackRequest::new("Daft Punk", "Da Funk");
        let outcome = executor.fetch(&track, &folder, Duration::from_secs(5)).await;
        let FetchOutcome::Done { path, reused } = outcome else {
            panic!("expected done, got {outcome:?}");
        };
        assert_eq!(path, PathBuf::from("Daft Punk - Da Funk.mp3"));
        assert!(!reused);
        assert!(folder.join("Daft Punk - Da Funk.mp3").is_file());

        let again = executor.fetch(&track, &folder, Duration::from_secs(5)).await;
        assert!(matches!(again, FetchOutcome::Done { reused: true, .. }));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_times_out_and_releases_claim() {
        let temp = TempDir::new().unwrap();
        let library = LibraryIndex::new(temp.path());
        let executor = TrackFetchExecutor::new(library.clone(), Arc::new(Hangs), options());
        let track = TrackRequest::new("A", "B");

        let started = std::time::Instant::now();
        let outcome = executor.fetch(&track, temp.path(), Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        let FetchOutcome::Error(error) = outcome else {
            panic!("expected timeout");
        };
        assert_eq!(error.kind(), ErrorKind::Timeout);

        let key = LibraryKey::new("A", "B", None);
        assert!(matches!(library.claim(&key).await, Claim::Claimed(_)));
    }
}
