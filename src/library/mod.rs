//! Shared, deduplicated music library.
//!
//! The [`LibraryIndex`] is the single source of truth for "has this song
//! already been downloaded". Every key is either present (a file exists in
//! the library root) or in flight (exactly one caller holds a
//! [`ClaimTicket`] and is fetching it). Callers that race on an in-flight
//! key wait until the ticket resolves and then re-check.
//!
//! # Example
//!
//! ```no_run
//! use playlist_core::library::{Claim, LibraryIndex, LibraryKey};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let index = LibraryIndex::open("downloads/library").await?;
//! let key = LibraryKey::new("Daft Punk", "One More Time", None);
//! match index.claim(&key).await {
//!     Claim::AlreadyPresent(path) => println!("reuse {}", path.display()),
//!     Claim::Claimed(ticket) => ticket.fail(),
//! }
//! # Ok(())
//! # }
//! ```

mod key;
mod link;
mod naming;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::download::FetchError;

pub use key::LibraryKey;
pub use link::{LinkStrategy, Linked, link_file, move_file};
pub use naming::{
    DEFAULT_TEMPLATE, parse_library_file_name, render_file_name, resolve_unique_path,
    sanitize_filename,
};

enum Slot {
    Present(PathBuf),
    InFlight(watch::Receiver<()>),
}

/// Outcome of [`LibraryIndex::claim`].
#[derive(Debug)]
pub enum Claim {
    /// The content is already in the library at this path.
    AlreadyPresent(PathBuf),
    /// The caller is now the only one allowed to fetch this key.
    Claimed(ClaimTicket),
}

/// Exclusive right to fetch one library key.
///
/// Resolve it with [`ClaimTicket::complete`] or [`ClaimTicket::fail`].
/// Dropping an unresolved ticket (for example because the fetch future was
/// cancelled by a timeout) releases the claim like `fail`.
pub struct ClaimTicket {
    key: LibraryKey,
    entries: Arc<DashMap<LibraryKey, Slot>>,
    waiters: Option<watch::Sender<()>>,
}

impl std::fmt::Debug for ClaimTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimTicket").field("key", &self.key).finish()
    }
}

impl ClaimTicket {
    /// Key this ticket was issued for.
    #[must_use]
    pub fn key(&self) -> &LibraryKey {
        &self.key
    }

    /// Records the materialized file and wakes any waiters.
    pub fn complete(mut self, path: PathBuf) {
        debug!(key = %self.key, path = %path.display(), "Claim completed");
        self.entries.insert(self.key.clone(), Slot::Present(path));
        self.waiters.take();
    }

    /// Releases the claim so a later attempt may fetch the key again.
    pub fn fail(self) {
        debug!(key = %self.key, "Claim released after failure");
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        if self.waiters.is_some() {
            self.entries
                .remove_if(&self.key, |_, slot| matches!(slot, Slot::InFlight(_)));
            self.waiters.take();
        }
    }
}

/// Index of the shared library directory.
#[derive(Clone)]
pub struct LibraryIndex {
    root: PathBuf,
    template: String,
    entries: Arc<DashMap<LibraryKey, Slot>>,
}

impl std::fmt::Debug for LibraryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryIndex")
            .field("root", &self.root)
            .field("template", &self.template)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl LibraryIndex {
    /// Creates an empty index rooted at `root` without touching the disk.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            template: DEFAULT_TEMPLATE.to_string(),
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Creates the library directory if needed and seeds the index from the
    /// files already in it, assuming the default file name template.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created or listed.
    pub async fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        Self::open_with_template(root, DEFAULT_TEMPLATE).await
    }

    /// Like [`LibraryIndex::open`], for a library whose files were named
    /// with `template`.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the directory cannot be created or listed.
    pub async fn open_with_template(
        root: impl Into<PathBuf>,
        template: &str,
    ) -> std::io::Result<Self> {
        let index = Self {
            template: template.to_string(),
            ..Self::new(root)
        };
        tokio::fs::create_dir_all(&index.root).await?;
        index.scan().await?;
        Ok(index)
    }

    /// Library root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of keys currently present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.value(), Slot::Present(_)))
            .count()
    }

    /// Returns true when no key is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds the index with files in the root whose names parse with the
    /// index's template.
    ///
    /// Returns how many entries were added. Files that do not follow the
    /// template are ignored, so renaming the template leaves older files
    /// unindexed.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the root cannot be listed.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn scan(&self) -> std::io::Result<usize> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut added = 0;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some((artists, title)) = file_name
                .to_str()
                .and_then(|name| parse_library_file_name(&self.template, name))
            else {
                continue;
            };
            if self.record(LibraryKey::new(&artists, &title, None), entry.path()) {
                added += 1;
            }
        }
        info!(added, "Library index seeded");
        Ok(added)
    }

    /// Returns the library path for `key` if it is present.
    #[must_use]
    pub fn lookup(&self, key: &LibraryKey) -> Option<PathBuf> {
        self.entries.get(key).and_then(|slot| match slot.value() {
            Slot::Present(path) => Some(path.clone()),
            Slot::InFlight(_) => None,
        })
    }

    /// Atomically claims `key` for fetching.
    ///
    /// Returns [`Claim::AlreadyPresent`] if the content exists. Otherwise the
    /// first caller receives a [`ClaimTicket`]; concurrent callers wait
    /// until that ticket resolves and then re-check, so at most one fetch
    /// per key is ever in flight.
    pub async fn claim(&self, key: &LibraryKey) -> Claim {
        loop {
            let mut in_flight = match self.entries.entry(key.clone()) {
                Entry::Occupied(occupied) => match occupied.get() {
                    Slot::Present(path) => return Claim::AlreadyPresent(path.clone()),
                    Slot::InFlight(rx) => rx.clone(),
                },
                Entry::Vacant(vacant) => {
                    let (tx, rx) = watch::channel(());
                    vacant.insert(Slot::InFlight(rx));
                    debug!(%key, "Claimed for fetch");
                    return Claim::Claimed(ClaimTicket {
                        key: key.clone(),
                        entries: Arc::clone(&self.entries),
                        waiters: Some(tx),
                    });
                }
            };
            debug!(%key, "Waiting for in-flight fetch");
            // Resolves with Err once the ticket's sender is dropped.
            let _ = in_flight.changed().await;
        }
    }

    /// Records an existing library file for `key`, replacing nothing that is
    /// already present or in flight.
    pub fn record(&self, key: LibraryKey, path: PathBuf) -> bool {
        match self.entries.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Present(path));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Moves a freshly fetched file into the library root under `file_name`,
    /// picking a unique name if it is taken.
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`] if the file cannot be placed.
    pub async fn import(&self, staged: &Path, file_name: &str) -> Result<PathBuf, FetchError> {
        let root = self.root.clone();
        let staged = staged.to_path_buf();
        let file_name = file_name.to_string();
        run_blocking(&self.root, move || {
            std::fs::create_dir_all(&root).map_err(|e| FetchError::io(&root, e))?;
            let dest = resolve_unique_path(&root, &file_name);
            move_file(&staged, &dest)?;
            Ok(dest)
        })
        .await
    }

    /// Links the library file for `key` into `dest_dir`.
    ///
    /// Repeated calls for the same key and directory return the same path
    /// without creating another file.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::LinkFailure`] if the key is not present or every
    /// link strategy failed.
    #[instrument(skip(self), fields(key = %key, dest = %dest_dir.display()))]
    pub async fn link_into(&self, key: &LibraryKey, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let Some(source) = self.lookup(key) else {
            return Err(FetchError::io(
                dest_dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{key} is not in the library"),
                ),
            ));
        };
        let file_name = source
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .ok_or_else(|| {
                FetchError::io(&source, std::io::Error::other("library path has no file name"))
            })?;
        let dir = dest_dir.to_path_buf();
        run_blocking(dest_dir, move || {
            std::fs::create_dir_all(&dir).map_err(|e| FetchError::io(&dir, e))?;
            link_file(&source, &dir.join(file_name)).map(|linked| linked.path)
        })
        .await
    }

    /// Path of `path` relative to the library root, for manifests and
    /// snapshots.
    #[must_use]
    pub fn relative_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.file_name().map_or_else(|| path.to_path_buf(), PathBuf::from))
    }
}

async fn run_blocking<T, F>(context: &Path, f: F) -> Result<T, FetchError>
where
    F: FnOnce() -> Result<T, FetchError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_error) => {
            warn!(error = %join_error, "Library file operation aborted");
            Err(FetchError::io(context, std::io::Error::other(join_error.to_string())))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn key(title: &str) -> LibraryKey {
        LibraryKey::new("Artist", title, None)
    }

    #[tokio::test]
    async fn test_claim_then_complete_makes_key_present() {
        let temp = TempDir::new().unwrap();
        let index = LibraryIndex::new(temp.path());
        let path = temp.path().join("Artist - Song.mp3");

        let Claim::Claimed(ticket) = index.claim(&key("Song")).await else {
            panic!("expected a fresh claim");
        };
        assert_eq!(index.lookup(&key("Song")), None);
        ticket.complete(path.clone());

        assert_eq!(index.lookup(&key("Song")), Some(path.clone()));
        assert!(matches!(index.claim(&key("Song")).await, Claim::AlreadyPresent(p) if p == path));
    }

    #[tokio::test]
    async fn test_failed_claim_can_be_claimed_again() {
        let index = LibraryIndex::new("/unused");
        let Claim::Claimed(ticket) = index.claim(&key("Song")).await else {
            panic!("expected a fresh claim");
        };
        ticket.fail();
        assert!(matches!(index.claim(&key("Song")).await, Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn test_dropped_ticket_releases_claim() {
        let index = LibraryIndex::new("/unused");
        let claim = index.claim(&key("Song")).await;
        drop(claim);
        assert!(matches!(index.claim(&key("Song")).await, Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn test_concurrent_claimer_waits_for_completion() {
        let index = LibraryIndex::new("/library");
        let Claim::Claimed(ticket) = index.claim(&key("Song")).await else {
            panic!("expected a fresh claim");
        };

        let waiter = {
            let index = index.clone();
            tokio::spawn(async move { index.claim(&key("Song")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second claimer must wait");

        ticket.complete(PathBuf::from("/library/Artist - Song.mp3"));
        let outcome = waiter.await.unwrap();
        assert!(matches!(outcome, Claim::AlreadyPresent(_)));
    }

    #[tokio::test]
    async fn test_waiter_takes_over_after_failure() {
        let index = LibraryIndex::new("/library");
        let Claim::Claimed(ticket) = index.claim(&key("Song")).await else {
            panic!("expected a fresh claim");
        };
        let waiter = {
            let index = index.clone();
            tokio::spawn(async move { index.claim(&key("Song")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ticket.fail();
        assert!(matches!(waiter.await.unwrap(), Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn test_open_seeds_from_existing_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("Daft Punk - One More Time.mp3"), b"x").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(temp.path().join("A - Dir")).unwrap();

        let index = LibraryIndex::open(temp.path()).await.unwrap();
        assert_eq!(index.len(), 1);
        let found = index.lookup(&LibraryKey::new("daft punk", "one more time", None));
        assert_eq!(found, Some(temp.path().join("Daft Punk - One More Time.mp3")));
    }

    #[tokio::test]
    async fn test_import_and_link_into() {
        let temp = TempDir::new().unwrap();
        let index = LibraryIndex::open(temp.path().join("library")).await.unwrap();
        let staged = temp.path().join("staged.mp3");
        std::fs::write(&staged, b"audio").unwrap();

        let placed = index.import(&staged, "Artist - Song.mp3").await.unwrap();
        assert_eq!(index.relative_path(&placed), PathBuf::from("Artist - Song.mp3"));
        assert!(index.record(key("Song"), placed.clone()));

        let playlist = temp.path().join("playlists").join("Mix");
        let first = index.link_into(&key("Song"), &playlist).await.unwrap();
        let second = index.link_into(&key("Song"), &playlist).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(&playlist).unwrap().count(), 1);
        assert_eq!(std::fs::read(&first).unwrap(), b"audio");
    }

    #[tokio::test]
    async fn test_link_into_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        let index = LibraryIndex::new(temp.path());
        let err = index.link_into(&key("Nope"), temp.path()).await.unwrap_err();
        assert_eq!(err.kind(), crate::download::ErrorKind::LinkFailure);
    }
}
