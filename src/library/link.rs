//! Placing library files and fanning them out into playlist folders.
//!
//! Linking tries an ordered list of strategies (hardlink, symlink, copy) and
//! stops at the first that produces a usable file. Only when every strategy
//! fails does the caller see an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::download::FetchError;

/// One way of making a library file visible at another path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStrategy {
    /// Second directory entry for the same inode.
    HardLink,
    /// Symbolic link to the absolute library path.
    SymLink,
    /// Full byte copy.
    Copy,
}

impl LinkStrategy {
    /// Strategies in the order they are attempted.
    pub const ORDER: [Self; 3] = [Self::HardLink, Self::SymLink, Self::Copy];

    fn apply(self, source: &Path, dest: &Path) -> io::Result<()> {
        match self {
            Self::HardLink => fs::hard_link(source, dest),
            Self::SymLink => symlink_file(&std::path::absolute(source)?, dest),
            Self::Copy => fs::copy(source, dest).map(|_| ()).inspect_err(|_| {
                let _ = fs::remove_file(dest);
            }),
        }
    }
}

impl std::fmt::Display for LinkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::HardLink => "hardlink",
            Self::SymLink => "symlink",
            Self::Copy => "copy",
        })
    }
}

/// Result of a successful [`link_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linked {
    /// Path of the usable file at the destination.
    pub path: PathBuf,
    /// Strategy that produced it, `None` when the destination already existed.
    pub strategy: Option<LinkStrategy>,
}

/// Makes `source` available at `dest`.
///
/// An existing destination is left untouched and returned, so repeated calls
/// never duplicate the physical file. A dangling symlink at `dest` is
/// replaced.
///
/// # Errors
///
/// Returns [`FetchError::LinkFailure`] (or [`FetchError::Permission`]) with
/// the last strategy's error when no strategy succeeded.
pub fn link_file(source: &Path, dest: &Path) -> Result<Linked, FetchError> {
    if !source.is_file() {
        return Err(FetchError::io(
            source,
            io::Error::new(io::ErrorKind::NotFound, "library file is missing"),
        ));
    }
    if dest.exists() {
        return Ok(Linked {
            path: dest.to_path_buf(),
            strategy: None,
        });
    }
    if dest.is_symlink() {
        fs::remove_file(dest).map_err(|e| FetchError::io(dest, e))?;
    }

    let mut last_error = None;
    for strategy in LinkStrategy::ORDER {
        match strategy.apply(source, dest) {
            Ok(()) => {
                if strategy != LinkStrategy::HardLink {
                    warn!(
                        source = %source.display(),
                        dest = %dest.display(),
                        %strategy,
                        "Link degraded to fallback strategy"
                    );
                } else {
                    debug!(dest = %dest.display(), "Hardlinked");
                }
                return Ok(Linked {
                    path: dest.to_path_buf(),
                    strategy: Some(strategy),
                });
            }
            // Another caller linked the same destination first.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dest.exists() => {
                return Ok(Linked {
                    path: dest.to_path_buf(),
                    strategy: None,
                });
            }
            Err(e) => {
                debug!(%strategy, error = %e, "Link strategy failed");
                last_error = Some(e);
            }
        }
    }

    let source_error = last_error.unwrap_or_else(|| io::Error::other("no link strategy available"));
    Err(FetchError::io(dest, source_error))
}

/// Moves a staged file to `dest`, copying when a rename crosses filesystems.
///
/// # Errors
///
/// Returns a classified [`FetchError`] when neither rename nor copy works.
pub fn move_file(staged: &Path, dest: &Path) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FetchError::io(parent, e))?;
    }
    match fs::rename(staged, dest) {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            debug!(error = %rename_error, "Rename failed, copying instead");
            fs::copy(staged, dest).map_err(|e| {
                let _ = fs::remove_file(dest);
                FetchError::io(dest, e)
            })?;
            let _ = fs::remove_file(staged);
            Ok(())
        }
    }
}

#[cfg(unix)]
fn symlink_file(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(windows)]
fn symlink_file(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(source, dest)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symlinks unsupported"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_link_file_hardlinks_on_same_filesystem() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.mp3");
        fs::write(&source, b"audio").unwrap();
        let dest = temp.path().join("playlist").join("a.mp3");
        fs::create_dir_all(dest.parent().unwrap()).unwrap();

        let linked = link_file(&source, &dest).unwrap();
        assert_eq!(linked.path, dest);
        assert_eq!(linked.strategy, Some(LinkStrategy::HardLink));
        assert_eq!(fs::read(&dest).unwrap(), b"audio");
    }

    #[test]
    fn test_link_file_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.mp3");
        fs::write(&source, b"audio").unwrap();
        let dest = temp.path().join("b.mp3");

        let first = link_file(&source, &dest).unwrap();
        let second = link_file(&source, &dest).unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(second.strategy, None);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_link_file_replaces_dangling_symlink() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("a.mp3");
        fs::write(&source, b"audio").unwrap();
        let dest = temp.path().join("b.mp3");
        std::os::unix::fs::symlink(temp.path().join("gone.mp3"), &dest).unwrap();

        let linked = link_file(&source, &dest).unwrap();
        assert!(linked.strategy.is_some());
        assert_eq!(fs::read(&dest).unwrap(), b"audio");
    }

    #[test]
    fn test_link_file_missing_source_fails_after_all_strategies() {
        let temp = TempDir::new().unwrap();
        let err = link_file(&temp.path().join("missing.mp3"), &temp.path().join("x.mp3"))
            .unwrap_err();
        assert!(err.to_string().starts_with("[LINK]"), "{err}");
    }

    #[test]
    fn test_move_file_creates_parent_and_removes_staged() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("staged.mp3");
        fs::write(&staged, b"audio").unwrap();
        let dest = temp.path().join("library").join("A - B.mp3");

        move_file(&staged, &dest).unwrap();
        assert!(!staged.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"audio");
    }
}
