//! M3U playlist manifest.

use std::io::Write;
use std::path::{Component, Path, PathBuf};

use super::{Job, TrackStatus};

/// File name of the manifest inside a playlist folder.
pub const MANIFEST_FILE_NAME: &str = "playlist.m3u";

/// Renders one line per done track, in source order, using `/` separators.
#[must_use]
pub fn render_manifest(job: &Job) -> String {
    let mut out = String::new();
    for track in &job.tracks {
        if track.status != TrackStatus::Done {
            continue;
        }
        let Some(path) = track.path.as_deref() else {
            continue;
        };
        out.push_str(&portable(path));
        out.push('\n');
    }
    out
}

/// Writes the manifest for `job` into `dir`, replacing any previous one.
///
/// The file is written to a temporary sibling first and renamed into place.
///
/// # Errors
///
/// Returns an IO error if the directory or file cannot be written.
pub fn write_manifest(dir: &Path, job: &Job) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(MANIFEST_FILE_NAME);
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(render_manifest(job).as_bytes())?;
    staged.flush()?;
    staged.persist(&target).map_err(|e| e.error)?;
    Ok(target)
}

fn portable(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
