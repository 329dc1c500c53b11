//! File naming for library entries and playlist folders.
//!
//! Library files are named from a template such as
//! `{artists} - {title}.{ext}`; every rendered component is sanitized so a
//! track title can never escape the library directory.

use std::path::{Component, Path, PathBuf};

/// Default library file name template.
pub const DEFAULT_TEMPLATE: &str = "{artists} - {title}.{ext}";

/// Renders the library file name for a track.
///
/// Supported placeholders: `{artists}`, `{artist}` (first listed artist),
/// `{title}`, `{album}`, `{ext}`. Unknown placeholders are left untouched.
#[must_use]
pub fn render_file_name(
    template: &str,
    artists: &str,
    title: &str,
    album: Option<&str>,
    ext: &str,
) -> String {
    let primary = artists.split(',').next().map_or("", str::trim);
    let rendered = template
        .replace("{artists}", artists.trim())
        .replace("{artist}", primary)
        .replace("{title}", title.trim())
        .replace("{album}", album.unwrap_or("").trim())
        .replace("{ext}", ext.trim_start_matches('.'));
    sanitize_filename(&rendered)
}

/// Sanitizes a file or directory name for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a file path in `dir` that does not exist yet.
///
/// `file.mp3`, then `file_1.mp3`, `file_2.mp3`, ...
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = sanitize_filename(filename);
    let base_path = dir.join(&filename);

    if !base_path.exists() && !base_path.is_symlink() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() && !candidate.is_symlink() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

/// Splits a library file name back into `(artists, title)` using the
/// template it was rendered with.
///
/// Each placeholder matches up to the first occurrence of the literal text
/// that follows it. Returns `None` when the name does not fit the template,
/// or when the template has no artist or no title placeholder.
#[must_use]
pub fn parse_library_file_name(template: &str, file_name: &str) -> Option<(String, String)> {
    let (pattern, stem) = match template.strip_suffix("{ext}") {
        Some(head) => {
            let stem = match file_name.rfind('.') {
                Some(pos) if pos > 0 => &file_name[..pos],
                _ => file_name,
            };
            (head.strip_suffix('.').unwrap_or(head), stem)
        }
        None => (template, file_name),
    };

    let mut fields: Vec<(&str, &str)> = Vec::new();
    let mut pending: Option<&str> = None;
    let mut rest = stem;
    for piece in template_pieces(pattern) {
        match piece {
            Piece::Field(name) => {
                // Two adjacent placeholders have no boundary to split on.
                if pending.replace(name).is_some() {
                    return None;
                }
            }
            Piece::Literal(literal) => match pending.take() {
                Some(name) => {
                    let pos = rest.find(literal)?;
                    fields.push((name, &rest[..pos]));
                    rest = &rest[pos + literal.len()..];
                }
                None => rest = rest.strip_prefix(literal)?,
            },
        }
    }
    match pending {
        Some(name) => fields.push((name, rest)),
        None if !rest.is_empty() => return None,
        None => {}
    }

    let field = |wanted: &[&str]| {
        fields
            .iter()
            .find(|(name, _)| wanted.contains(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    };
    let artists = field(&["artists", "artist"])?;
    let title = field(&["title"])?;
    Some((artists.to_string(), title.to_string()))
}

enum Piece<'a> {
    Literal(&'a str),
    Field(&'a str),
}

const FIELDS: [&str; 5] = ["artists", "artist", "title", "album", "ext"];

fn template_pieces(pattern: &str) -> Vec<Piece<'_>> {
    let mut pieces = Vec::new();
    let mut literal_start = 0;
    let mut cursor = 0;
    while let Some(open) = pattern[cursor..].find('{').map(|i| cursor + i) {
        let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
            break;
        };
        let name = &pattern[open + 1..close];
        if FIELDS.contains(&name) {
            if open > literal_start {
                pieces.push(Piece::Literal(&pattern[literal_start..open]));
            }
            pieces.push(Piece::Field(name));
            literal_start = close + 1;
        }
        cursor = close + 1;
    }
    if literal_start < pattern.len() {
        pieces.push(Piece::Literal(&pattern[literal_start..]));
    }
    pieces
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_file_name_default_template() {
        let name = render_file_name(DEFAULT_TEMPLATE, "Daft Punk", "One More Time", None, "mp3");
        assert_eq!(name, "Daft Punk - One More Time.mp3");
    }

    #[test]
    fn test_render_file_name_strips_path_separators() {
        let name = render_file_name(DEFAULT_TEMPLATE, "AC/DC", "T.N.T.", None, ".mp3");
        assert_eq!(name, "AC_DC - T.N.T..mp3");
    }

    #[test]
    fn test_render_file_name_primary_artist_and_album() {
        let name = render_file_name(
            "{artist} - {album} - {title}.{ext}",
            "Simon, Garfunkel",
            "America",
            Some("Bookends"),
            "opus",
        );
        assert_eq!(name, "Simon - Bookends - America.opus");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename(""), "_");
    }

    #[test]
    fn test_resolve_unique_path_with_conflict() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a - b.mp3"), b"1").unwrap();
        std::fs::write(temp_dir.path().join("a - b_1.mp3"), b"2").unwrap();

        let path = resolve_unique_path(temp_dir.path(), "a - b.mp3");
        assert_eq!(path, temp_dir.path().join("a - b_2.mp3"));
    }

    #[test]
    fn test_resolve_unique_path_stays_under_dir() {
        let temp_dir = TempDir::new().unwrap();
        for malicious in ["../../etc/passwd", "..", "a/\\b"] {
            let path = resolve_unique_path(temp_dir.path(), malicious);
            assert!(path.starts_with(temp_dir.path()));
            assert!(!path.components().any(|c| c == Component::ParentDir));
        }
    }

    #[test]
    fn test_parse_library_file_name_default_template() {
        assert_eq!(
            parse_library_file_name(DEFAULT_TEMPLATE, "Daft Punk - One More Time.mp3"),
            Some(("Daft Punk".to_string(), "One More Time".to_string()))
        );
        assert_eq!(
            parse_library_file_name(DEFAULT_TEMPLATE, "A - B - C.mp3"),
            Some(("A".to_string(), "B - C".to_string()))
        );
        assert_eq!(parse_library_file_name(DEFAULT_TEMPLATE, "untitled.mp3"), None);
        assert_eq!(parse_library_file_name(DEFAULT_TEMPLATE, " - x.mp3"), None);
    }

    #[test]
    fn test_parse_library_file_name_custom_template() {
        let template = "{album} - {title} ({artist}).{ext}";
        let name = render_file_name(template, "Simon, Garfunkel", "America", Some("Bookends"), "opus");
        assert_eq!(name, "Bookends - America (Simon).opus");
        assert_eq!(
            parse_library_file_name(template, &name),
            Some(("Simon".to_string(), "America".to_string()))
        );
        assert_eq!(parse_library_file_name(template, "Bookends - America.opus"), None);
    }

    #[test]
    fn test_parse_library_file_name_needs_artist_and_title() {
        assert_eq!(parse_library_file_name("{title}.{ext}", "America.mp3"), None);
        assert_eq!(parse_library_file_name("{artist}{title}.{ext}", "SimonAmerica.mp3"), None);
    }
}
