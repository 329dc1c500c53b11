//! Library entry keys.

use std::fmt;

/// Stable identity of one piece of content in the shared library.
///
/// Built from a normalized `artist|title` pair so that case, punctuation
/// and whitespace differences between sources map to the same entry. The
/// provider id is only used when neither artist nor title carry any
/// alphanumeric characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LibraryKey(String);

impl LibraryKey {
    /// Builds a key from track metadata.
    #[must_use]
    pub fn new(artist: &str, title: &str, provider_id: Option<&str>) -> Self {
        let artist = normalize(primary_artist(artist));
        let title = normalize(title);
        if artist.is_empty() && title.is_empty() {
            if let Some(id) = provider_id.map(str::trim).filter(|id| !id.is_empty()) {
                return Self(format!("id:{id}"));
            }
        }
        Self(format!("{artist}|{title}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LibraryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Sources disagree on featured artists ("A, B" vs "A"), so only the first
// listed artist participates in the key.
fn primary_artist(artists: &str) -> &str {
    artists.split([',', ';']).next().unwrap_or(artists)
}

fn normalize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}
