//! Configuration file loading and validation.
//!
//! The file is TOML. Every key is optional; missing keys take the defaults
//! below, unknown keys are rejected. Command-line flags are applied on top
//! by the binary.
//!
//! Default location:
//! 1. `$XDG_CONFIG_HOME/playlist-downloader/config.toml`
//! 2. `$HOME/.config/playlist-downloader/config.toml`

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_EVENT_BUFFER, DEFAULT_MAX_ATTEMPTS, DEFAULT_RATE_WINDOW,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_TRACK_TIMEOUT, EngineSettings, MAX_CONCURRENCY,
    MIN_CONCURRENCY, RetryPolicy,
};
use crate::library::DEFAULT_TEMPLATE;
use crate::resolver::{
    DEFAULT_AUDIO_FORMAT, DEFAULT_AUDIO_QUALITY, SearchProvider, YtDlpResolver,
};
use crate::source::SourceOptions;

const APP_DIR: &str = "playlist-downloader";
const CONFIG_FILE: &str = "config.toml";

/// Errors from reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its allowed range.
    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Key name.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Allowed values.
        expected: &'static str,
    },
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of all output.
    pub output_dir: PathBuf,
    /// Shared library directory under `output_dir`.
    pub library_dir_name: String,
    /// Playlist folders directory under `output_dir`.
    pub playlists_dir_name: String,
    /// Library file naming template.
    pub output_template: String,
    /// Worker count, 1..=100.
    pub concurrency: usize,
    /// Admissions per window, 0 for unbounded.
    pub rate_limit: usize,
    /// Rolling window length.
    pub rate_limit_window_secs: u64,
    /// Hard wall-clock bound per track.
    pub track_timeout_secs: u64,
    /// Attempts per track including the first.
    pub max_attempts: u32,
    /// Audio format hint, `best` keeps the source format.
    pub audio_format: String,
    /// Audio quality hint.
    pub audio_quality: String,
    /// Search providers in fallback order.
    pub search_providers: Vec<SearchProvider>,
    /// Include the album in search queries.
    pub include_album: bool,
    /// yt-dlp executable.
    pub ytdlp_path: PathBuf,
    /// spotdl executable.
    pub spotdl_path: PathBuf,
    /// Spotify client id forwarded to spotdl.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify_client_id: Option<String>,
    /// Spotify client secret forwarded to spotdl.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spotify_client_secret: Option<String>,
    /// Per-subscriber snapshot buffer.
    pub event_buffer: usize,
    /// Grace period for in-flight fetches at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            library_dir_name: "library".to_string(),
            playlists_dir_name: "playlists".to_string(),
            output_template: DEFAULT_TEMPLATE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            rate_limit: 0,
            rate_limit_window_secs: DEFAULT_RATE_WINDOW.as_secs(),
            track_timeout_secs: DEFAULT_TRACK_TIMEOUT.as_secs(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            audio_format: DEFAULT_AUDIO_FORMAT.to_string(),
            audio_quality: DEFAULT_AUDIO_QUALITY.to_string(),
            search_providers: vec![SearchProvider::YoutubeMusic, SearchProvider::Youtube],
            include_album: true,
            ytdlp_path: PathBuf::from("yt-dlp"),
            spotdl_path: PathBuf::from("spotdl"),
            spotify_client_id: None,
            spotify_client_secret: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

/// Config plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Path that was consulted, if one could be resolved.
    pub path: Option<PathBuf>,
    /// Parsed and validated values, defaults when nothing was loaded.
    pub config: Config,
    /// True when `path` existed and was read.
    pub loaded_from_file: bool,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/playlist-downloader/config.toml`
/// 2. `$HOME/.config/playlist-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join(CONFIG_FILE));
    }
    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

impl Config {
    /// Loads `explicit` or the default path.
    ///
    /// A missing default file means defaults. A missing explicit file is an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
        let (path, required) = match explicit {
            Some(path) => (Some(path.to_path_buf()), true),
            None => (resolve_default_config_path(), false),
        };
        let Some(path_ref) = path.as_deref() else {
            return Ok(LoadedConfig {
                path,
                config: Self::default(),
                loaded_from_file: false,
            });
        };
        if !required && !path_ref.exists() {
            debug!(path = %path_ref.display(), "No config file, using defaults");
            return Ok(LoadedConfig {
                path,
                config: Self::default(),
                loaded_from_file: false,
            });
        }

        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw, path_ref)?;
        debug!(path = %path_ref.display(), "Loaded config file");
        Ok(LoadedConfig {
            path,
            config,
            loaded_from_file: true,
        })
    }

    /// Parses and validates TOML text; `origin` is used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn parse(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(invalid("concurrency", self.concurrency, "range: 1..=100"));
        }
        if !(1..=86_400).contains(&self.rate_limit_window_secs) {
            return Err(invalid(
                "rate_limit_window_secs",
                self.rate_limit_window_secs,
                "range: 1..=86400",
            ));
        }
        if !(1..=3600).contains(&self.track_timeout_secs) {
            return Err(invalid(
                "track_timeout_secs",
                self.track_timeout_secs,
                "range: 1..=3600",
            ));
        }
        if !(1..=10).contains(&self.max_attempts) {
            return Err(invalid("max_attempts", self.max_attempts, "range: 1..=10"));
        }
        if self.event_buffer == 0 {
            return Err(invalid("event_buffer", self.event_buffer, "a positive number"));
        }
        if self.shutdown_grace_secs > 600 {
            return Err(invalid(
                "shutdown_grace_secs",
                self.shutdown_grace_secs,
                "range: 0..=600",
            ));
        }
        if !self.output_template.contains("{ext}") {
            return Err(invalid(
                "output_template",
                &self.output_template,
                "a template containing {ext}",
            ));
        }
        for (field, name) in [
            ("library_dir_name", &self.library_dir_name),
            ("playlists_dir_name", &self.playlists_dir_name),
        ] {
            if name.trim().is_empty() || name.contains(['/', '\\']) || name == ".." {
                return Err(invalid(field, name, "a plain directory name"));
            }
        }
        if self.library_dir_name == self.playlists_dir_name {
            return Err(invalid(
                "playlists_dir_name",
                &self.playlists_dir_name,
                "a name different from library_dir_name",
            ));
        }
        if self.audio_format.trim().is_empty() {
            return Err(invalid("audio_format", &self.audio_format, "a format such as mp3 or best"));
        }
        Ok(())
    }

    /// Shared library directory.
    #[must_use]
    pub fn library_root(&self) -> PathBuf {
        self.output_dir.join(&self.library_dir_name)
    }

    /// Parent of the per-job playlist folders.
    #[must_use]
    pub fn playlists_root(&self) -> PathBuf {
        self.output_dir.join(&self.playlists_dir_name)
    }

    /// Grace period for in-flight fetches at shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Engine settings derived from this config.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            concurrency: self.concurrency,
            track_timeout: Duration::from_secs(self.track_timeout_secs),
            retry_policy: RetryPolicy::with_max_attempts(self.max_attempts),
            rate_limit: self.rate_limit,
            rate_window: Duration::from_secs(self.rate_limit_window_secs),
            library_root: self.library_root(),
            playlists_root: self.playlists_root(),
            template: self.output_template.clone(),
            format: self.audio_format.clone(),
            quality: self.audio_quality.clone(),
            event_buffer: self.event_buffer,
        }
    }

    /// Options for the default source registry.
    #[must_use]
    pub fn source_options(&self) -> SourceOptions {
        SourceOptions {
            spotdl_path: self.spotdl_path.clone(),
            ytdlp_path: self.ytdlp_path.clone(),
            spotify_client_id: self.spotify_client_id.clone(),
            spotify_client_secret: self.spotify_client_secret.clone(),
            staging_root: self.engine_settings().staging_root(),
        }
    }

    /// The yt-dlp track resolver configured by this file.
    #[must_use]
    pub fn resolver(&self) -> YtDlpResolver {
        YtDlpResolver::new(
            self.ytdlp_path.clone(),
            self.search_providers.clone(),
            self.include_album,
            self.engine_settings().staging_root(),
        )
    }

    /// TOML rendering with the client secret masked.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_redacted_toml(&self) -> Result<String, toml::ser::Error> {
        let mut shown = self.clone();
        if shown.spotify_client_secret.is_some() {
            shown.spotify_client_secret = Some("***".to_string());
        }
        toml::to_string_pretty(&shown)
    }
}

fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        expected,
    }
}
