//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use playlist_core::Config;

/// Download playlists into a shared, deduplicated music library.
///
/// Each URL or CSV becomes one job. Tracks already in the library are
/// linked instead of fetched again; every job gets its own folder with a
/// `playlist.m3u`.
#[derive(Parser, Debug)]
#[command(name = "playlist-downloader")]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Playlist, album or track URLs (Spotify, YouTube, anything yt-dlp lists)
    pub urls: Vec<String>,

    /// Exportify CSV file (repeatable)
    #[arg(long = "csv", value_name = "FILE")]
    pub csv: Vec<PathBuf>,

    /// Take at most this many tracks from each source
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Config file (default: $XDG_CONFIG_HOME/playlist-downloader/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Parallel track fetches (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Fetch starts allowed per rate window (0 to disable)
    #[arg(long)]
    pub rate_limit: Option<usize>,

    /// Rate window length in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub rate_window_secs: Option<u64>,

    /// Hard time limit per track in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: Option<u64>,

    /// Attempts per track for network errors and timeouts (1-10)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_attempts: Option<u32>,

    /// Audio format (mp3, m4a, opus, flac, ... or "best" to keep the source)
    #[arg(long)]
    pub format: Option<String>,

    /// Audio quality passed to the converter
    #[arg(long)]
    pub quality: Option<String>,

    /// Output root holding the library and playlist folders
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Leave the album out of search queries
    #[arg(long)]
    pub no_album: bool,

    /// List the tracks and search queries without downloading
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the effective configuration as TOML
    Config,
}

impl Args {
    /// Applies flag overrides on top of the file config.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = usize::from(concurrency);
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(secs) = self.rate_window_secs {
            config.rate_limit_window_secs = secs;
        }
        if let Some(secs) = self.timeout_secs {
            config.track_timeout_secs = secs;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts;
        }
        if let Some(format) = &self.format {
            config.audio_format.clone_from(format);
        }
        if let Some(quality) = &self.quality {
            config.audio_quality.clone_from(quality);
        }
        if self.no_album {
            config.include_album = false;
        }
    }

    /// Track limit per source.
    pub fn track_limit(&self) -> Option<usize> {
        self.limit.and_then(|l| usize::try_from(l).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["playlist-downloader"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.urls.is_empty());
        assert!(args.command.is_none());
        assert_eq!(args.concurrency, None);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["playlist-downloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_urls_and_csv() {
        let args = Args::try_parse_from([
            "playlist-downloader",
            "https://open.spotify.com/playlist/x",
            "--csv",
            "a.csv",
            "--csv",
            "b.csv",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(args.urls, vec!["https://open.spotify.com/playlist/x"]);
        assert_eq!(args.csv, vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")]);
        assert_eq!(args.track_limit(), Some(5));
    }

    #[test]
    fn test_cli_config_subcommand() {
        let args = Args::try_parse_from(["playlist-downloader", "config"]).unwrap();
        assert_eq!(args.command, Some(Command::Config));
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Args::try_parse_from(["playlist-downloader", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let err = Args::try_parse_from(["playlist-downloader", "-c", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_attempts_zero_rejected() {
        let err = Args::try_parse_from(["playlist-downloader", "--max-attempts", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["playlist-downloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_apply_overrides_config() {
        let args = Args::try_parse_from([
            "playlist-downloader",
            "-c",
            "8",
            "--rate-limit",
            "30",
            "--timeout-secs",
            "60",
            "--format",
            "best",
            "--no-album",
            "-o",
            "/music",
        ])
        .unwrap();
        let mut config = Config::default();
        args.apply_to(&mut config);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.rate_limit, 30);
        assert_eq!(config.track_timeout_secs, 60);
        assert_eq!(config.audio_format, "best");
        assert!(!config.include_album);
        assert_eq!(config.output_dir, PathBuf::from("/music"));
        assert_eq!(config.max_attempts, 2);
    }
}
