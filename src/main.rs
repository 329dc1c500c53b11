//! CLI entry point for the playlist downloader.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::future::join_all;
use playlist_core::resolver::FetchRequest;
use playlist_core::source::SourceRegistry;
use playlist_core::{
    Config, DownloadEngine, JobSnapshot, JobSource, JobStatus, SubmitRequest, TrackStatus,
    YtDlpResolver, build_default_source_registry,
};
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::{Args, Command};

/// Process outcome mapped to the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    /// Every track was placed.
    Success,
    /// Some tracks were placed, some were not.
    Partial,
    /// Nothing was placed.
    Failure,
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        match exit {
            ProcessExit::Success => ExitCode::SUCCESS,
            ProcessExit::Partial => ExitCode::from(2),
            ProcessExit::Failure => ExitCode::from(1),
        }
    }
}

/// Maps placed and failed track counts to the process exit outcome.
fn determine_exit_outcome(completed: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ProcessExit> {
    let loaded = Config::load(args.config.as_deref())?;
    let mut config = loaded.config;
    args.apply_to(&mut config);
    config.validate().context("Invalid option")?;

    if args.command == Some(Command::Config) {
        if let Some(path) = &loaded.path {
            let origin = if loaded.loaded_from_file { "loaded" } else { "not found" };
            println!("# config file: {} ({origin})", path.display());
        }
        print!("{}", config.to_redacted_toml().context("Failed to render config")?);
        return Ok(ProcessExit::Success);
    }

    let sources: Vec<JobSource> = args
        .urls
        .iter()
        .map(|url| JobSource::Url(url.clone()))
        .chain(args.csv.iter().map(|path| JobSource::Csv(path.clone())))
        .collect();
    if sources.is_empty() {
        info!("No input provided. Pass playlist URLs or --csv <FILE>.");
        info!("Example: playlist-downloader https://open.spotify.com/playlist/...");
        return Ok(ProcessExit::Success);
    }

    let registry = build_default_source_registry(&config.source_options());
    let resolver = config.resolver();

    if args.dry_run {
        return run_dry_run(&sources, &registry, &resolver, &config, args.track_limit()).await;
    }

    info!(
        jobs = sources.len(),
        output = %config.output_dir.display(),
        "Playlist downloader starting"
    );
    let engine = DownloadEngine::start(config.engine_settings(), Arc::new(resolver), registry)
        .await
        .context("Failed to start download engine")?;

    let multi = progress::multi_progress(!args.quiet && io::stderr().is_terminal());
    let mut followers = Vec::new();
    for source in sources {
        let request = SubmitRequest::new(source).with_limit(args.track_limit());
        let job = engine.submit(request).await?;
        followers.push(progress::follow_job(&multi, engine.subscribe(job.id)?));
    }

    let finished = tokio::select! {
        results = join_all(followers) => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling jobs");
            for job in engine.list() {
                if !job.is_terminal() {
                    let _ = engine.cancel(job.id);
                }
            }
            engine.shutdown(config.shutdown_grace()).await;
            let jobs = engine.list();
            return Ok(report(&jobs));
        }
    };
    engine.shutdown(config.shutdown_grace()).await;

    let jobs: Vec<JobSnapshot> = finished
        .into_iter()
        .filter_map(|joined| joined.ok().flatten())
        .collect();
    Ok(report(&jobs))
}

fn report(jobs: &[JobSnapshot]) -> ProcessExit {
    let mut placed = 0;
    let mut failed = 0;
    for job in jobs {
        let done = job.count(TrackStatus::Done);
        let not_done = job.tracks.len() - done;
        placed += done;
        failed += not_done;
        if job.status == JobStatus::Failed && job.tracks.is_empty() {
            failed += 1;
        }
        println!(
            "{}: {} ({done}/{} tracks){}",
            job.display_name,
            job.status,
            job.tracks.len(),
            job.manifest
                .as_ref()
                .map(|m| format!(" -> {}", m.display()))
                .unwrap_or_default()
        );
        if job.status == JobStatus::Failed {
            if let Some(line) = job.logs.iter().rev().find(|l| l.contains("Job failed")) {
                println!("  {line}");
            }
        }
    }
    info!(placed, failed, jobs = jobs.len(), "Download complete");
    determine_exit_outcome(placed, failed)
}

async fn run_dry_run(
    sources: &[JobSource],
    registry: &SourceRegistry,
    resolver: &YtDlpResolver,
    config: &Config,
    limit: Option<usize>,
) -> Result<ProcessExit> {
    let mut expanded = 0usize;
    let mut unresolved = 0usize;
    for source in sources {
        match registry.expand(source, limit).await {
            Ok(expansion) => {
                expanded += 1;
                println!(
                    "{} ({} track(s), {} skipped)",
                    expansion.display_name.as_deref().unwrap_or(&source.to_string()),
                    expansion.tracks.len(),
                    expansion.skipped.len()
                );
                for track in &expansion.tracks {
                    let request =
                        FetchRequest::from_track(track, &config.audio_format, &config.audio_quality);
                    let targets = resolver.search_targets(&request);
                    println!("- {} -> {}", track.label(), targets.join(" | "));
                }
                for note in &expansion.skipped {
                    println!("- [skipped] {note}");
                }
            }
            Err(error) => {
                unresolved += 1;
                println!("- [unresolved] {source} -> {error}");
            }
        }
    }
    println!("Dry run summary: {expanded} expanded, {unresolved} unresolved.");
    println!("Dry run - no files downloaded");
    Ok(determine_exit_outcome(expanded, unresolved))
}
