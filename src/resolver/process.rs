//! Running external command-line tools.
//!
//! Children are spawned with `kill_on_drop`, so dropping the future (for
//! example when the per-track timeout fires) terminates the process.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::download::FetchError;

/// Captured output of a finished tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

impl ToolOutput {
    /// Returns true for a zero exit code.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last non-empty stderr line, for short error messages.
    #[must_use]
    pub fn last_error_line(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("no error output")
    }
}

/// Runs `program` with `args` to completion.
///
/// # Errors
///
/// A program that cannot be spawned is a [`FetchError::Precondition`];
/// other IO failures are network-class so they can be retried.
#[instrument(level = "debug", skip(args), fields(program = %program.display()))]
pub async fn run_tool<I, S>(program: &Path, args: I) -> Result<ToolOutput, FetchError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(program, &e))?;

    let result = ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(code = ?result.code, stdout_len = result.stdout.len(), "Tool finished");
    Ok(result)
}

/// Checks that `program --version` runs and returns its first output line.
///
/// # Errors
///
/// Returns [`FetchError::Precondition`] when the tool is missing or fails.
pub async fn tool_version(program: &Path) -> Result<String, FetchError> {
    let output = run_tool(program, ["--version"]).await?;
    if !output.success() {
        return Err(FetchError::precondition(format!(
            "{} --version exited with {:?}: {}",
            program.display(),
            output.code,
            output.last_error_line()
        )));
    }
    Ok(output.stdout.lines().next().unwrap_or("").trim().to_string())
}

fn spawn_error(program: &Path, error: &std::io::Error) -> FetchError {
    match error.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            FetchError::precondition(format!("cannot run {}: {error}", program.display()))
        }
        _ => FetchError::network(format!("failed to run {}: {error}", program.display())),
    }
}

const NETWORK: [&str; 9] = [
    "unable to download",
    "http error 5",
    "http error 429",
    "timed out",
    "connection reset",
    "connection refused",
    "temporary failure in name resolution",
    "getaddrinfo",
    "network is unreachable",
];
const CONVERSION: [&str; 5] = [
    "ffmpeg",
    "ffprobe",
    "postprocessing",
    "postprocessor",
    "audio conversion failed",
];

/// Maps yt-dlp style diagnostics to a failure class.
#[must_use]
pub fn classify_tool_failure(query: &str, output: &ToolOutput) -> FetchError {
    let detail = output.last_error_line().to_string();
    let haystack = output.stderr.to_ascii_lowercase();

    if NETWORK.iter().any(|needle| haystack.contains(needle)) {
        FetchError::network(detail)
    } else if CONVERSION.iter().any(|needle| haystack.contains(needle)) {
        FetchError::conversion(detail)
    } else {
        FetchError::not_found(query, detail)
    }
}
