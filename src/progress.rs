//! Progress bars for running jobs.

use std::collections::HashSet;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use playlist_core::{JobSnapshot, JobSubscription, TrackStatus};
use tokio::task::JoinHandle;

/// Creates the bar container; hidden when `visible` is false.
pub(crate) fn multi_progress(visible: bool) -> MultiProgress {
    if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }
}

/// Follows one job until its terminal snapshot and returns that snapshot.
///
/// Failed tracks are printed above the bars as they happen.
pub(crate) fn follow_job(
    multi: &MultiProgress,
    mut subscription: JobSubscription,
) -> JoinHandle<Option<JobSnapshot>> {
    let bar = multi.add(ProgressBar::new(0));
    bar.set_style(
        ProgressStyle::with_template("{spinner} {wide_msg} [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    tokio::spawn(async move {
        let mut reported = HashSet::new();
        let mut last = None;
        while let Some(job) = subscription.next().await {
            bar.set_length(job.tracks.len() as u64);
            bar.set_position(job.finished() as u64);
            bar.set_message(format!("{} ({})", job.display_name, job.status));
            for track in job.tracks.iter().filter(|t| t.status == TrackStatus::Error) {
                if reported.insert(track.index) {
                    bar.println(format!(
                        "  x {} - {}: {}",
                        track.artist,
                        track.title,
                        track.message.as_deref().unwrap_or("failed")
                    ));
                }
            }
            last = Some(job);
        }
        match &last {
            Some(job) => bar.finish_with_message(format!("{} ({})", job.display_name, job.status)),
            None => bar.finish_and_clear(),
        }
        last
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use playlist_core::{Job, JobId, JobSource, JobStatus};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_follow_job_returns_terminal_snapshot() {
        let job = Job {
            id: JobId::new(),
            display_name: "Mix".to_string(),
            source: JobSource::Url("https://x".to_string()),
            status: JobStatus::Completed,
            logs: Vec::new(),
            tracks: Vec::new(),
            folder: "playlists/Mix".into(),
            manifest: None,
            created_at: chrono::Utc::now(),
        };
        let multi = multi_progress(false);
        let handle = follow_job(&multi, JobSubscription::new(Arc::new(job), None));
        let last = handle.await.unwrap().unwrap();
        assert_eq!(last.status, JobStatus::Completed);
    }
}
