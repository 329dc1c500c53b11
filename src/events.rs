//! Progress distribution for jobs.
//!
//! Every state change of a job is published as a [`JobSnapshot`]. Each job
//! has its own broadcast channel, and a global channel carries every
//! snapshot of every job. Receivers own a bounded buffer: a slow receiver
//! loses its oldest undelivered snapshots instead of blocking the
//! publisher.

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};

use crate::download::DEFAULT_EVENT_BUFFER;
use crate::job::{JobId, JobSnapshot};

/// Per-job and global snapshot fan-out.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    channels: DashMap<JobId, broadcast::Sender<JobSnapshot>>,
    global: broadcast::Sender<JobSnapshot>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventBus {
    /// Creates a bus whose receivers buffer up to `capacity` snapshots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _rx) = broadcast::channel(capacity);
        Self {
            capacity,
            channels: DashMap::new(),
            global,
        }
    }

    /// Delivers `snapshot` to every current subscriber of `job_id` and to
    /// global subscribers. Never blocks.
    pub fn publish(&self, job_id: JobId, snapshot: JobSnapshot) {
        if let Some(sender) = self.channels.get(&job_id) {
            let delivered = sender.send(snapshot.clone()).unwrap_or(0);
            trace!(%job_id, delivered, status = %snapshot.status, "Published job snapshot");
        }
        let _ = self.global.send(snapshot);
    }

    /// Receiver for future snapshots of one job.
    #[must_use]
    pub fn subscribe_job(&self, job_id: JobId) -> broadcast::Receiver<JobSnapshot> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Receiver for future snapshots of every job.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobSnapshot> {
        self.global.subscribe()
    }

    /// Drops the channel of a finished job. Receivers still drain what is
    /// already buffered.
    pub fn close(&self, job_id: JobId) {
        if self.channels.remove(&job_id).is_some() {
            debug!(%job_id, "Closed job event channel");
        }
    }
}

/// Lazy sequence of snapshots for one job.
///
/// Yields the snapshot current at subscription time, then every later
/// update, and ends right after the first terminal snapshot.
#[derive(Debug)]
pub struct JobSubscription {
    initial: Option<JobSnapshot>,
    receiver: Option<broadcast::Receiver<JobSnapshot>>,
}

impl JobSubscription {
    /// Builds a subscription from the current snapshot and a receiver that
    /// was created atomically with it.
    #[must_use]
    pub fn new(current: JobSnapshot, receiver: Option<broadcast::Receiver<JobSnapshot>>) -> Self {
        let receiver = if current.is_terminal() { None } else { receiver };
        Self {
            initial: Some(current),
            receiver,
        }
    }

    /// Next snapshot, or `None` once the terminal snapshot was delivered.
    pub async fn next(&mut self) -> Option<JobSnapshot> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(snapshot) => {
                    if snapshot.is_terminal() {
                        self.receiver = None;
                    }
                    return Some(snapshot);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Subscriber lagged, dropped oldest snapshots");
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Adapts the subscription into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = JobSnapshot> {
        futures_util::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|snapshot| (snapshot, subscription))
        })
    }
}
