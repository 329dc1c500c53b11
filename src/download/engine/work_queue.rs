//! Shared work queue with round-robin fairness across jobs.
//!
//! Each job has its own FIFO of track indices; jobs take turns, so a large
//! job cannot starve the first tracks of jobs submitted after it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::job::JobId;

/// One unit of work: a track of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem {
    /// Owning job.
    pub job: JobId,
    /// Track index within the job.
    pub track: usize,
}

#[derive(Debug, Default)]
struct Inner {
    turns: VecDeque<JobId>,
    pending: HashMap<JobId, VecDeque<usize>>,
}

/// Round-robin queue of [`WorkItem`]s.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item to its job's FIFO and wakes a worker.
    pub fn push(&self, item: WorkItem) {
        {
            let mut inner = self.inner.lock();
            let Inner { turns, pending } = &mut *inner;
            let tracks = pending.entry(item.job).or_insert_with(|| {
                turns.push_back(item.job);
                VecDeque::new()
            });
            tracks.push_back(item.track);
        }
        self.notify.notify_one();
    }

    /// Pushes `item` after `delay` unless `cancel` fires first.
    pub fn push_delayed(self: &Arc<Self>, item: WorkItem, delay: Duration, cancel: CancellationToken) {
        if delay.is_zero() {
            self.push(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => queue.push(item),
            }
        });
    }

    /// Takes the next item, rotating across jobs.
    pub fn try_pop(&self) -> Option<WorkItem> {
        let (item, more) = {
            let mut inner = self.inner.lock();
            let job = inner.turns.pop_front()?;
            let tracks = inner.pending.get_mut(&job)?;
            let track = tracks.pop_front()?;
            if tracks.is_empty() {
                inner.pending.remove(&job);
            } else {
                inner.turns.push_back(job);
            }
            (WorkItem { job, track }, !inner.turns.is_empty())
        };
        // Pass the wakeup on so idle workers pick up the rest.
        if more {
            self.notify.notify_one();
        }
        Some(item)
    }

    /// Waits for the next item; `None` once `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<WorkItem> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = self.notify.notified() => {}
            }
        }
    }

    /// Drops every pending item of `job`. Returns how many were removed.
    pub fn purge(&self, job: JobId) -> usize {
        let mut inner = self.inner.lock();
        inner.turns.retain(|j| *j != job);
        inner.pending.remove(&job).map_or(0, |tracks| tracks.len())
    }

    /// Number of pending items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().pending.values().map(VecDeque::len).sum()
    }

    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn drain(queue: &WorkQueue) -> Vec<WorkItem> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn test_round_robin_across_jobs() {
        let queue = WorkQueue::new();
        let (big, small) = (JobId::new(), JobId::new());
        for track in 0..4 {
            queue.push(WorkItem { job: big, track });
        }
        for track in 0..2 {
            queue.push(WorkItem { job: small, track });
        }

        let order: Vec<_> = drain(&queue).iter().map(|i| (i.job == big, i.track)).collect();
        assert_eq!(
            order,
            vec![
                (true, 0),
                (false, 0),
                (true, 1),
                (false, 1),
                (true, 2),
                (true, 3)
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_within_job() {
        let queue = WorkQueue::new();
        let job = JobId::new();
        for track in [2, 0, 1] {
            queue.push(WorkItem { job, track });
        }
        let tracks: Vec<_> = drain(&queue).iter().map(|i| i.track).collect();
        assert_eq!(tracks, vec![2, 0, 1]);
    }

    #[test]
    fn test_purge_removes_job() {
        let queue = WorkQueue::new();
        let (a, b) = (JobId::new(), JobId::new());
        queue.push(WorkItem { job: a, track: 0 });
        queue.push(WorkItem { job: b, track: 0 });
        queue.push(WorkItem { job: a, track: 1 });
        assert_eq!(queue.purge(a), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().job, b);
    }

    #[tokio::test]
    async fn test_next_wakes_on_push() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.next(&cancel).await })
        };
        tokio::task::yield_now().await;
        let item = WorkItem { job: JobId::new(), track: 7 };
        queue.push(item);
        assert_eq!(waiter.await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn test_next_returns_none_on_cancel() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        queue.push(WorkItem { job: JobId::new(), track: 0 });
        assert_eq!(queue.next(&cancel).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_delayed_waits() {
        let queue = Arc::new(WorkQueue::new());
        let item = WorkItem { job: JobId::new(), track: 0 };
        queue.push_delayed(item, Duration::from_secs(5), CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.try_pop(), Some(item));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_delayed_dropped_on_cancel() {
        let queue = Arc::new(WorkQueue::new());
        let cancel = CancellationToken::new();
        queue.push_delayed(WorkItem { job: JobId::new(), track: 0 }, Duration::from_secs(5), cancel.clone());
        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }
}
