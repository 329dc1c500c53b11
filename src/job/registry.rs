//! Process-wide in-memory job registry.
//!
//! Created empty at process start; nothing survives a restart.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{JobHandle, JobId, JobSnapshot, JobSource};
use crate::events::{EventBus, JobSubscription};

/// All jobs known to this process.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Arc<JobHandle>>,
    next_seq: AtomicU64,
    playlists_root: PathBuf,
    bus: Arc<EventBus>,
}

impl JobRegistry {
    /// Creates an empty registry whose jobs link into `playlists_root`.
    #[must_use]
    pub fn new(playlists_root: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            jobs: DashMap::new(),
            next_seq: AtomicU64::new(0),
            playlists_root: playlists_root.into(),
            bus,
        }
    }

    /// Event bus all jobs publish to.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Creates and registers a queued job without tracks.
    pub fn create(&self, source: JobSource, display_name: impl Into<String>) -> Arc<JobHandle> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(JobHandle::new(
            seq,
            source,
            display_name,
            self.playlists_root.clone(),
            Arc::clone(&self.bus),
        ));
        self.jobs.insert(handle.id(), Arc::clone(&handle));
        handle
    }

    /// Looks up a live handle.
    #[must_use]
    pub fn handle(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Current snapshot of one job.
    #[must_use]
    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.handle(id).map(|handle| handle.snapshot())
    }

    /// Snapshots of every job in submission order.
    #[must_use]
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.handles().iter().map(|h| h.snapshot()).collect()
    }

    /// Every handle in submission order.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<JobHandle>> {
        let mut handles: Vec<_> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        handles.sort_by_key(|h| h.seq());
        handles
    }

    /// Progress subscription for one job.
    #[must_use]
    pub fn subscribe(&self, id: JobId) -> Option<JobSubscription> {
        self.handle(id).map(|handle| handle.subscribe())
    }

    /// Number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true when no job was ever created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
