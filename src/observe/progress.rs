//! Shared progress trackers.
//!
//! The worker task opens a tracker per long-running job (dataset import)
//! and advances it once per unit of work. Observers take snapshots at
//! their own pace; counters are atomics, so advancing never takes the
//! list lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// One open progress tracker.
#[derive(Debug)]
pub struct Progress {
    id: u64,
    label: String,
    total: u64,
    current: AtomicU64,
    valid: AtomicBool,
}

impl Progress {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Advance by `count`. Ignored once the tracker has ended.
    #[inline]
    pub fn advance(&self, count: u64) {
        if self.valid.load(Ordering::Acquire) {
            self.current.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Completed fraction in `[0, 1]`; `0` for an empty job.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.current() as f64 / self.total as f64).min(1.0)
    }
}

/// Point-in-time copy of a tracker, for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub id: u64,
    pub label: String,
    pub current: u64,
    pub total: u64,
}

/// Set of open trackers shared between the worker and observers.
#[derive(Debug, Default)]
pub struct ProgressList {
    trackers: Mutex<Vec<Arc<Progress>>>,
    next_id: AtomicU64,
}

impl ProgressList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tracker for `total` units of work.
    pub fn begin(&self, label: impl Into<String>, total: u64) -> Arc<Progress> {
        let progress = Arc::new(Progress {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            total,
            current: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        });
        self.trackers.lock().push(Arc::clone(&progress));
        progress
    }

    /// Close a tracker. Later `advance` calls on it are ignored.
    pub fn end(&self, progress: &Arc<Progress>) {
        progress.valid.store(false, Ordering::Release);
        self.trackers.lock().retain(|p| !Arc::ptr_eq(p, progress));
    }

    pub fn len(&self) -> usize {
        self.trackers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ProgressSnapshot> {
        self.trackers
            .lock()
            .iter()
            .map(|p| ProgressSnapshot {
                id: p.id,
                label: p.label.clone(),
                current: p.current(),
                total: p.total,
            })
            .collect()
    }
}
