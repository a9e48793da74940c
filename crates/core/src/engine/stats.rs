//! Engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics;
use crate::task::TaskStatus;

#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    busy: AtomicU64,
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    canceled: AtomicU64,
}

impl EngineStats {
    pub fn record_claim(&self) {
        self.claimed.fetch_add(1, Ordering::Relaxed);
        metrics::TASKS_CLAIMED.inc();
    }

    pub fn worker_busy(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
        metrics::BUSY_WORKERS.inc();
    }

    pub fn worker_idle(&self) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
        metrics::BUSY_WORKERS.dec();
    }

    /// Count a terminal outcome. Non-terminal statuses are ignored.
    pub fn record_outcome(&self, status: TaskStatus) {
        let counter = match status {
            TaskStatus::Completed => &self.completed,
            TaskStatus::Failed => &self.failed,
            TaskStatus::Canceled => &self.canceled,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::TASKS_FINISHED
            .with_label_values(&[status.as_str()])
            .inc();
    }

    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed) as usize
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn canceled(&self) -> u64 {
        self.canceled.load(Ordering::Relaxed)
    }
}
