//! Status and progress propagation to the fast cache and the task store.
//!
//! The cache sees every change as it happens. The store sees status
//! transitions and progress only at milestones, so its progress may lag the
//! cache while a conversion runs.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::TaskCache;
use crate::metrics;
use crate::task::{TaskError, TaskStatus, TaskStore, TaskUpdate};

const TRANSITION_ATTEMPTS: u32 = 3;
const TRANSITION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-task progress bookkeeping, owned by the worker running the task.
#[derive(Debug)]
pub struct ProgressTracker {
    task_id: String,
    step: f64,
    last: Option<f64>,
    last_milestone: Option<u32>,
}

impl ProgressTracker {
    pub fn new(task_id: impl Into<String>, step_pct: u32) -> Self {
        Self {
            task_id: task_id.into(),
            step: f64::from(step_pct.clamp(1, 100)),
            last: None,
            last_milestone: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Accept `percent` if it moves progress forward. Returns the clamped
    /// value, or `None` for a regression or repeat.
    pub fn advance(&mut self, percent: f64) -> Option<f64> {
        if percent.is_nan() {
            return None;
        }
        let percent = percent.clamp(0.0, 100.0);
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }

    /// The milestone bucket `percent` falls in, if it has not been
    /// persisted yet. 0 and 100 are always milestones.
    ///
    /// The bucket stays pending until [`ProgressTracker::commit_milestone`]
    /// records it, so a failed store write is retried on the next report.
    pub fn pending_milestone(&self, percent: f64) -> Option<u32> {
        let bucket = if percent >= 100.0 {
            u32::MAX
        } else {
            (percent / self.step).floor() as u32
        };
        match self.last_milestone {
            Some(prev) if bucket <= prev => None,
            _ => Some(bucket),
        }
    }

    pub fn commit_milestone(&mut self, bucket: u32) {
        self.last_milestone = Some(bucket);
    }
}

/// Outcome of a progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressWrite {
    /// Ignored (not an advance).
    Ignored,
    /// Written to the cache only.
    Cached,
    /// Written to the cache and persisted as a milestone.
    Persisted,
    /// The store no longer has the task in Processing.
    Lost,
}

/// Writes task status and progress to the cache and the store.
pub struct StatusPropagator {
    store: Arc<dyn TaskStore>,
    cache: TaskCache,
    milestone_pct: u32,
}

impl StatusPropagator {
    pub fn new(store: Arc<dyn TaskStore>, cache: TaskCache, milestone_pct: u32) -> Self {
        Self {
            store,
            cache,
            milestone_pct,
        }
    }

    pub fn tracker(&self, task_id: &str) -> ProgressTracker {
        ProgressTracker::new(task_id, self.milestone_pct)
    }

    /// Mirror a status into the cache. Never fails.
    pub async fn cache_status(&self, task_id: &str, status: TaskStatus) {
        if let Err(e) = self.cache.set_status(task_id, status).await {
            metrics::CACHE_WRITE_FAILURES.inc();
            warn!(task_id = %task_id, error = %e, "Failed to cache task status");
        }
    }

    async fn cache_progress(&self, task_id: &str, progress: f64) {
        if let Err(e) = self.cache.set_progress(task_id, progress).await {
            metrics::CACHE_WRITE_FAILURES.inc();
            warn!(task_id = %task_id, error = %e, "Failed to cache task progress");
        }
    }

    /// Report progress for a Processing task.
    pub async fn progress(&self, tracker: &mut ProgressTracker, percent: f64) -> ProgressWrite {
        let Some(percent) = tracker.advance(percent) else {
            return ProgressWrite::Ignored;
        };

        self.cache_progress(tracker.task_id(), percent).await;

        let Some(bucket) = tracker.pending_milestone(percent) else {
            return ProgressWrite::Cached;
        };

        match self.store.update_if(
            tracker.task_id(),
            TaskStatus::Processing,
            TaskUpdate::progress(percent),
        ) {
            Ok(true) => {
                tracker.commit_milestone(bucket);
                debug!(task_id = %tracker.task_id(), progress = percent, "Progress milestone persisted");
                ProgressWrite::Persisted
            }
            Ok(false) => ProgressWrite::Lost,
            Err(TaskError::NotFound(_)) => ProgressWrite::Lost,
            Err(e) => {
                metrics::STORE_WRITE_FAILURES
                    .with_label_values(&["progress"])
                    .inc();
                warn!(task_id = %tracker.task_id(), error = %e, "Failed to persist progress milestone");
                ProgressWrite::Cached
            }
        }
    }

    /// Best-effort write of non-status fields (probe results).
    pub async fn record_metadata(&self, task_id: &str, update: TaskUpdate) {
        if update.is_empty() {
            return;
        }
        if let Err(e) = self
            .store
            .update_if(task_id, TaskStatus::Processing, update)
        {
            metrics::STORE_WRITE_FAILURES
                .with_label_values(&["metadata"])
                .inc();
            warn!(task_id = %task_id, error = %e, "Failed to persist task metadata");
        }
    }

    /// Apply a status transition if the task is still in `expected`.
    ///
    /// The cache follows the store: it receives the new status only once the
    /// store write has landed. Transient store failures are retried a few
    /// times since no later write would carry the transition. Whenever the
    /// write does not land, the cache is re-synced from the store.
    pub async fn transition(
        &self,
        task_id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<bool, TaskError> {
        let result = self.write_transition(task_id, expected, &update).await;

        if let Ok(true) = result {
            if let Some(status) = update.status {
                self.cache_status(task_id, status).await;
            }
            if let Some(progress) = update.progress {
                self.cache_progress(task_id, progress).await;
            }
        } else {
            self.resync_cache(task_id).await;
        }

        result
    }

    async fn write_transition(
        &self,
        task_id: &str,
        expected: TaskStatus,
        update: &TaskUpdate,
    ) -> Result<bool, TaskError> {
        let mut attempt = 1;
        loop {
            match self.store.update_if(task_id, expected, update.clone()) {
                Ok(written) => return Ok(written),
                Err(TaskError::Database(e)) if attempt < TRANSITION_ATTEMPTS => {
                    metrics::STORE_WRITE_FAILURES
                        .with_label_values(&["transition"])
                        .inc();
                    warn!(task_id = %task_id, attempt, error = %e, "Status write failed, retrying");
                    tokio::time::sleep(TRANSITION_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    metrics::STORE_WRITE_FAILURES
                        .with_label_values(&["transition"])
                        .inc();
                    return Err(e);
                }
            }
        }
    }

    /// Mirror the stored status, or drop the entries of a task that no
    /// longer exists.
    async fn resync_cache(&self, task_id: &str) {
        match self.store.get(task_id) {
            Ok(Some(current)) => {
                debug!(task_id = %task_id, status = %current.status, "Re-syncing cached status from store");
                self.cache_status(task_id, current.status).await;
            }
            Ok(None) => {
                if let Err(e) = self.cache.clear(task_id).await {
                    metrics::CACHE_WRITE_FAILURES.inc();
                    warn!(task_id = %task_id, error = %e, "Failed to clear cache for deleted task");
                }
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to read task for cache re-sync");
            }
        }
    }
}
