//! Periodic discovery and claiming of queued tasks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancel::CancelRegistry;
use super::propagator::StatusPropagator;
use super::queue::{DispatchItem, DispatchQueue};
use super::stats::EngineStats;
use crate::metrics;
use crate::task::{TaskStatus, TaskStore};

/// Claims queued tasks and feeds them to the dispatch queue.
///
/// Claimed tasks that do not fit in the queue stay in a local backlog and
/// are pushed again on later ticks; no new tasks are claimed while the
/// backlog is non-empty.
pub(crate) struct Scanner {
    pub store: Arc<dyn TaskStore>,
    pub propagator: Arc<StatusPropagator>,
    pub queue: DispatchQueue,
    pub registry: Arc<CancelRegistry>,
    pub stats: Arc<EngineStats>,
    pub wake: Arc<Notify>,
    /// Parent of every per-task cancellation token.
    pub interrupt: CancellationToken,
    pub shutdown: CancellationToken,
    pub interval: Duration,
    pub batch_size: usize,
}

impl Scanner {
    /// Run until shutdown. Returns claimed tasks that never reached the queue.
    pub async fn run(self) -> Vec<DispatchItem> {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Scanner loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backlog = VecDeque::new();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.wake.notified() => debug!("Scanner woken by submit"),
            }
            self.scan_once(&mut backlog).await;
        }

        info!(held_back = backlog.len(), "Scanner loop stopped");
        backlog.into()
    }

    /// One scan: retry the backlog, then claim a new batch.
    pub async fn scan_once(&self, backlog: &mut VecDeque<DispatchItem>) {
        self.flush_backlog(backlog);
        if !backlog.is_empty() {
            debug!(held_back = backlog.len(), "Dispatch queue still full, skipping claims");
            return;
        }

        let candidates = match self.store.find_queued(self.batch_size) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to query queued tasks");
                return;
            }
        };

        for mut task in candidates {
            if self.shutdown.is_cancelled() {
                break;
            }

            // Registered before the claim so a cancel racing the claim always
            // finds either a Queued task or a handle.
            let cancel = self.registry.register(&task.id, &self.interrupt);

            match self.store.claim(&task.id) {
                Ok(true) => {}
                Ok(false) => {
                    self.registry.remove(&task.id);
                    debug!(task_id = %task.id, "Task no longer queued, skipping");
                    continue;
                }
                Err(e) => {
                    self.registry.remove(&task.id);
                    metrics::STORE_WRITE_FAILURES
                        .with_label_values(&["claim"])
                        .inc();
                    warn!(task_id = %task.id, error = %e, "Failed to claim task");
                    continue;
                }
            }

            self.stats.record_claim();
            self.propagator
                .cache_status(&task.id, TaskStatus::Processing)
                .await;
            info!(task_id = %task.id, "Claimed task");

            task.status = TaskStatus::Processing;
            task.claimed_at = Some(Utc::now());
            let item = DispatchItem { task, cancel };

            if !backlog.is_empty() {
                backlog.push_back(item);
            } else if let Err(item) = self.queue.try_push(item) {
                warn!(task_id = %item.task.id, "Dispatch queue full, holding claimed task");
                backlog.push_back(item);
            }
        }
    }

    fn flush_backlog(&self, backlog: &mut VecDeque<DispatchItem>) {
        while let Some(item) = backlog.pop_front() {
            if let Err(item) = self.queue.try_push(item) {
                backlog.push_front(item);
                break;
            }
        }
    }
}
