//! Task engine implementation.
//!
//! Owns the scanner and the worker pool and exposes the control surface:
//! start, stop, submit, cancel and status queries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cancel::CancelRegistry;
use super::config::{EngineConfig, ShutdownPolicy};
use super::propagator::StatusPropagator;
use super::queue::{DispatchItem, DispatchQueue};
use super::scanner::Scanner;
use super::stats::EngineStats;
use super::types::{
    CancelOutcome, EngineError, EngineStatus, LifecycleState, ProgressSource, TaskProgressView,
};
use super::worker::{Worker, WorkerContext, INTERRUPTED_BY_SHUTDOWN};
use crate::cache::TaskCache;
use crate::converter::Converter;
use crate::task::{TaskFilter, TaskStatus, TaskStore, TaskUpdate};

/// Reason recorded on tasks found in Processing at startup.
const ORPHAN_REASON: &str = "interrupted: engine restarted while processing";

/// Cancel retries when the task status keeps moving under us.
const CANCEL_ATTEMPTS: usize = 3;

struct RunningLoops {
    scanner: JoinHandle<Vec<DispatchItem>>,
    workers: Vec<JoinHandle<()>>,
}

enum Lifecycle {
    NotStarted,
    Running(RunningLoops),
    Stopped,
}

/// The conversion task engine.
pub struct TaskEngine<C: Converter + 'static> {
    config: EngineConfig,
    store: Arc<dyn TaskStore>,
    cache: TaskCache,
    converter: Arc<C>,
    propagator: Arc<StatusPropagator>,
    registry: Arc<CancelRegistry>,
    queue: DispatchQueue,
    stats: Arc<EngineStats>,
    output_dir: PathBuf,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    interrupt: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    state: AtomicU8,
}

impl<C: Converter + 'static> TaskEngine<C> {
    /// Create a new engine. Nothing runs until [`TaskEngine::start`].
    pub fn new(
        config: EngineConfig,
        output_dir: PathBuf,
        store: Arc<dyn TaskStore>,
        cache: TaskCache,
        converter: C,
    ) -> Self {
        let propagator = Arc::new(StatusPropagator::new(
            store.clone(),
            cache.clone(),
            config.progress_milestone_pct,
        ));
        let queue = DispatchQueue::new(config.queue_capacity);

        Self {
            config,
            store,
            cache,
            converter: Arc::new(converter),
            propagator,
            registry: Arc::new(CancelRegistry::new()),
            queue,
            stats: Arc::new(EngineStats::default()),
            output_dir,
            wake: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            state: AtomicU8::new(LifecycleState::NotStarted.as_u8()),
        }
    }

    pub fn converter(&self) -> &C {
        &self.converter
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Start the scanner and the workers. No-op unless NotStarted.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::NotStarted => {}
            Lifecycle::Running(_) => {
                warn!("Task engine already running");
                return;
            }
            Lifecycle::Stopped => {
                warn!("Task engine already stopped, ignoring start");
                return;
            }
        }

        info!(
            workers = self.config.workers,
            output_dir = %self.output_dir.display(),
            "Starting task engine"
        );

        if self.config.recover_orphans_on_start {
            self.recover_orphaned_tasks().await;
        }

        let scanner = Scanner {
            store: self.store.clone(),
            propagator: self.propagator.clone(),
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            wake: self.wake.clone(),
            interrupt: self.interrupt.clone(),
            shutdown: self.shutdown.clone(),
            interval: self.config.scan_interval(),
            batch_size: self.config.batch_size,
        };

        let ctx = Arc::new(WorkerContext {
            converter: self.converter.clone(),
            propagator: self.propagator.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            stats: self.stats.clone(),
            output_dir: self.output_dir.clone(),
            conversion_timeout: self.config.conversion_timeout(),
            probe_timeout: self.config.probe_timeout(),
        });

        let workers = (0..self.config.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    ctx: ctx.clone(),
                    shutdown: self.shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        *lifecycle = Lifecycle::Running(RunningLoops {
            scanner: tokio::spawn(scanner.run()),
            workers,
        });
        self.set_state(LifecycleState::Running);

        info!("Task engine started");
    }

    /// Stop every loop and wait for all of them to return. No-op unless
    /// Running; concurrent callers wait for the first one to finish.
    ///
    /// With [`ShutdownPolicy::Interrupt`] running conversions are cancelled
    /// and their tasks fail with "interrupted by shutdown". With
    /// [`ShutdownPolicy::Drain`] they run to completion first. Claimed tasks
    /// that never reached a worker are failed (or cancelled, if a cancel was
    /// requested) so none stays Processing.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let loops = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(loops) => loops,
            other => {
                *lifecycle = other;
                debug!("Task engine not running, ignoring stop");
                return;
            }
        };

        info!(policy = ?self.config.shutdown_policy, "Stopping task engine");

        self.shutdown.cancel();
        if self.config.shutdown_policy == ShutdownPolicy::Interrupt {
            self.interrupt.cancel();
        }

        let mut leftovers = match loops.scanner.await {
            Ok(backlog) => backlog,
            Err(e) => {
                error!(error = %e, "Scanner loop ended abnormally");
                Vec::new()
            }
        };

        for result in join_all(loops.workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker loop ended abnormally");
            }
        }

        leftovers.extend(self.queue.drain().await);
        if !leftovers.is_empty() {
            info!(count = leftovers.len(), "Releasing claimed tasks that never started");
        }
        for item in leftovers {
            self.release_unstarted(item).await;
        }

        self.set_state(LifecycleState::Stopped);
        info!("Task engine stopped");
    }

    /// Hint that a task was just queued; triggers an immediate scan.
    pub fn submit(&self, task_id: &str) {
        debug!(task_id = %task_id, "Task submitted");
        self.wake.notify_one();
    }

    /// Cancel a task.
    ///
    /// A Queued task (or a Processing task no worker owns) is marked Canceled
    /// right away. A task owned by the engine is signalled; its worker stops
    /// the conversion and then marks it Canceled.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelOutcome, EngineError> {
        for _ in 0..CANCEL_ATTEMPTS {
            let task = self
                .store
                .get(task_id)?
                .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

            if !task.status.can_cancel() {
                return Err(EngineError::InvalidState {
                    task_id: task_id.to_string(),
                    status: task.status,
                });
            }
            if task.status == TaskStatus::Processing {
                if let Some(handle) = self.registry.get(task_id) {
                    handle.request();
                    info!(task_id = %task_id, "Cancellation signalled to worker");
                    return Ok(CancelOutcome::Signalled);
                }
            }
            if self.direct_cancel(task_id, task.status).await? {
                return Ok(CancelOutcome::Canceled);
            }
        }

        let status = self
            .store
            .get(task_id)?
            .map(|t| t.status)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        Err(EngineError::InvalidState {
            task_id: task_id.to_string(),
            status,
        })
    }

    async fn direct_cancel(&self, task_id: &str, expected: TaskStatus) -> Result<bool, EngineError> {
        let written = self
            .propagator
            .transition(task_id, expected, TaskUpdate::status(TaskStatus::Canceled))
            .await?;
        if written {
            info!(task_id = %task_id, "Task canceled");
            self.stats.record_outcome(TaskStatus::Canceled);
        }
        Ok(written)
    }

    /// Live status and progress, from the cache when it has both values and
    /// from the task store otherwise.
    pub async fn progress(&self, task_id: &str) -> Result<TaskProgressView, EngineError> {
        let cached_status = self.cache.status(task_id).await.unwrap_or_else(|e| {
            debug!(task_id = %task_id, error = %e, "Cache read failed");
            None
        });
        let cached_progress = self.cache.progress(task_id).await.unwrap_or_else(|e| {
            debug!(task_id = %task_id, error = %e, "Cache read failed");
            None
        });

        if let (Some(status), Some(progress)) = (cached_status, cached_progress) {
            return Ok(TaskProgressView {
                task_id: task_id.to_string(),
                status,
                progress,
                source: ProgressSource::Cache,
            });
        }

        let task = self
            .store
            .get(task_id)?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        Ok(TaskProgressView {
            task_id: task_id.to_string(),
            status: cached_status.unwrap_or(task.status),
            progress: cached_progress.unwrap_or(task.progress),
            source: ProgressSource::Store,
        })
    }

    /// Get current engine status.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            workers: self.config.workers,
            busy_workers: self.stats.busy(),
            queue_depth: self.queue.len(),
            owned_tasks: self.registry.len(),
            total_claimed: self.stats.claimed(),
            total_completed: self.stats.completed(),
            total_failed: self.stats.failed(),
            total_canceled: self.stats.canceled(),
        }
    }

    /// Fail tasks a previous run claimed but never finished.
    ///
    /// Processing tasks that were never claimed belong to an intake step
    /// (for example a remote download) and are left alone.
    async fn recover_orphaned_tasks(&self) {
        const PAGE: i64 = 100;
        let mut orphans = Vec::new();
        let mut offset = 0;

        loop {
            let filter = TaskFilter::new()
                .with_status(TaskStatus::Processing)
                .with_limit(PAGE)
                .with_offset(offset);
            match self.store.list(&filter) {
                Ok(page) => {
                    let len = page.len() as i64;
                    orphans.extend(page.into_iter().filter(|t| t.ever_claimed()));
                    if len < PAGE {
                        break;
                    }
                    offset += PAGE;
                }
                Err(e) => {
                    error!(error = %e, "Failed to list orphaned tasks");
                    break;
                }
            }
        }

        for task in orphans {
            match self
                .propagator
                .transition(&task.id, TaskStatus::Processing, TaskUpdate::failed(ORPHAN_REASON))
                .await
            {
                Ok(true) => warn!(task_id = %task.id, "Recovered orphaned task as failed"),
                Ok(false) => {}
                Err(e) => error!(task_id = %task.id, error = %e, "Failed to recover orphaned task"),
            }
        }
    }

    async fn release_unstarted(&self, item: DispatchItem) {
        let task_id = item.task.id;
        self.registry.remove(&task_id);

        let update = if item.cancel.is_requested() {
            TaskUpdate::status(TaskStatus::Canceled)
        } else {
            TaskUpdate::failed(format!("{} before execution", INTERRUPTED_BY_SHUTDOWN))
        };
        let status = update.status;

        match self
            .propagator
            .transition(&task_id, TaskStatus::Processing, update)
            .await
        {
            Ok(true) => {
                if let Some(status) = status {
                    self.stats.record_outcome(status);
                }
            }
            Ok(false) => {}
            Err(e) => error!(task_id = %task_id, error = %e, "Failed to release claimed task"),
        }
    }
}
