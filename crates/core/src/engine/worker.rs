//! Worker loop and per-task execution.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cancel::{CancelHandle, CancelRegistry};
use super::propagator::{ProgressTracker, ProgressWrite, StatusPropagator};
use super::queue::{DispatchItem, DispatchQueue};
use super::stats::EngineStats;
use crate::converter::{ConversionJob, ConversionResult, Converter, ConverterError};
use crate::metrics;
use crate::task::{Task, TaskStatus, TaskUpdate};

/// Buffered progress updates between a conversion and its worker.
const PROGRESS_BUFFER: usize = 64;

/// How long a timed-out conversion gets to stop after being cancelled.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Failure reason for conversions stopped by an engine shutdown.
pub(crate) const INTERRUPTED_BY_SHUTDOWN: &str = "interrupted by shutdown";

/// Everything the workers share.
pub(crate) struct WorkerContext<C: Converter> {
    pub converter: Arc<C>,
    pub propagator: Arc<StatusPropagator>,
    pub registry: Arc<CancelRegistry>,
    pub queue: DispatchQueue,
    pub stats: Arc<EngineStats>,
    pub output_dir: PathBuf,
    pub conversion_timeout: Duration,
    /// Bound on validation and probing, which run before the conversion
    /// deadline starts.
    pub probe_timeout: Duration,
}

/// Builds `<dir>/<stem>_<YYYYmmdd_HHMMSS>_<short id>.<ext>`.
///
/// The task ID suffix keeps concurrent jobs on same-named inputs apart.
pub(crate) fn output_path_for(
    output_dir: &Path,
    task: &Task,
    extension: &str,
    now: DateTime<Utc>,
) -> PathBuf {
    let stem = task
        .input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("output");
    output_dir.join(format!(
        "{}_{}_{}.{}",
        stem,
        now.format("%Y%m%d_%H%M%S"),
        task.short_id(),
        extension
    ))
}

/// How a validation or probe call ended.
enum Preflight<T> {
    Done(T),
    TimedOut,
    Cancelled,
}

/// How a conversion attempt ended.
enum RunResult {
    Finished(Result<ConversionResult, ConverterError>),
    TimedOut,
}

pub(crate) struct Worker<C: Converter> {
    pub id: usize,
    pub ctx: Arc<WorkerContext<C>>,
    pub shutdown: CancellationToken,
}

impl<C: Converter + 'static> Worker<C> {
    pub async fn run(self) {
        info!(worker = self.id, "Worker loop started");

        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = self.ctx.queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            self.execute(item).await;
        }

        info!(worker = self.id, "Worker loop stopped");
    }

    /// Run one task to a terminal state. Never panics out.
    async fn execute(&self, item: DispatchItem) {
        let DispatchItem { task, cancel } = item;
        let task_id = task.id.clone();

        self.ctx.stats.worker_busy();
        let result = AssertUnwindSafe(self.process(task, &cancel))
            .catch_unwind()
            .await;
        let status = match result {
            Ok(status) => status,
            Err(_) => {
                error!(worker = self.id, task_id = %task_id, "Task execution panicked");
                self.finish(&task_id, TaskUpdate::failed("internal error: conversion panicked"))
                    .await
            }
        };
        self.ctx.registry.remove(&task_id);
        self.ctx.stats.worker_idle();

        if let Some(status) = status {
            self.ctx.stats.record_outcome(status);
        }
    }

    /// Write a terminal update. Returns the status if this worker wrote it.
    async fn finish(&self, task_id: &str, update: TaskUpdate) -> Option<TaskStatus> {
        let status = update.status?;
        match self
            .ctx
            .propagator
            .transition(task_id, TaskStatus::Processing, update)
            .await
        {
            Ok(true) => {
                info!(worker = self.id, task_id = %task_id, status = %status, "Task finished");
                Some(status)
            }
            Ok(false) => {
                info!(worker = self.id, task_id = %task_id, "Task left Processing elsewhere, result dropped");
                None
            }
            Err(e) => {
                error!(worker = self.id, task_id = %task_id, error = %e, "Failed to record task outcome");
                None
            }
        }
    }

    async fn process(&self, task: Task, cancel: &CancelHandle) -> Option<TaskStatus> {
        let ctx = &self.ctx;

        if cancel.is_requested() {
            return self
                .finish(&task.id, TaskUpdate::status(TaskStatus::Canceled))
                .await;
        }
        if cancel.token().is_cancelled() {
            return self
                .finish(
                    &task.id,
                    TaskUpdate::failed(format!("{} before execution", INTERRUPTED_BY_SHUTDOWN)),
                )
                .await;
        }

        info!(worker = self.id, task_id = %task.id, input = %task.input_path.display(), "Processing task");

        match self
            .preflight(cancel, ctx.converter.validate_input(&task.input_path))
            .await
        {
            Preflight::Done(Ok(())) => {}
            Preflight::Done(Err(e)) => {
                warn!(task_id = %task.id, error = %e, "Input validation failed");
                return self
                    .finish(
                        &task.id,
                        TaskUpdate::failed(format!("input validation failed: {}", e)),
                    )
                    .await;
            }
            Preflight::TimedOut => {
                warn!(task_id = %task.id, "Input validation timed out");
                return self
                    .finish(
                        &task.id,
                        TaskUpdate::failed(format!(
                            "input validation timed out after {} seconds",
                            ctx.probe_timeout.as_secs()
                        )),
                    )
                    .await;
            }
            Preflight::Cancelled => return self.finish_stopped(&task.id, cancel).await,
        }

        let duration_secs = match self
            .preflight(cancel, ctx.converter.probe(&task.input_path))
            .await
        {
            Preflight::Done(Ok(info)) => {
                let mut update = TaskUpdate::default().with_input_size(info.size_bytes);
                if let Some(duration) = info.duration_secs {
                    update = update.with_duration(duration);
                }
                ctx.propagator.record_metadata(&task.id, update).await;
                info.duration_secs
            }
            Preflight::Done(Err(e)) => {
                warn!(task_id = %task.id, error = %e, "Probe failed, progress will be unknown");
                None
            }
            Preflight::TimedOut => {
                warn!(
                    task_id = %task.id,
                    timeout_secs = ctx.probe_timeout.as_secs(),
                    "Probe timed out, progress will be unknown"
                );
                None
            }
            Preflight::Cancelled => return self.finish_stopped(&task.id, cancel).await,
        };

        let extension = ctx.converter.output_extension(&task.params);
        let output_path = output_path_for(&ctx.output_dir, &task, extension, Utc::now());

        let mut tracker = ctx.propagator.tracker(&task.id);
        if ctx.propagator.progress(&mut tracker, 0.0).await == ProgressWrite::Lost {
            cancel.request();
        }

        let job = ConversionJob {
            job_id: task.id.clone(),
            input_path: task.input_path.clone(),
            output_path: output_path.clone(),
            params: task.params.clone(),
            duration_secs,
        };

        let started = Instant::now();
        let run = self.run_conversion(job, cancel, &mut tracker).await;
        let elapsed = started.elapsed().as_secs_f64();

        let update = match run {
            RunResult::Finished(Ok(result)) => {
                metrics::CONVERSION_DURATION
                    .with_label_values(&["completed"])
                    .observe(elapsed);
                TaskUpdate::completed(result.output_path, Some(result.output_size_bytes))
            }
            RunResult::Finished(Err(e)) => {
                let (label, update) = if cancel.is_requested() {
                    ("canceled", TaskUpdate::status(TaskStatus::Canceled))
                } else if cancel.token().is_cancelled() {
                    ("interrupted", TaskUpdate::failed(INTERRUPTED_BY_SHUTDOWN))
                } else {
                    warn!(task_id = %task.id, error = %e, "Conversion failed");
                    ("failed", TaskUpdate::failed(e.to_string()))
                };
                metrics::CONVERSION_DURATION
                    .with_label_values(&[label])
                    .observe(elapsed);
                remove_partial_output(&output_path).await;
                update
            }
            RunResult::TimedOut => {
                metrics::CONVERSION_DURATION
                    .with_label_values(&["timed_out"])
                    .observe(elapsed);
                remove_partial_output(&output_path).await;
                TaskUpdate::failed(format!(
                    "conversion timed out after {} seconds",
                    ctx.conversion_timeout.as_secs()
                ))
            }
        };

        self.finish(&task.id, update).await
    }

    /// Run a pre-conversion call under the probe deadline, giving up as soon
    /// as the task is cancelled. Dropping the call kills any child process.
    async fn preflight<T>(
        &self,
        cancel: &CancelHandle,
        call: impl std::future::Future<Output = T>,
    ) -> Preflight<T> {
        tokio::select! {
            biased;
            _ = cancel.token().cancelled() => Preflight::Cancelled,
            result = tokio::time::timeout(self.ctx.probe_timeout, call) => match result {
                Ok(value) => Preflight::Done(value),
                Err(_) => Preflight::TimedOut,
            },
        }
    }

    /// Terminal write for a task stopped before its conversion started.
    async fn finish_stopped(&self, task_id: &str, cancel: &CancelHandle) -> Option<TaskStatus> {
        let update = if cancel.is_requested() {
            TaskUpdate::status(TaskStatus::Canceled)
        } else {
            TaskUpdate::failed(INTERRUPTED_BY_SHUTDOWN)
        };
        self.finish(task_id, update).await
    }

    /// Drive the converter under the deadline while forwarding progress.
    async fn run_conversion(
        &self,
        job: ConversionJob,
        cancel: &CancelHandle,
        tracker: &mut ProgressTracker,
    ) -> RunResult {
        let ctx = &self.ctx;
        let (progress_tx, mut progress_rx) = mpsc::channel(PROGRESS_BUFFER);

        let convert = ctx
            .converter
            .convert(job, cancel.token().clone(), progress_tx);
        tokio::pin!(convert);
        let deadline = tokio::time::sleep(ctx.conversion_timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                result = &mut convert => break Some(result),
                _ = &mut deadline => break None,
                Some(update) = progress_rx.recv() => {
                    if ctx.propagator.progress(tracker, update.percent).await == ProgressWrite::Lost
                        && !cancel.is_requested()
                    {
                        info!(task_id = %tracker.task_id(), "Task left Processing during conversion, cancelling");
                        cancel.request();
                    }
                }
            }
        };

        match result {
            Some(result) => {
                if result.is_ok() {
                    while let Ok(update) = progress_rx.try_recv() {
                        ctx.propagator.progress(tracker, update.percent).await;
                    }
                }
                RunResult::Finished(result)
            }
            None => {
                warn!(
                    task_id = %tracker.task_id(),
                    timeout_secs = ctx.conversion_timeout.as_secs(),
                    "Conversion deadline exceeded, cancelling"
                );
                cancel.token().cancel();
                if tokio::time::timeout(CANCEL_GRACE, &mut convert)
                    .await
                    .is_err()
                {
                    warn!(task_id = %tracker.task_id(), "Converter ignored cancellation, dropping it");
                }
                RunResult::TimedOut
            }
        }
    }
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial output"),
    }
}
