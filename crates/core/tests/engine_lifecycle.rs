//! Task engine lifecycle integration tests.
//!
//! These tests drive tasks through the full engine with a mock converter:
//! queued -> processing -> completed | failed | canceled

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use convertd_core::{
    cache::DEFAULT_TTL,
    testing::{fixtures, FailingStore, MockConverter, RecordingCache},
    CancelOutcome, ConverterError, CreateTaskRequest, EngineConfig, EngineError, LifecycleState,
    ShutdownPolicy, SqliteTaskStore, Task, TaskCache, TaskEngine, TaskFilter, TaskStatus,
    TaskStore, TaskUpdate,
};
use convertd_core::engine::ProgressSource;

const WAIT: Duration = Duration::from_secs(5);

/// Test helper holding the engine and its collaborators.
///
/// The store is a [`FailingStore`] over SQLite so tests can take the
/// database away mid-run.
struct TestHarness {
    store: Arc<FailingStore>,
    cache: Arc<RecordingCache>,
    converter: MockConverter,
    engine: TaskEngine<MockConverter>,
    temp_dir: TempDir,
}

impl TestHarness {
    async fn new(config: EngineConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Arc::new(
            SqliteTaskStore::new(&temp_dir.path().join("tasks.db"))
                .expect("Failed to create task store"),
        );
        Self::with_store(config, store, temp_dir).await
    }

    async fn with_store(config: EngineConfig, store: Arc<SqliteTaskStore>, temp_dir: TempDir) -> Self {
        let store = Arc::new(FailingStore::new(store));
        let cache = Arc::new(RecordingCache::new());
        let converter = MockConverter::new();
        converter
            .set_conversion_duration(Duration::from_millis(20))
            .await;

        let engine = TaskEngine::new(
            config,
            temp_dir.path().join("output"),
            store.clone(),
            TaskCache::new(cache.clone(), DEFAULT_TTL),
            converter.clone(),
        );

        Self {
            store,
            cache,
            converter,
            engine,
            temp_dir,
        }
    }

    fn input(&self, name: &str) -> PathBuf {
        fixtures::write_input(&self.temp_dir.path().join("uploads"), name)
            .expect("Failed to write input")
    }

    fn create_task(&self, name: &str) -> Task {
        let path = self.input(name);
        self.store
            .create(CreateTaskRequest::upload(path))
            .expect("Failed to create task")
    }

    fn task(&self, id: &str) -> Task {
        self.store
            .get(id)
            .expect("Failed to read task")
            .expect("Task should exist")
    }

    async fn wait_for_status(&self, id: &str, status: TaskStatus) -> Task {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let task = self.task(id);
            if task.status == status {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {} stuck in {:?}, expected {:?}",
                id,
                task.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_until(&self, what: &str, mut done: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !done() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn count(&self, status: TaskStatus) -> i64 {
        self.store
            .count(&TaskFilter::new().with_status(status))
            .expect("Failed to count tasks")
    }

    async fn wait_for_active(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.converter.active_conversions() != count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} active conversions",
                count
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_workers(1)
        .with_scan_interval_ms(20)
        .with_batch_size(10)
        .with_queue_capacity(10)
}

#[tokio::test]
async fn test_single_task_completes() {
    let h = TestHarness::new(fast_config()).await;
    let task = h.create_task("talk.mp4");

    h.engine.start().await;
    let done = h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    assert_eq!(done.progress, 100.0);
    assert!(done.error_message.is_none());
    assert!(done.claimed_at.is_some());
    let output = done.output_path.expect("output path recorded");
    assert!(output.exists());
    assert!(output.starts_with(h.temp_dir.path().join("output")));
    assert_eq!(output.extension().and_then(|e| e.to_str()), Some("mp3"));
    assert!(output
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("talk_") && n.contains(task.short_id())));
    assert_eq!(done.output_size_bytes, Some(20));
    assert_eq!(done.duration_secs, Some(60.0));

    let statuses = h.cache.status_history(&task.id);
    assert_eq!(statuses.first(), Some(&TaskStatus::Processing));
    assert_eq!(statuses.last(), Some(&TaskStatus::Completed));

    let progress = h.cache.progress_history(&task.id);
    assert_eq!(progress.first(), Some(&0.0));
    assert_eq!(progress.last(), Some(&100.0));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);

    let status = h.engine.status();
    assert_eq!(status.total_claimed, 1);
    assert_eq!(status.total_completed, 1);
    assert_eq!(status.busy_workers, 0);
}

#[tokio::test]
async fn test_backlog_beyond_batch_is_converted_once() {
    let config = fast_config().with_workers(3);
    let h = TestHarness::new(config).await;
    h.converter.set_conversion_duration(Duration::from_millis(5)).await;

    let ids: Vec<String> = (0..15)
        .map(|i| h.create_task(&format!("clip-{}.mkv", i)).id)
        .collect();

    h.engine.start().await;
    for id in &ids {
        h.wait_for_status(id, TaskStatus::Completed).await;
    }
    h.engine.stop().await;

    let conversions = h.converter.recorded_conversions().await;
    assert_eq!(conversions.len(), 15);
    let converted: HashSet<_> = conversions.iter().map(|c| c.job.job_id.clone()).collect();
    assert_eq!(converted.len(), 15);
    assert!(h.converter.peak_concurrency() <= 3);

    let outputs: HashSet<_> = ids
        .iter()
        .map(|id| h.task(id).output_path.expect("output path"))
        .collect();
    assert_eq!(outputs.len(), 15);
}

#[tokio::test]
async fn test_missing_input_fails_without_progress() {
    let h = TestHarness::new(fast_config()).await;
    let task = h
        .store
        .create(CreateTaskRequest::upload("/definitely/not/here.mp4"))
        .unwrap();

    h.engine.start().await;
    let failed = h.wait_for_status(&task.id, TaskStatus::Failed).await;
    h.engine.stop().await;

    let message = failed.error_message.expect("error message");
    assert!(message.starts_with("input validation failed"), "{}", message);
    assert_eq!(failed.progress, 0.0);
    assert!(failed.output_path.is_none());
    assert!(h.cache.progress_history(&task.id).is_empty());
    assert_eq!(h.converter.conversion_count().await, 0);
}

#[tokio::test]
async fn test_unsupported_extension_fails() {
    let h = TestHarness::new(fast_config()).await;
    let task = h.create_task("notes.txt");

    h.engine.start().await;
    let failed = h.wait_for_status(&task.id, TaskStatus::Failed).await;
    h.engine.stop().await;

    let message = failed.error_message.unwrap();
    assert!(message.contains("Unsupported input format: txt"), "{}", message);
}

#[tokio::test]
async fn test_converter_error_fails_task() {
    let h = TestHarness::new(fast_config()).await;
    h.converter
        .set_next_error(ConverterError::conversion_failed(
            "ffmpeg exited with code 1: Invalid data found",
            None,
        ))
        .await;
    let task = h.create_task("broken.mp4");

    h.engine.start().await;
    let failed = h.wait_for_status(&task.id, TaskStatus::Failed).await;
    h.engine.stop().await;

    assert_eq!(
        failed.error_message.as_deref(),
        Some("Conversion failed: ffmpeg exited with code 1: Invalid data found")
    );
    assert!(failed.output_path.is_none());
    assert_eq!(h.engine.status().total_failed, 1);
}

#[tokio::test]
async fn test_panicking_conversion_fails_and_worker_survives() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_panic_next();
    let first = h.create_task("first.mp4");

    h.engine.start().await;
    let failed = h.wait_for_status(&first.id, TaskStatus::Failed).await;
    assert_eq!(
        failed.error_message.as_deref(),
        Some("internal error: conversion panicked")
    );

    let second = h.create_task("second.mp4");
    h.engine.submit(&second.id);
    h.wait_for_status(&second.id, TaskStatus::Completed).await;
    h.engine.stop().await;
}

#[tokio::test]
async fn test_conversion_timeout() {
    let config = fast_config().with_conversion_timeout_secs(1);
    let h = TestHarness::new(config).await;
    h.converter.set_hang(true);
    let task = h.create_task("long.mp4");

    h.engine.start().await;
    let failed = h.wait_for_status(&task.id, TaskStatus::Failed).await;
    h.engine.stop().await;

    assert_eq!(
        failed.error_message.as_deref(),
        Some("conversion timed out after 1 seconds")
    );
    assert_eq!(h.converter.active_conversions(), 0);
}

#[tokio::test]
async fn test_cancel_running_task() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_hang(true);
    let task = h.create_task("cancel-me.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;

    let outcome = h.engine.cancel(&task.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);

    let canceled = h.wait_for_status(&task.id, TaskStatus::Canceled).await;
    assert!(canceled.output_path.is_none());
    assert!(canceled.error_message.is_none());
    h.wait_for_active(0).await;
    assert_eq!(h.cache.last_status(&task.id).await, Some(TaskStatus::Canceled));

    h.engine.stop().await;
    assert_eq!(h.engine.status().total_canceled, 1);
}

#[tokio::test]
async fn test_cancel_queued_task_before_start() {
    let h = TestHarness::new(fast_config()).await;
    let task = h.create_task("never.mp4");

    let outcome = h.engine.cancel(&task.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert_eq!(h.task(&task.id).status, TaskStatus::Canceled);

    h.engine.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.engine.stop().await;

    assert_eq!(h.task(&task.id).status, TaskStatus::Canceled);
    assert_eq!(h.converter.conversion_count().await, 0);
}

#[tokio::test]
async fn test_cancel_terminal_and_missing_tasks() {
    let h = TestHarness::new(fast_config()).await;
    let task = h.create_task("done.mp4");

    h.engine.start().await;
    h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    let err = h.engine.cancel(&task.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidState {
            status: TaskStatus::Completed,
            ..
        }
    ));

    let err = h.engine.cancel("no-such-task").await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_cancel_unowned_processing_task() {
    let h = TestHarness::new(fast_config()).await;
    let task = h.create_task("orphan.mp4");
    assert!(h.store.claim(&task.id).unwrap());

    // Engine never started, so no worker owns the task.
    let outcome = h.engine.cancel(&task.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert_eq!(h.task(&task.id).status, TaskStatus::Canceled);
}

#[tokio::test]
async fn test_stop_interrupts_running_conversion() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_hang(true);
    let task = h.create_task("busy.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;
    h.engine.stop().await;

    // stop() only returns once the worker has finished the task.
    assert_eq!(h.converter.active_conversions(), 0);
    let failed = h.task(&task.id);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("interrupted by shutdown"));
    assert_eq!(h.engine.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stop_interrupts_every_running_conversion() {
    let h = TestHarness::new(fast_config().with_workers(3)).await;
    h.converter.set_hang(true);
    let ids: Vec<String> = (0..3)
        .map(|i| h.create_task(&format!("busy-{}.mp4", i)).id)
        .collect();

    h.engine.start().await;
    h.wait_for_active(3).await;
    h.engine.stop().await;

    assert_eq!(h.converter.active_conversions(), 0);
    assert_eq!(h.count(TaskStatus::Processing), 0);
    for id in &ids {
        let task = h.task(id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("interrupted by shutdown"));
    }
    let status = h.engine.status();
    assert_eq!(status.busy_workers, 0);
    assert_eq!(status.owned_tasks, 0);
    assert_eq!(status.total_failed, 3);
}

#[tokio::test]
async fn test_stop_drain_finishes_running_conversion() {
    let config = fast_config().with_shutdown_policy(ShutdownPolicy::Drain);
    let h = TestHarness::new(config).await;
    h.converter
        .set_conversion_duration(Duration::from_millis(300))
        .await;
    let task = h.create_task("drain.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;
    h.engine.stop().await;

    assert_eq!(h.task(&task.id).status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_stop_releases_dispatched_tasks() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_hang(true);
    let ids: Vec<String> = (0..3)
        .map(|i| h.create_task(&format!("q-{}.mp4", i)).id)
        .collect();

    h.engine.start().await;
    h.wait_for_active(1).await;
    for id in &ids {
        h.wait_for_status(id, TaskStatus::Processing).await;
    }

    // Claims are dispatched in creation order, so the first task is the one
    // running and the other two wait in the dispatch queue.
    let outcome = h.engine.cancel(&ids[1]).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);

    h.engine.stop().await;

    let running = h.task(&ids[0]);
    assert_eq!(running.status, TaskStatus::Failed);
    assert_eq!(running.error_message.as_deref(), Some("interrupted by shutdown"));

    assert_eq!(h.task(&ids[1]).status, TaskStatus::Canceled);

    let waiting = h.task(&ids[2]);
    assert_eq!(waiting.status, TaskStatus::Failed);
    assert_eq!(
        waiting.error_message.as_deref(),
        Some("interrupted by shutdown before execution")
    );

    assert_eq!(h.converter.conversion_count().await, 1);
    assert_eq!(h.engine.status().owned_tasks, 0);
    assert_eq!(h.engine.status().queue_depth, 0);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let h = TestHarness::new(fast_config()).await;
    assert_eq!(h.engine.state(), LifecycleState::NotStarted);

    // Stop before start does nothing.
    h.engine.stop().await;
    assert_eq!(h.engine.state(), LifecycleState::NotStarted);

    h.engine.start().await;
    h.engine.start().await;
    assert_eq!(h.engine.state(), LifecycleState::Running);

    let task = h.create_task("once.mp4");
    h.wait_for_status(&task.id, TaskStatus::Completed).await;

    h.engine.stop().await;
    h.engine.stop().await;
    assert_eq!(h.engine.state(), LifecycleState::Stopped);

    // A stopped engine cannot be restarted.
    h.engine.start().await;
    assert_eq!(h.engine.state(), LifecycleState::Stopped);
    let late = h.create_task("late.mp4");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.task(&late.id).status, TaskStatus::Queued);

    assert_eq!(h.converter.conversion_count().await, 1);
}

#[tokio::test]
async fn test_concurrent_stop_calls_both_return() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_hang(true);
    h.create_task("busy.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;

    tokio::join!(h.engine.stop(), h.engine.stop());
    assert_eq!(h.engine.state(), LifecycleState::Stopped);
    assert_eq!(h.converter.active_conversions(), 0);
}

#[tokio::test]
async fn test_orphaned_tasks_recovered_on_start() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteTaskStore::new(&temp_dir.path().join("tasks.db")).unwrap());

    let orphan = store.create(CreateTaskRequest::upload("/in/orphan.mp4")).unwrap();
    assert!(store.claim(&orphan.id).unwrap());

    // Processing without a claim belongs to an intake step and is left alone.
    let intake = store.create(CreateTaskRequest::upload("/in/intake.mp4")).unwrap();
    store
        .update(&intake.id, TaskUpdate::status(TaskStatus::Processing))
        .unwrap();

    let h = TestHarness::with_store(fast_config(), store, temp_dir).await;
    h.engine.start().await;
    h.engine.stop().await;

    let recovered = h.task(&orphan.id);
    assert_eq!(recovered.status, TaskStatus::Failed);
    assert_eq!(
        recovered.error_message.as_deref(),
        Some("interrupted: engine restarted while processing")
    );
    assert_eq!(
        h.cache.last_status(&orphan.id).await,
        Some(TaskStatus::Failed)
    );

    assert_eq!(h.task(&intake.id).status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_submit_triggers_immediate_scan() {
    let config = fast_config().with_scan_interval_ms(60_000);
    let h = TestHarness::new(config).await;

    h.engine.start().await;
    // Let the initial scan pass with nothing to claim.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let task = h.create_task("wake.mp4");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.task(&task.id).status, TaskStatus::Queued);

    h.engine.submit(&task.id);
    h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;
}

#[tokio::test]
async fn test_progress_view_prefers_cache() {
    let h = TestHarness::new(fast_config()).await;
    let untouched = h.create_task("idle.mp4");

    let view = h.engine.progress(&untouched.id).await.unwrap();
    assert_eq!(view.source, ProgressSource::Store);
    assert_eq!(view.status, TaskStatus::Queued);
    assert_eq!(view.progress, 0.0);

    let task = h.create_task("watched.mp4");
    h.engine.start().await;
    h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    let view = h.engine.progress(&task.id).await.unwrap();
    assert_eq!(view.source, ProgressSource::Cache);
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.progress, 100.0);

    let err = h.engine.progress("missing").await.unwrap_err();
    assert!(matches!(err, EngineError::TaskNotFound(_)));
}

#[tokio::test]
async fn test_cache_outage_does_not_block_completion() {
    let h = TestHarness::new(fast_config()).await;
    h.cache.set_failing(true);
    let task = h.create_task("no-cache.mp4");

    h.engine.start().await;
    let done = h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    assert_eq!(done.progress, 100.0);
    assert_eq!(h.cache.write_count(), 0);

    h.cache.set_failing(false);
    let view = h.engine.progress(&task.id).await.unwrap();
    assert_eq!(view.source, ProgressSource::Store);
    assert_eq!(view.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_task_deleted_mid_conversion_is_abandoned() {
    let h = TestHarness::new(fast_config()).await;
    h.converter
        .set_conversion_duration(Duration::from_millis(300))
        .await;
    h.converter.set_progress_steps(20).await;
    let task = h.create_task("vanishing.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;
    h.store.delete(&task.id).unwrap();
    h.wait_for_active(0).await;
    h.engine.stop().await;

    assert!(h.store.get(&task.id).unwrap().is_none());
    let status = h.engine.status();
    assert_eq!(status.total_completed, 0);
    assert_eq!(status.owned_tasks, 0);
}

#[tokio::test]
async fn test_hung_probe_times_out_and_conversion_proceeds() {
    let h = TestHarness::new(fast_config().with_probe_timeout_secs(1)).await;
    h.converter.set_probe_hang(true);
    let task = h.create_task("stalled-mount.mp4");

    h.engine.start().await;
    let done = h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    assert_eq!(h.converter.probe_count(), 1);
    assert!(done.duration_secs.is_none());
    assert!(done.input_size_bytes.is_none());
    assert_eq!(done.progress, 100.0);
}

#[tokio::test]
async fn test_stop_is_bounded_while_probe_hangs() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_probe_hang(true);
    let task = h.create_task("stalled-mount.mp4");

    h.engine.start().await;
    h.wait_until("probe to start", || h.converter.probe_count() == 1)
        .await;
    tokio::time::timeout(WAIT, h.engine.stop())
        .await
        .expect("stop() blocked on a hung probe");

    let failed = h.task(&task.id);
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("interrupted by shutdown"));
    assert_eq!(h.converter.conversion_count().await, 0);
}

#[tokio::test]
async fn test_cancel_during_hung_probe() {
    let h = TestHarness::new(fast_config()).await;
    h.converter.set_probe_hang(true);
    let task = h.create_task("stalled-mount.mp4");

    h.engine.start().await;
    h.wait_until("probe to start", || h.converter.probe_count() == 1)
        .await;
    assert_eq!(
        h.engine.cancel(&task.id).await.unwrap(),
        CancelOutcome::Signalled
    );
    h.wait_for_status(&task.id, TaskStatus::Canceled).await;
    h.engine.stop().await;

    assert_eq!(h.converter.conversion_count().await, 0);
}

#[tokio::test]
async fn test_store_outage_mid_conversion_still_completes() {
    let h = TestHarness::new(fast_config()).await;
    h.converter
        .set_conversion_duration(Duration::from_millis(400))
        .await;
    h.converter.set_progress_steps(20).await;
    let task = h.create_task("flaky-db.mp4");

    h.engine.start().await;
    h.wait_for_active(1).await;
    h.store.set_writes_failing(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.store.set_writes_failing(false);

    let done = h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;

    assert!(h.store.injected_failures() > 0);
    assert_eq!(done.progress, 100.0);
    assert!(done.output_path.is_some());

    let progress = h.cache.progress_history(&task.id);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100.0));
    assert_eq!(
        h.cache.last_status(&task.id).await,
        Some(TaskStatus::Completed)
    );
}

#[tokio::test]
async fn test_unrecorded_outcome_is_not_reported_from_cache() {
    let h = TestHarness::new(fast_config()).await;
    h.store.set_writes_failing(true);
    let stuck = h.create_task("stuck.mp4");

    h.engine.start().await;
    h.wait_until("the outcome write to give up", || {
        let status = h.engine.status();
        status.total_claimed == 1 && status.owned_tasks == 0
    })
    .await;

    // The store never took the Completed write, so neither may the cache.
    assert_eq!(h.task(&stuck.id).status, TaskStatus::Processing);
    let view = h.engine.progress(&stuck.id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Processing);
    assert!(!h
        .cache
        .status_history(&stuck.id)
        .contains(&TaskStatus::Completed));

    // The worker survived and picks up new work once the store is back.
    h.store.set_writes_failing(false);
    let next = h.create_task("next.mp4");
    h.wait_for_status(&next.id, TaskStatus::Completed).await;
    h.engine.stop().await;
}

#[tokio::test]
async fn test_scanner_survives_failing_queries() {
    let h = TestHarness::new(fast_config()).await;
    h.store.set_scan_failing(true);
    let task = h.create_task("later.mp4");

    h.engine.start().await;
    h.wait_until("a few failed scans", || h.store.injected_failures() >= 3)
        .await;
    assert_eq!(h.task(&task.id).status, TaskStatus::Queued);

    h.store.set_scan_failing(false);
    h.wait_for_status(&task.id, TaskStatus::Completed).await;
    h.engine.stop().await;
}
