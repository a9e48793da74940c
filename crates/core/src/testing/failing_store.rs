//! Task store double that fails on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::task::{
    CreateTaskRequest, SqliteTaskStore, Task, TaskError, TaskFilter, TaskStatus, TaskStore,
    TaskUpdate,
};

/// [`TaskStore`] that delegates to an in-memory SQLite store and can be
/// switched to return [`TaskError::Database`] for scans or writes, the way a
/// locked or unreachable database would.
pub struct FailingStore {
    inner: Arc<SqliteTaskStore>,
    scan_failing: AtomicBool,
    writes_failing: AtomicBool,
    fail_next_writes: AtomicUsize,
    injected: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: Arc<SqliteTaskStore>) -> Self {
        Self {
            inner,
            scan_failing: AtomicBool::new(false),
            writes_failing: AtomicBool::new(false),
            fail_next_writes: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Result<Self, TaskError> {
        Ok(Self::new(Arc::new(SqliteTaskStore::in_memory()?)))
    }

    /// The wrapped store, which never fails.
    pub fn inner(&self) -> &Arc<SqliteTaskStore> {
        &self.inner
    }

    /// Make `find_queued` fail (or succeed again).
    pub fn set_scan_failing(&self, failing: bool) {
        self.scan_failing.store(failing, Ordering::SeqCst);
    }

    /// Make every `update` and `update_if` fail (or succeed again).
    pub fn set_writes_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only the next `count` calls to `update` or `update_if`.
    pub fn fail_next_writes(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Number of failures handed out so far.
    pub fn injected_failures(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn injected_error(&self, operation: &str) -> TaskError {
        self.injected.fetch_add(1, Ordering::SeqCst);
        TaskError::Database(format!("{} failed: database is locked", operation))
    }

    fn check_write(&self, operation: &str) -> Result<(), TaskError> {
        if self.writes_failing.load(Ordering::SeqCst) {
            return Err(self.injected_error(operation));
        }
        let consumed = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(self.injected_error(operation));
        }
        Ok(())
    }
}

impl TaskStore for FailingStore {
    fn create(&self, request: CreateTaskRequest) -> Result<Task, TaskError> {
        self.inner.create(request)
    }

    fn get(&self, id: &str) -> Result<Option<Task>, TaskError> {
        self.inner.get(id)
    }

    fn find_queued(&self, limit: usize) -> Result<Vec<Task>, TaskError> {
        if self.scan_failing.load(Ordering::SeqCst) {
            return Err(self.injected_error("find_queued"));
        }
        self.inner.find_queued(limit)
    }

    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError> {
        self.inner.count(filter)
    }

    fn claim(&self, id: &str) -> Result<bool, TaskError> {
        self.inner.claim(id)
    }

    fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, TaskError> {
        self.check_write("update")?;
        self.inner.update(id, update)
    }

    fn update_if(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<bool, TaskError> {
        self.check_write("update_if")?;
        self.inner.update_if(id, expected, update)
    }

    fn delete(&self, id: &str) -> Result<Task, TaskError> {
        self.inner.delete(id)
    }
}
