//! Task storage trait and types.

use std::path::PathBuf;

use thiserror::Error;

use super::{ConversionParams, Task, TaskKind, TaskStatus, TaskUpdate};

/// Error type for task store operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// The write would break the task state machine.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

/// Request to create a new task.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub kind: TaskKind,
    pub input_path: PathBuf,
    pub params: ConversionParams,
    pub title: Option<String>,
    pub original_url: Option<String>,
    pub input_size_bytes: Option<u64>,
}

impl CreateTaskRequest {
    /// Request for a directly uploaded file with default parameters.
    pub fn upload(input_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TaskKind::DirectUpload,
            input_path: input_path.into(),
            params: ConversionParams::default(),
            title: None,
            original_url: None,
            input_size_bytes: None,
        }
    }

    pub fn with_params(mut self, params: ConversionParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Filter for querying tasks.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            kind: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for task storage backends.
///
/// Implementations are shared between the scanner, every worker and the
/// intake side, so all methods take `&self` and must be safe to call
/// concurrently. Status writes are validated against
/// [`TaskStatus::can_transition_to`].
pub trait TaskStore: Send + Sync {
    /// Create a new Queued task.
    fn create(&self, request: CreateTaskRequest) -> Result<Task, TaskError>;

    /// Get a task by ID.
    fn get(&self, id: &str) -> Result<Option<Task>, TaskError>;

    /// Queued tasks, oldest first, at most `limit`.
    fn find_queued(&self, limit: usize) -> Result<Vec<Task>, TaskError>;

    /// List tasks matching the filter, newest first.
    fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError>;

    /// Count tasks matching the filter.
    fn count(&self, filter: &TaskFilter) -> Result<i64, TaskError>;

    /// Atomically move a task from Queued to Processing.
    ///
    /// Returns `Ok(false)` when the task is no longer Queued (another claimer
    /// won, or it was cancelled or requeued meanwhile). Of any number of
    /// concurrent claims on the same task, at most one returns `Ok(true)`.
    fn claim(&self, id: &str) -> Result<bool, TaskError>;

    /// Apply an update unconditionally (subject to transition validation).
    fn update(&self, id: &str, update: TaskUpdate) -> Result<Task, TaskError>;

    /// Apply an update only if the task is currently in `expected`.
    ///
    /// Returns `Ok(false)` without writing when the status differs.
    fn update_if(
        &self,
        id: &str,
        expected: TaskStatus,
        update: TaskUpdate,
    ) -> Result<bool, TaskError>;

    /// Permanently delete a task, returning it.
    fn delete(&self, id: &str) -> Result<Task, TaskError>;
}
