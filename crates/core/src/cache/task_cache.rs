//! Task-aware view over a [`FastCache`].

use std::sync::Arc;
use std::time::Duration;

use super::{CacheError, FastCache};
use crate::task::TaskStatus;

/// Default lifetime of cached task entries (24 hours).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key holding the live status of a task.
pub fn status_key(task_id: &str) -> String {
    format!("task_status:{}", task_id)
}

/// Cache key holding the live progress of a task.
pub fn progress_key(task_id: &str) -> String {
    format!("task_progress:{}", task_id)
}

/// Reads and writes per-task status and progress entries.
#[derive(Clone)]
pub struct TaskCache {
    inner: Arc<dyn FastCache>,
    ttl: Duration,
}

impl TaskCache {
    pub fn new(inner: Arc<dyn FastCache>, ttl: Duration) -> Self {
        Self { inner, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<(), CacheError> {
        self.inner
            .set(&status_key(task_id), status.as_str(), self.ttl)
            .await
    }

    pub async fn set_progress(&self, task_id: &str, progress: f64) -> Result<(), CacheError> {
        self.inner
            .set(&progress_key(task_id), &format!("{:.2}", progress), self.ttl)
            .await
    }

    pub async fn status(&self, task_id: &str) -> Result<Option<TaskStatus>, CacheError> {
        let key = status_key(task_id);
        match self.inner.get(&key).await? {
            Some(raw) => raw
                .parse::<TaskStatus>()
                .map(Some)
                .map_err(|reason| CacheError::InvalidValue { key, reason }),
            None => Ok(None),
        }
    }

    pub async fn progress(&self, task_id: &str) -> Result<Option<f64>, CacheError> {
        let key = progress_key(task_id);
        match self.inner.get(&key).await? {
            Some(raw) => raw
                .parse::<f64>()
                .map(Some)
                .map_err(|e| CacheError::InvalidValue {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Remove both entries of a task.
    pub async fn clear(&self, task_id: &str) -> Result<(), CacheError> {
        self.inner
            .delete(&[status_key(task_id), progress_key(task_id)])
            .await
    }
}
