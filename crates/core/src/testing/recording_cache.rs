//! Fast cache double that records every write.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::cache::{progress_key, status_key, CacheError, FastCache, InMemoryCache};
use crate::task::TaskStatus;

/// [`FastCache`] that stores values in memory and keeps the full write
/// history, so tests can assert on intermediate states that a plain cache
/// would have overwritten.
///
/// Writes can be made to fail with [`RecordingCache::set_failing`] to
/// exercise cache outages.
#[derive(Debug, Default)]
pub struct RecordingCache {
    inner: InMemoryCache,
    writes: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every value written under `key`, oldest first.
    pub fn values_for(&self, key: &str) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Every status written for a task, oldest first.
    pub fn status_history(&self, task_id: &str) -> Vec<TaskStatus> {
        self.values_for(&status_key(task_id))
            .iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    /// Every progress value written for a task, oldest first.
    pub fn progress_history(&self, task_id: &str) -> Vec<f64> {
        self.values_for(&progress_key(task_id))
            .iter()
            .filter_map(|v| v.parse().ok())
            .collect()
    }

    /// The status currently cached for a task.
    pub async fn last_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner
            .get(&status_key(task_id))
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
    }

    /// Total number of writes recorded.
    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("recording cache set to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl FastCache for RecordingCache {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        self.inner.set(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        self.check()?;
        self.inner.delete(keys).await
    }
}
