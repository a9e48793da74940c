//! Per-task cancellation handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Cancellation signal for one claimed task.
///
/// The token fires either because a user asked for the task to be cancelled
/// or because the engine is shutting down; `is_requested` tells them apart.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    requested: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ask for the task to be cancelled.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// True if a cancel was asked for (as opposed to a shutdown interrupt).
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Handles of every task the engine currently owns, keyed by task ID.
#[derive(Debug, Default)]
pub(crate) struct CancelRegistry {
    handles: Mutex<HashMap<String, CancelHandle>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handle whose token is a child of `parent`.
    pub fn register(&self, task_id: &str, parent: &CancellationToken) -> CancelHandle {
        let handle = CancelHandle::new(parent.child_token());
        self.handles
            .lock()
            .unwrap()
            .insert(task_id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, task_id: &str) -> Option<CancelHandle> {
        self.handles.lock().unwrap().get(task_id).cloned()
    }

    pub fn remove(&self, task_id: &str) {
        self.handles.lock().unwrap().remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}
