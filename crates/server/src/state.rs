use std::sync::Arc;
use convertd_core::{Converter, TaskEngine, TaskStore};

/// Engine over whichever converter the process was started with.
pub type SharedEngine = TaskEngine<Arc<dyn Converter>>;

/// Shared application state
pub struct AppState {
    engine: Arc<SharedEngine>,
    task_store: Arc<dyn TaskStore>,
}

impl AppState {
    pub fn new(engine: Arc<SharedEngine>, task_store: Arc<dyn TaskStore>) -> Self {
        Self { engine, task_store }
    }

    pub fn engine(&self) -> &SharedEngine {
        self.engine.as_ref()
    }

    pub fn task_store(&self) -> &dyn TaskStore {
        self.task_store.as_ref()
    }
}
