//! Conversion tasks and their durable storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteTaskStore;
pub use store::{CreateTaskRequest, TaskError, TaskFilter, TaskStore};
pub use types::{ConversionParams, Task, TaskKind, TaskStatus, TaskUpdate};
