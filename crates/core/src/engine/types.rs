//! Types for the task engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{TaskError, TaskStatus};

/// Errors returned by engine control operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task's status does not allow the operation.
    #[error("task {task_id} is {status}")]
    InvalidState { task_id: String, status: TaskStatus },

    /// Task store error.
    #[error("task store error: {0}")]
    Store(#[from] TaskError),
}

/// Lifecycle of an engine instance. Only moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Running,
    Stopped,
}

impl LifecycleState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LifecycleState::NotStarted => 0,
            LifecycleState::Running => 1,
            LifecycleState::Stopped => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::NotStarted,
            1 => LifecycleState::Running,
            _ => LifecycleState::Stopped,
        }
    }
}

/// Snapshot of the engine for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: LifecycleState,
    pub workers: usize,
    /// Workers currently executing a task.
    pub busy_workers: usize,
    /// Claimed tasks waiting in the dispatch queue.
    pub queue_depth: usize,
    /// Claimed tasks the engine still owns (queued, held back or running).
    pub owned_tasks: usize,
    pub total_claimed: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_canceled: u64,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task was marked Canceled immediately.
    Canceled,
    /// The task is owned by a worker; it will be marked Canceled once its
    /// conversion has stopped.
    Signalled,
}

/// Where a progress reading came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    Cache,
    Store,
}

/// Live view of a task's status and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressView {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub source: ProgressSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_state_roundtrip() {
        for state in [
            LifecycleState::NotStarted,
            LifecycleState::Running,
            LifecycleState::Stopped,
        ] {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_engine_status_serialization() {
        let status = EngineStatus {
            state: LifecycleState::Running,
            workers: 2,
            busy_workers: 1,
            queue_depth: 0,
            owned_tasks: 1,
            total_claimed: 3,
            total_completed: 2,
            total_failed: 0,
            total_canceled: 0,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["busy_workers"], 1);
    }
}
