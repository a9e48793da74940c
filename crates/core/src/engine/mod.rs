//! Conversion task engine.
//!
//! Drives queued tasks to a terminal state:
//! - **Scanner**: polls the task store on an interval (or on submit), claims
//!   queued tasks with a conditional update and hands them to the dispatch
//!   queue
//! - **Workers**: a fixed pool, each running one task at a time through
//!   validation, probing and conversion
//! - **Status propagation**: every change goes to the fast cache, while the
//!   task store receives transitions and progress milestones
//!
//! Discovery is polling based and the claim is the only guard against
//! duplicate execution, so several engines may share a store without running
//! a task twice; they will however compete for the same work.

mod cancel;
mod config;
mod propagator;
mod queue;
mod runner;
mod scanner;
mod stats;
mod types;
mod worker;

pub use cancel::CancelHandle;
pub use config::{EngineConfig, ShutdownPolicy};
pub use propagator::{ProgressTracker, ProgressWrite, StatusPropagator};
pub use runner::TaskEngine;
pub use types::{
    CancelOutcome, EngineError, EngineStatus, LifecycleState, ProgressSource, TaskProgressView,
};
