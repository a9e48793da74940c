//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What Stop does with conversions that are still running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Cancel running conversions and mark their tasks Failed with
    /// "interrupted by shutdown".
    #[default]
    Interrupt,
    /// Let running conversions finish (bounded by the conversion timeout).
    Drain,
}

/// Configuration for the task engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often the scanner polls for queued tasks (milliseconds).
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,

    /// Maximum tasks claimed per scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Capacity of the dispatch queue between scanner and workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Deadline for a single conversion (seconds).
    #[serde(default = "default_conversion_timeout")]
    pub conversion_timeout_secs: u64,

    /// Deadline for input validation and for probing (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Progress is persisted to the task store every this many percentage
    /// points (plus always at 0 and 100).
    #[serde(default = "default_milestone")]
    pub progress_milestone_pct: u32,

    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,

    /// Fail tasks left in Processing by a previous run when starting.
    #[serde(default = "default_true")]
    pub recover_orphans_on_start: bool,
}

fn default_workers() -> usize {
    2
}

fn default_scan_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_batch_size() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

fn default_conversion_timeout() -> u64 {
    1800 // 30 minutes
}

fn default_probe_timeout() -> u64 {
    60
}

fn default_milestone() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            scan_interval_ms: default_scan_interval(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            conversion_timeout_secs: default_conversion_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            progress_milestone_pct: default_milestone(),
            shutdown_policy: ShutdownPolicy::default(),
            recover_orphans_on_start: true,
        }
    }
}

impl EngineConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_scan_interval_ms(mut self, ms: u64) -> Self {
        self.scan_interval_ms = ms;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.conversion_timeout_secs = secs;
        self
    }

    pub fn with_probe_timeout_secs(mut self, secs: u64) -> Self {
        self.probe_timeout_secs = secs;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }
}
