//! Worker and task configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lane polled when none is configured.
pub const DEFAULT_LANE: &str = "default";

/// Configuration for one worker actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Lane the worker dequeues from.
    pub lane: String,
    /// Delay between polls of an empty lane.
    pub poll_interval_ms: u64,
    /// Timeout for tasks that do not configure their own.
    pub default_timeout_ms: u64,
    /// Attempts per job, including the first one.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker".to_string(),
            lane: DEFAULT_LANE.to_string(),
            poll_interval_ms: 100,
            default_timeout_ms: 300_000,
            max_attempts: 1,
        }
    }
}

impl WorkerConfig {
    /// Configuration for a worker polling `lane`.
    pub fn new(lane: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            ..Self::default()
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_default_timeout_ms(mut self, default_timeout_ms: u64) -> Self {
        self.default_timeout_ms = default_timeout_ms;
        self
    }

    /// Set the attempt budget. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub(crate) fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Per-task settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfig {
    /// Task timeout in milliseconds. Falls back to the worker default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TaskConfig {
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
