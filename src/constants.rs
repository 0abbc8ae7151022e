//! # System Constants
//!
//! Lifecycle event names and the default execution policy shared by queues, workers
//! and workflows.

use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by workers and workflows
pub mod events {
    // Worker task lifecycle events
    pub const TASK_START: &str = "task:start";
    pub const TASK_COMPLETE: &str = "task:complete";
    pub const TASK_FAIL: &str = "task:fail";

    // Worker control events
    pub const WORKER_STARTED: &str = "worker:started";
    pub const WORKER_STOPPED: &str = "worker:stopped";

    // Workflow step and rollback events
    pub const WORKFLOW_STEP_COMPLETED: &str = "workflow:step_completed";
    pub const WORKFLOW_STEP_FAILED: &str = "workflow:step_failed";
    pub const WORKFLOW_ROLLBACK_STARTED: &str = "workflow:rollback_started";
}

/// Default queue execution policy
pub mod defaults {
    pub const MAX_CONCURRENT: usize = 5;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAY_MS: u64 = 1000;
    pub const TIMEOUT_MS: u64 = 30_000;
    pub const BACKOFF_MULTIPLIER: f64 = 1.0;
    pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

    pub const POLL_INTERVAL_MS: u64 = 100;
    pub const MAX_POLL_INTERVAL_MS: u64 = 1000;
    pub const EVENT_BUFFER_SIZE: usize = 1000;

    /// Tick period of the schedule runner
    pub const SCHEDULE_TICK_MS: u64 = 1000;
}

/// System-wide limits
pub mod system {
    pub const MAX_WORKFLOW_STEPS: usize = 1000;
}

/// Worker lifecycle event kinds, keyed to the names in [`events`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerEventKind {
    #[serde(rename = "task:start")]
    TaskStart,
    #[serde(rename = "task:complete")]
    TaskComplete,
    #[serde(rename = "task:fail")]
    TaskFail,
}

impl WorkerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStart => events::TASK_START,
            Self::TaskComplete => events::TASK_COMPLETE,
            Self::TaskFail => events::TASK_FAIL,
        }
    }
}

impl std::fmt::Display for WorkerEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            events::TASK_START => Ok(Self::TaskStart),
            events::TASK_COMPLETE => Ok(Self::TaskComplete),
            events::TASK_FAIL => Ok(Self::TaskFail),
            _ => Err(format!("Unknown worker event: {s}")),
        }
    }
}
