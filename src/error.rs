//! # Error Types
//!
//! Expected failures in tasker-flow are values, never panics. Every public operation
//! returns a `Result` whose error side is one of the records below. Each record carries a
//! closed `code` enum (rendered as the SCREAMING_SNAKE_CASE string callers match on),
//! a human readable `message`, free-form `metadata`, an optional `cause`, and the field
//! identifying the subsystem object it concerns.

use crate::state_machine::TransactionStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Underlying error attached to a failure record
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Free-form structured context attached to a failure record
pub type ErrorMetadata = HashMap<String, Value>;

/// Error types a task closure may fail with.
///
/// Timeouts and panics are raised by the execution layer as [`TaskError`] and converted
/// into the caller's error type through `From<TaskError>`.
pub trait TaskFailure: std::error::Error + From<TaskError> + Clone + Send + Sync + 'static {}

impl<T> TaskFailure for T where T: std::error::Error + From<TaskError> + Clone + Send + Sync + 'static {}

// ─── Task ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskErrorCode {
    /// An attempt exceeded its timeout
    Timeout,
    /// The task's execute closure reported a failure
    ExecutionFailed,
    /// The task's execute closure panicked
    Panicked,
    /// The task definition is not usable
    InvalidTask,
}

impl TaskErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "TIMEOUT",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::Panicked => "PANICKED",
            Self::InvalidTask => "INVALID_TASK",
        }
    }
}

impl fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single task, or of one of its attempts
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct TaskError {
    pub code: TaskErrorCode,
    pub message: String,
    pub task_id: Option<String>,
    pub metadata: ErrorMetadata,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl TaskError {
    pub const NAME: &'static str = "TaskError";

    pub fn new(code: TaskErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            task_id: None,
            metadata: HashMap::new(),
            cause: None,
        }
    }

    /// Attempt abandoned after `timeout_ms`
    pub fn timeout(task_id: &str, timeout_ms: u64) -> Self {
        Self::new(
            TaskErrorCode::Timeout,
            format!("Task {task_id} timed out after {timeout_ms}ms"),
        )
        .with_task_id(task_id)
        .with_metadata("timeout_ms", timeout_ms)
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(TaskErrorCode::ExecutionFailed, message)
    }

    pub fn panicked(task_id: &str, panic_message: impl Into<String>) -> Self {
        let panic_message = panic_message.into();
        Self::new(
            TaskErrorCode::Panicked,
            format!("Task {task_id} panicked: {panic_message}"),
        )
        .with_task_id(task_id)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(TaskErrorCode::InvalidTask, message)
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn is_timeout(&self) -> bool {
        self.code == TaskErrorCode::Timeout
    }
}

// ─── Schedule ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleErrorCode {
    InvalidInterval,
    InvalidTime,
    InvalidTimeFormat,
    InvalidDay,
    InvalidCronFormat,
    UnknownType,
    ParseError,
}

impl ScheduleErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInterval => "INVALID_INTERVAL",
            Self::InvalidTime => "INVALID_TIME",
            Self::InvalidTimeFormat => "INVALID_TIME_FORMAT",
            Self::InvalidDay => "INVALID_DAY",
            Self::InvalidCronFormat => "INVALID_CRON_FORMAT",
            Self::UnknownType => "UNKNOWN_TYPE",
            Self::ParseError => "PARSE_ERROR",
        }
    }
}

impl fmt::Display for ScheduleErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to derive a next-run instant from a schedule
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct ScheduleError {
    pub code: ScheduleErrorCode,
    pub message: String,
    /// Tag of the schedule that failed (`once`, `interval`, `daily`, `weekly`, `cron`)
    pub schedule_type: Option<String>,
    pub metadata: ErrorMetadata,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl ScheduleError {
    pub const NAME: &'static str = "ScheduleError";

    pub fn new(code: ScheduleErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            schedule_type: None,
            metadata: HashMap::new(),
            cause: None,
        }
    }

    pub fn with_schedule_type(mut self, schedule_type: impl Into<String>) -> Self {
        self.schedule_type = Some(schedule_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }
}

// ─── Queue ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueErrorCode {
    QueueEmpty,
    QueueFull,
    DuplicateTask,
}

impl QueueErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueEmpty => "QUEUE_EMPTY",
            Self::QueueFull => "QUEUE_FULL",
            Self::DuplicateTask => "DUPLICATE_TASK",
        }
    }
}

impl fmt::Display for QueueErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a queue operation
#[derive(Debug, Clone, Error)]
#[error("[{code}] queue '{queue_name}': {message}")]
pub struct QueueError {
    pub code: QueueErrorCode,
    pub message: String,
    pub queue_name: String,
    pub task_id: Option<String>,
    pub metadata: ErrorMetadata,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl QueueError {
    pub const NAME: &'static str = "QueueError";

    pub fn new(code: QueueErrorCode, queue_name: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            queue_name: queue_name.to_string(),
            task_id: None,
            metadata: HashMap::new(),
            cause: None,
        }
    }

    pub fn empty(queue_name: &str) -> Self {
        Self::new(QueueErrorCode::QueueEmpty, queue_name, "No pending tasks")
    }

    pub fn full(queue_name: &str, running: usize, max_concurrent: usize) -> Self {
        Self::new(
            QueueErrorCode::QueueFull,
            queue_name,
            format!("Concurrency limit reached ({running}/{max_concurrent} running)"),
        )
        .with_metadata("running", running)
        .with_metadata("max_concurrent", max_concurrent)
    }

    pub fn duplicate(queue_name: &str, task_id: &str) -> Self {
        Self::new(
            QueueErrorCode::DuplicateTask,
            queue_name,
            format!("Task {task_id} is already known to this queue"),
        )
        .with_task_id(task_id)
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Whether a driver loop should back off and poll again rather than give up
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            QueueErrorCode::QueueEmpty | QueueErrorCode::QueueFull
        )
    }
}

// ─── Workflow ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowErrorCode {
    InvalidDependency,
    CircularDependency,
    DepsNotMet,
    StepFailed,
    ExecutionFailed,
    DuplicateStep,
}

impl WorkflowErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidDependency => "INVALID_DEPENDENCY",
            Self::CircularDependency => "CIRCULAR_DEPENDENCY",
            Self::DepsNotMet => "DEPS_NOT_MET",
            Self::StepFailed => "STEP_FAILED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::DuplicateStep => "DUPLICATE_STEP",
        }
    }

    /// Outcomes that trigger compensation on transactional workflows
    pub fn triggers_rollback(&self) -> bool {
        matches!(self, Self::StepFailed | Self::ExecutionFailed)
    }
}

impl fmt::Display for WorkflowErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to validate or execute a workflow
#[derive(Debug, Clone, Error)]
#[error("[{code}] workflow {workflow_id}: {message}")]
pub struct WorkflowError {
    pub code: WorkflowErrorCode,
    pub message: String,
    pub workflow_id: String,
    pub step_id: Option<String>,
    pub metadata: ErrorMetadata,
    #[source]
    pub cause: Option<ErrorCause>,
}

impl WorkflowError {
    pub const NAME: &'static str = "WorkflowError";

    pub fn new(code: WorkflowErrorCode, workflow_id: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            workflow_id: workflow_id.to_string(),
            step_id: None,
            metadata: HashMap::new(),
            cause: None,
        }
    }

    pub fn with_step_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }
}

// ─── Transaction ───────────────────────────────────────────────────

/// A compensation that failed while rolling a transaction back
#[derive(Debug, Clone)]
pub struct RollbackFailure<E> {
    pub step_index: usize,
    pub error: E,
}

/// Failure of a transaction run
#[derive(Debug, Clone, Error)]
pub enum TransactionError<E>
where
    E: std::error::Error + 'static,
{
    /// A step failed; already-executed steps were compensated in reverse order
    #[error("Transaction {transaction_id} failed at step {step_index}: {error}")]
    StepFailed {
        transaction_id: String,
        step_index: usize,
        #[source]
        error: E,
        rollback_failures: Vec<RollbackFailure<E>>,
    },

    /// The transaction already left the pending state
    #[error("Transaction {transaction_id} cannot execute from status {status}")]
    InvalidState {
        transaction_id: String,
        status: TransactionStatus,
    },
}

// ─── Crate level ───────────────────────────────────────────────────

/// Crate-level error used for setup concerns and as a common sink for subsystem errors
#[derive(Debug, Clone, Error)]
pub enum TaskerFlowError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Logging error: {0}")]
    LoggingError(String),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl From<config::ConfigError> for TaskerFlowError {
    fn from(error: config::ConfigError) -> Self {
        TaskerFlowError::ConfigurationError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskerFlowError>;
/// Outcome of a task closure
pub type TaskResultOf<T, E = TaskError> = std::result::Result<T, E>;
pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;
pub type QueueResult<T> = std::result::Result<T, QueueError>;
pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
