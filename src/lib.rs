#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Flow
//!
//! In-process task orchestration: retrying tasks, bounded-concurrency queues and workers,
//! dependency-aware workflows with compensating rollback, and schedule resolution.
//!
//! ## Overview
//!
//! A [`Task`] is an immutable description of one unit of asynchronous work together with
//! its execution policy (priority, timeout, retry count). Tasks flow through one of two
//! paths:
//!
//! - enqueued into a [`TaskQueue`] and drained by a [`Worker`], which keeps at most
//!   `max_concurrent` tasks in flight and emits lifecycle events, or
//! - assembled into a [`Workflow`] whose steps run in dependency order, sequentially or
//!   layer by layer, sharing outputs through a [`WorkflowContext`].
//!
//! Independently, a [`Schedule`] resolves to its next run instant, and a
//! [`ScheduleRunner`] feeds due [`ScheduledTask`]s into a worker.
//!
//! Every expected failure is a value. Queue, schedule and workflow operations return
//! typed errors with stable codes; panics inside caller closures are caught at the
//! execution boundary.
//!
//! ## Module Organization
//!
//! - [`task`] - Task definition, builder and results
//! - [`queue`] - Value-type task queue
//! - [`execution`] - Retry/timeout attempt runner and the worker pool
//! - [`scheduler`] - Schedule resolution, scheduled tasks and the schedule runner
//! - [`transaction`] - Execute/rollback step lists
//! - [`workflow`] - Dependency graphs of steps
//! - [`state_machine`] - Task, transaction and worker states
//! - [`events`] - Broadcast lifecycle event publisher
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Structured error handling
//! - [`validation`] - Pre-flight checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tasker_flow::{QueueConfig, Task, TaskError, TaskPriority, TaskQueue, Worker};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TaskQueue::with_config("emails", QueueConfig::default().with_priority(true));
//! let worker = Worker::with_defaults(queue);
//!
//! let send = Task::builder("send-welcome", |_: ()| async { Ok::<_, TaskError>(json!("sent")) })
//!     .priority(TaskPriority::High)
//!     .retries(2)
//!     .build();
//!
//! worker.enqueue(send)?;
//! worker.start();
//! worker.wait_until_idle().await;
//! worker.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod state_machine;
pub mod task;
pub mod transaction;
pub mod validation;
pub mod workflow;

pub use config::{LoggingConfig, QueueConfig, TaskerFlowConfig, WorkerConfig};
pub use constants::{defaults, events as lifecycle_events, system, WorkerEventKind};
pub use error::{
    QueueError, QueueErrorCode, QueueResult, Result, RollbackFailure, ScheduleError,
    ScheduleErrorCode, ScheduleResult, TaskError, TaskErrorCode, TaskFailure, TaskResultOf,
    TaskerFlowError, TransactionError, WorkflowError, WorkflowErrorCode, WorkflowResult,
};
pub use events::{EventPublisher, PublishedEvent};
pub use execution::{execute_with_retry, RetryConfig, Worker, WorkerEvent, WorkerStats};
pub use logging::init_structured_logging;
pub use queue::{QueueStats, TaskQueue};
pub use scheduler::{
    parse_schedule, validate_schedule, CronExpression, Schedule, ScheduleRunner, ScheduleSpec,
    ScheduledTask,
};
pub use state_machine::{TaskStatus, TransactionStatus, WorkerState};
pub use task::{Task, TaskBuilder, TaskHandler, TaskPriority, TaskResult};
pub use transaction::{Transaction, TransactionStep};
pub use validation::{is_valid_schedule, is_valid_task, is_valid_workflow};
pub use workflow::{
    execute_workflow, validate_workflow, DependencyGraph, Workflow, WorkflowContext, WorkflowStep,
};
