//! # Tasks
//!
//! A [`Task`] is an immutable description of one unit of asynchronous work plus its
//! execution policy. Derivation helpers never modify a task in place; they return a new
//! value that shares the underlying execute closure.

use crate::error::TaskError;
use crate::state_machine::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Boxed future produced by a task's execute closure
pub type TaskFuture<O, E> = BoxFuture<'static, Result<O, E>>;

/// Shared execute closure
pub type ExecuteFn<I, O, E> = Arc<dyn Fn(I) -> TaskFuture<O, E> + Send + Sync>;

/// Priority rank used by priority-enabled queues
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// `critical(3) > high(2) > normal(1) > low(0)`
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid task priority: {s}")),
        }
    }
}

/// Trait-object friendly source of task behaviour.
///
/// Implementors can be turned into a [`Task`] with [`Task::from_handler`].
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;
    type Error: Send + 'static;

    /// Name given to tasks built from this handler
    fn name(&self) -> &str;

    async fn handle(&self, input: Self::Input) -> Result<Self::Output, Self::Error>;
}

/// One unit of asynchronous work.
///
/// `I` is the input handed to the execute closure (unit for queued tasks), `O` the success
/// value and `E` the failure value.
pub struct Task<I = (), O = Value, E = TaskError> {
    id: String,
    name: String,
    execute: ExecuteFn<I, O, E>,
    priority: TaskPriority,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    metadata: HashMap<String, Value>,
}

impl<I, O, E> Clone for Task<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            execute: Arc::clone(&self.execute),
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            metadata: self.metadata.clone(),
        }
    }
}

impl<I, O, E> fmt::Debug for Task<I, O, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout_ms", &self.timeout_ms)
            .field("retries", &self.retries)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl<I, O, E> Task<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// Create a task with a fresh UUID, normal priority and no retries
    pub fn new<F, Fut>(name: impl Into<String>, execute: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        Self::builder(name, execute).build()
    }

    pub fn builder<F, Fut>(name: impl Into<String>, execute: F) -> TaskBuilder<I, O, E>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
    {
        TaskBuilder {
            id: None,
            name: name.into(),
            execute: Arc::new(move |input| execute(input).boxed()),
            priority: TaskPriority::default(),
            timeout_ms: None,
            retries: Some(0),
            metadata: HashMap::new(),
        }
    }

    /// Wrap a [`TaskHandler`]; the task takes the handler's name
    pub fn from_handler<H>(handler: H) -> Self
    where
        H: TaskHandler<Input = I, Output = O, Error = E>,
    {
        let handler = Arc::new(handler);
        let name = handler.name().to_string();
        Self::new(name, move |input| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(input).await }
        })
    }
}

impl<I, O, E> Task<I, O, E> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// `None` means the owning queue's `max_retries` applies
    pub fn retries(&self) -> Option<u32> {
        self.retries
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// Start one execution of the task
    pub fn execute(&self, input: I) -> TaskFuture<O, E> {
        (self.execute)(input)
    }

    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    /// Same task under a new random id
    pub fn with_fresh_id(&self) -> Self {
        self.with_id(Uuid::new_v4().to_string())
    }

    pub fn with_priority(&self, priority: TaskPriority) -> Self {
        Self {
            priority,
            ..self.clone()
        }
    }

    pub fn with_timeout_ms(&self, timeout_ms: u64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
            ..self.clone()
        }
    }

    pub fn with_retries(&self, retries: u32) -> Self {
        Self {
            retries: Some(retries),
            ..self.clone()
        }
    }

    /// Defer the retry count to the owning queue's `max_retries`
    pub fn inherit_queue_retries(&self) -> Self {
        Self {
            retries: None,
            ..self.clone()
        }
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut task = self.clone();
        task.metadata.insert(key.into(), value.into());
        task
    }
}

impl<I, O, E> Task<I, O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    /// New task whose successful output is transformed by `f`
    pub fn map_output<O2, F>(&self, f: F) -> Task<I, O2, E>
    where
        O2: Send + 'static,
        F: Fn(O) -> O2 + Send + Sync + 'static,
    {
        let execute = Arc::clone(&self.execute);
        let f = Arc::new(f);
        Task {
            id: self.id.clone(),
            name: self.name.clone(),
            execute: Arc::new(move |input| {
                let future = execute(input);
                let f = Arc::clone(&f);
                async move { future.await.map(|output| f(output)) }.boxed()
            }),
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            metadata: self.metadata.clone(),
        }
    }

    /// New queueable task that always runs with `input`
    pub fn bind_input(&self, input: I) -> Task<(), O, E>
    where
        I: Clone + Sync,
    {
        let execute = Arc::clone(&self.execute);
        Task {
            id: self.id.clone(),
            name: self.name.clone(),
            execute: Arc::new(move |()| execute(input.clone())),
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            metadata: self.metadata.clone(),
        }
    }
}

/// Builder for [`Task`] values
pub struct TaskBuilder<I, O, E> {
    id: Option<String>,
    name: String,
    execute: ExecuteFn<I, O, E>,
    priority: TaskPriority,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    metadata: HashMap<String, Value>,
}

impl<I, O, E> TaskBuilder<I, O, E> {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn inherit_queue_retries(mut self) -> Self {
        self.retries = None;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Task<I, O, E> {
        Task {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            execute: self.execute,
            priority: self.priority,
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            metadata: self.metadata,
        }
    }
}

/// Final outcome of a task, produced once when it finishes
#[derive(Debug, Clone)]
pub struct TaskResult<O = Value, E = TaskError> {
    pub task_id: String,
    /// `Completed` or `Failed`
    pub status: TaskStatus,
    pub result: Option<O>,
    pub error: Option<E>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    pub attempts: u32,
}

impl<O, E> TaskResult<O, E> {
    pub fn completed(
        task_id: impl Into<String>,
        value: O,
        started_at: DateTime<Utc>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: Some(value),
            error: None,
            started_at,
            completed_at: Utc::now(),
            duration,
            attempts,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: E,
        started_at: DateTime<Utc>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error),
            started_at,
            completed_at: Utc::now(),
            duration,
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Collapse into a plain `Result`
    pub fn into_result(self) -> Result<O, Option<E>> {
        match (self.status, self.result) {
            (TaskStatus::Completed, Some(value)) => Ok(value),
            _ => Err(self.error),
        }
    }
}
