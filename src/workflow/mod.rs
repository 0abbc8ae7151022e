//! # Workflows
//!
//! A workflow is a set of named steps, each wrapping a [`Task`], connected by dependency
//! edges. Steps run either one after another in declaration order or in dependency layers
//! with every ready step running concurrently. Each successful output lands in the
//! [`WorkflowContext`] under its step id, where later steps can read it to build their
//! input. Transactional workflows compensate completed steps in reverse completion order
//! when a step fails.
//!
//! ```rust,no_run
//! use serde_json::{json, Value};
//! use tasker_flow::workflow::{Workflow, WorkflowStep};
//! use tasker_flow::{Task, TaskError};
//!
//! # async fn example() -> Result<(), tasker_flow::WorkflowError> {
//! let fetch = Task::new("fetch", |_: Value| async { Ok::<_, TaskError>(json!(21)) });
//! let double = Task::new("double", |n: Value| async move {
//!     Ok::<_, TaskError>(json!(n.as_i64().unwrap_or_default() * 2))
//! });
//!
//! let workflow = Workflow::new(
//!     "numbers",
//!     vec![
//!         WorkflowStep::new("fetch", fetch),
//!         WorkflowStep::new("double", double)
//!             .depends_on(["fetch"])
//!             .with_input(|ctx| ctx.get("fetch").cloned().unwrap_or_default()),
//!     ],
//! );
//!
//! workflow.validate()?;
//! let context = workflow.execute().await?;
//! assert_eq!(context.get("double"), Some(&json!(42)));
//! # Ok(())
//! # }
//! ```

mod context;
mod executor;
mod graph;

pub use context::WorkflowContext;
pub use executor::execute_workflow;
pub use graph::{DependencyGraph, ReadySet};

use crate::constants::defaults;
use crate::error::{TaskError, TaskFailure, WorkflowError, WorkflowErrorCode, WorkflowResult};
use crate::task::Task;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Builds a step's input from the outputs collected so far
pub type StepInputFn = Arc<dyn Fn(&WorkflowContext) -> Value + Send + Sync>;

/// Observer invoked with a step's output or error
pub type StepCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Compensation for a completed step; receives that step's output
pub type StepRollbackFn<E> = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// One node of a workflow
pub struct WorkflowStep<E = TaskError> {
    id: String,
    name: String,
    task: Task<Value, Value, E>,
    input: Option<StepInputFn>,
    depends_on: Vec<String>,
    on_success: Option<StepCallback<Value>>,
    on_error: Option<StepCallback<E>>,
    rollback: Option<StepRollbackFn<E>>,
}

impl<E> Clone for WorkflowStep<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            task: self.task.clone(),
            input: self.input.clone(),
            depends_on: self.depends_on.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            rollback: self.rollback.clone(),
        }
    }
}

impl<E> fmt::Debug for WorkflowStep<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("task", &self.task)
            .field("depends_on", &self.depends_on)
            .field("has_input", &self.input.is_some())
            .field("has_rollback", &self.rollback.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: Send + 'static> WorkflowStep<E> {
    /// Step named after its task, with no dependencies; its input is `null` unless
    /// [`with_input`](Self::with_input) is set
    pub fn new(id: impl Into<String>, task: Task<Value, Value, E>) -> Self {
        Self {
            id: id.into(),
            name: task.name().to_string(),
            task,
            input: None,
            depends_on: Vec::new(),
            on_success: None,
            on_error: None,
            rollback: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, step_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(step_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_input<F>(mut self, input: F) -> Self
    where
        F: Fn(&WorkflowContext) -> Value + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(input));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        self.rollback = Some(Arc::new(move |output| rollback(output).boxed()));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task(&self) -> &Task<Value, Value, E> {
        &self.task
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn has_rollback(&self) -> bool {
        self.rollback.is_some()
    }
}

pub struct Workflow<E = TaskError> {
    id: String,
    name: String,
    steps: Vec<WorkflowStep<E>>,
    parallel: bool,
    transactional: bool,
    retry_delay: Duration,
}

impl<E> Clone for Workflow<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            steps: self.steps.clone(),
            parallel: self.parallel,
            transactional: self.transactional,
            retry_delay: self.retry_delay,
        }
    }
}

impl<E> fmt::Debug for Workflow<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("parallel", &self.parallel)
            .field("transactional", &self.transactional)
            .finish()
    }
}

impl<E: TaskFailure> Workflow<E> {
    /// Sequential, non-transactional workflow with a fresh id
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep<E>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            steps,
            parallel: false,
            transactional: false,
            retry_delay: Duration::from_millis(defaults::RETRY_DELAY_MS),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn transactional(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    /// Delay between attempts of steps whose tasks allow retries
    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay = Duration::from_millis(retry_delay_ms);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[WorkflowStep<E>] {
        &self.steps
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn graph(&self) -> DependencyGraph {
        DependencyGraph::new(self.steps.iter().map(|step| {
            (
                step.id.as_str(),
                step.depends_on.iter().map(String::as_str),
            )
        }))
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        validate_workflow(self)
    }

    pub async fn execute(&self) -> WorkflowResult<WorkflowContext> {
        execute_workflow(self).await
    }
}

/// Pre-flight structural check.
///
/// Rejects, in this order: repeated step ids (`DUPLICATE_STEP`), dependencies on unknown
/// steps (`INVALID_DEPENDENCY`) and dependency cycles (`CIRCULAR_DEPENDENCY`, with the
/// cycle path under the `cycle` metadata key). Execution does not call this itself.
pub fn validate_workflow<E: TaskFailure>(workflow: &Workflow<E>) -> WorkflowResult<()> {
    let graph = workflow.graph();

    if let Some(duplicate) = graph.duplicates().first() {
        return Err(WorkflowError::new(
            WorkflowErrorCode::DuplicateStep,
            &workflow.id,
            format!("Step id '{duplicate}' is declared more than once"),
        )
        .with_step_id(duplicate.clone()));
    }

    if let Some((step_id, missing)) = graph.missing_dependencies().next() {
        return Err(WorkflowError::new(
            WorkflowErrorCode::InvalidDependency,
            &workflow.id,
            format!("Step '{step_id}' depends on unknown step '{missing}'"),
        )
        .with_step_id(step_id)
        .with_metadata("dependency", missing));
    }

    if let Some(cycle) = graph.find_cycle() {
        let path = cycle.join(" -> ");
        return Err(WorkflowError::new(
            WorkflowErrorCode::CircularDependency,
            &workflow.id,
            format!("Circular dependency detected: {path}"),
        )
        .with_step_id(cycle[0].clone())
        .with_metadata("cycle", cycle));
    }

    Ok(())
}
