//! Workflow execution.
//!
//! Sequential workflows walk the steps in declaration order. Parallel workflows run in
//! dependency layers: every step whose dependencies have all committed is spawned onto a
//! `JoinSet`, and the layer settles completely before its outputs are committed and the
//! next layer is computed. On failure a transactional workflow compensates every
//! completed step in reverse completion order.

use super::{StepRollbackFn, Workflow, WorkflowContext, WorkflowStep};
use crate::constants::events;
use crate::error::{TaskError, TaskFailure, WorkflowError, WorkflowErrorCode, WorkflowResult};
use crate::execution::retry::{execute_with_retry, panic_message, RetryConfig};
use crate::logging::log_workflow_operation;
use crate::task::TaskResult;
use crate::transaction::{compensate, Compensation};
use serde_json::Value;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Rollback owed to a completed step
struct PendingRollback<E> {
    step_id: String,
    index: usize,
    rollback: StepRollbackFn<E>,
    output: Value,
}

/// Run `workflow` to completion, returning the outputs of every step.
///
/// The workflow is not validated first: in sequential mode a step whose dependencies have
/// not run fails with `DEPS_NOT_MET`, in parallel mode a graph that stops making progress
/// fails with `CIRCULAR_DEPENDENCY`.
#[instrument(skip(workflow), fields(workflow_id = %workflow.id, workflow_name = %workflow.name))]
pub async fn execute_workflow<E: TaskFailure>(
    workflow: &Workflow<E>,
) -> WorkflowResult<WorkflowContext> {
    log_workflow_operation(
        "execute",
        &workflow.id,
        None,
        "started",
        Some(if workflow.parallel { "parallel" } else { "sequential" }),
    );

    let mut context = WorkflowContext::new();
    let mut rollbacks = Vec::new();

    let outcome = if workflow.parallel {
        run_parallel(workflow, &mut context, &mut rollbacks).await
    } else {
        run_sequential(workflow, &mut context, &mut rollbacks).await
    };

    match outcome {
        Ok(()) => {
            log_workflow_operation("execute", &workflow.id, None, "completed", None);
            info!(
                workflow_id = %workflow.id,
                steps = context.len(),
                "✅ Workflow completed"
            );
            Ok(context)
        }
        Err(error) => {
            log_workflow_operation(
                "execute",
                &workflow.id,
                error.step_id.as_deref(),
                "failed",
                Some(error.code.as_str()),
            );
            if workflow.transactional && error.code.triggers_rollback() {
                roll_back(workflow, rollbacks).await;
            }
            Err(error)
        }
    }
}

async fn run_sequential<E: TaskFailure>(
    workflow: &Workflow<E>,
    context: &mut WorkflowContext,
    rollbacks: &mut Vec<PendingRollback<E>>,
) -> WorkflowResult<()> {
    let mut executed: HashSet<&str> = HashSet::new();

    for (index, step) in workflow.steps.iter().enumerate() {
        if let Some(missing) = step
            .depends_on
            .iter()
            .find(|dep| !executed.contains(dep.as_str()))
        {
            return Err(WorkflowError::new(
                WorkflowErrorCode::DepsNotMet,
                &workflow.id,
                format!("Step '{}' depends on '{missing}', which has not run", step.id),
            )
            .with_step_id(step.id.clone())
            .with_metadata("dependency", missing.as_str()));
        }

        let input = resolve_input(workflow, step, context)?;
        let policy = RetryConfig::for_step(&step.task, workflow.retry_delay);
        debug!(step_id = %step.id, task_id = %step.task.id(), "Executing workflow step");
        let result = execute_with_retry(&step.task, input, &policy).await;

        let output = settle(workflow, step, result)?;
        commit(workflow, index, step, output, context, rollbacks)?;
        executed.insert(step.id.as_str());
    }
    Ok(())
}

async fn run_parallel<E: TaskFailure>(
    workflow: &Workflow<E>,
    context: &mut WorkflowContext,
    rollbacks: &mut Vec<PendingRollback<E>>,
) -> WorkflowResult<()> {
    let graph = workflow.graph();
    let mut ready = graph.ready_set();
    let mut layer = 0;

    while !ready.is_finished() {
        let batch = ready.take_batch();
        if batch.is_empty() {
            let blocked = ready.outstanding();
            return Err(WorkflowError::new(
                WorkflowErrorCode::CircularDependency,
                &workflow.id,
                format!(
                    "No step can make progress; blocked steps: {}",
                    blocked.join(", ")
                ),
            )
            .with_metadata("blocked", blocked));
        }

        layer += 1;
        debug!(
            workflow_id = %workflow.id,
            layer = layer,
            steps = batch.len(),
            "Dispatching workflow layer"
        );

        // Inputs are resolved before anything in the layer starts
        let mut inputs = Vec::with_capacity(batch.len());
        for &node in &batch {
            inputs.push(resolve_input(workflow, &workflow.steps[node], context)?);
        }

        let mut running = JoinSet::new();
        for (&node, input) in batch.iter().zip(inputs) {
            let task = workflow.steps[node].task.clone();
            let policy = RetryConfig::for_step(&task, workflow.retry_delay);
            running.spawn(async move { (node, execute_with_retry(&task, input, &policy).await) });
        }

        let mut settled = Vec::with_capacity(batch.len());
        let mut failure: Option<WorkflowError> = None;
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok((node, result)) => {
                    let step = &workflow.steps[node];
                    match settle(workflow, step, result) {
                        Ok(output) => {
                            if let Some(rollback) = &step.rollback {
                                rollbacks.push(PendingRollback {
                                    step_id: step.id.clone(),
                                    index: node,
                                    rollback: rollback.clone(),
                                    output: output.clone(),
                                });
                            }
                            settled.push((node, output));
                        }
                        Err(error) => {
                            if failure.is_none() {
                                failure = Some(error);
                            }
                        }
                    }
                }
                Err(join_error) if failure.is_none() => {
                    failure = Some(
                        WorkflowError::new(
                            WorkflowErrorCode::ExecutionFailed,
                            &workflow.id,
                            format!("Workflow step did not finish: {join_error}"),
                        )
                        .with_metadata("layer", layer),
                    );
                }
                Err(_) => {}
            }
        }

        if let Some(error) = failure {
            return Err(error);
        }

        for (node, output) in settled {
            let step = &workflow.steps[node];
            if !context.try_insert(step.id.clone(), output.clone()) {
                return Err(duplicate_output(workflow, step));
            }
            ready.complete(node);
            notify_success(workflow, step, &output)?;
        }
    }
    Ok(())
}

/// Evaluate the step's input closure against the context, `null` when it has none
fn resolve_input<E: TaskFailure>(
    workflow: &Workflow<E>,
    step: &WorkflowStep<E>,
    context: &WorkflowContext,
) -> WorkflowResult<Value> {
    match &step.input {
        Some(input) => guard(workflow, step, "input", || input(context)),
        None => Ok(Value::Null),
    }
}

/// Turn a finished attempt run into the step's output or a `STEP_FAILED` error
fn settle<E: TaskFailure>(
    workflow: &Workflow<E>,
    step: &WorkflowStep<E>,
    result: TaskResult<Value, E>,
) -> WorkflowResult<Value> {
    let attempts = result.attempts;
    match result.into_result() {
        Ok(output) => Ok(output),
        Err(error) => {
            let error = error.unwrap_or_else(|| {
                E::from(TaskError::execution_failed("Task failed without an error"))
            });
            warn!(
                workflow_id = %workflow.id,
                step_id = %step.id,
                attempts = attempts,
                error = %error,
                "Workflow step failed"
            );
            log_workflow_operation(
                events::WORKFLOW_STEP_FAILED,
                &workflow.id,
                Some(&step.id),
                "failed",
                Some(&error.to_string()),
            );
            if let Some(on_error) = &step.on_error {
                guard(workflow, step, "on_error", || on_error(&error))?;
            }
            Err(WorkflowError::new(
                WorkflowErrorCode::StepFailed,
                &workflow.id,
                format!("Step '{}' failed: {error}", step.id),
            )
            .with_step_id(step.id.clone())
            .with_metadata("attempts", attempts)
            .with_cause(error))
        }
    }
}

/// Store a sequential step's output, register its rollback and notify `on_success`
fn commit<E: TaskFailure>(
    workflow: &Workflow<E>,
    index: usize,
    step: &WorkflowStep<E>,
    output: Value,
    context: &mut WorkflowContext,
    rollbacks: &mut Vec<PendingRollback<E>>,
) -> WorkflowResult<()> {
    if !context.try_insert(step.id.clone(), output.clone()) {
        return Err(duplicate_output(workflow, step));
    }
    if let Some(rollback) = &step.rollback {
        rollbacks.push(PendingRollback {
            step_id: step.id.clone(),
            index,
            rollback: rollback.clone(),
            output: output.clone(),
        });
    }
    notify_success(workflow, step, &output)
}

fn notify_success<E: TaskFailure>(
    workflow: &Workflow<E>,
    step: &WorkflowStep<E>,
    output: &Value,
) -> WorkflowResult<()> {
    log_workflow_operation(
        events::WORKFLOW_STEP_COMPLETED,
        &workflow.id,
        Some(&step.id),
        "completed",
        None,
    );
    match &step.on_success {
        Some(on_success) => guard(workflow, step, "on_success", || on_success(output)),
        None => Ok(()),
    }
}

fn duplicate_output<E>(workflow: &Workflow<E>, step: &WorkflowStep<E>) -> WorkflowError {
    WorkflowError::new(
        WorkflowErrorCode::DuplicateStep,
        &workflow.id,
        format!("Step id '{}' produced output more than once", step.id),
    )
    .with_step_id(step.id.clone())
}

/// Run caller code for `step`, turning a panic into `EXECUTION_FAILED`
fn guard<E, T>(
    workflow: &Workflow<E>,
    step: &WorkflowStep<E>,
    hook: &str,
    f: impl FnOnce() -> T,
) -> WorkflowResult<T> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|panic| {
        WorkflowError::new(
            WorkflowErrorCode::ExecutionFailed,
            &workflow.id,
            format!(
                "Step '{}' panicked in {hook}: {}",
                step.id,
                panic_message(&*panic)
            ),
        )
        .with_step_id(step.id.clone())
        .with_metadata("hook", hook)
    })
}

/// Compensate completed steps, most recently completed first
async fn roll_back<E: TaskFailure>(workflow: &Workflow<E>, rollbacks: Vec<PendingRollback<E>>) {
    if rollbacks.is_empty() {
        return;
    }
    log_workflow_operation(
        events::WORKFLOW_ROLLBACK_STARTED,
        &workflow.id,
        None,
        "rolling_back",
        Some(&format!("{} steps", rollbacks.len())),
    );

    let compensations = rollbacks
        .into_iter()
        .rev()
        .map(|pending| {
            let PendingRollback {
                step_id,
                index,
                rollback,
                output,
            } = pending;
            Compensation {
                label: step_id,
                index,
                action: Box::new(move || rollback(output)),
            }
        })
        .collect();
    let failures = compensate(&workflow.id, compensations).await;

    info!(
        workflow_id = %workflow.id,
        rollback_failures = failures.len(),
        "↩️ Workflow rolled back"
    );
}
