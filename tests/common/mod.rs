//! Shared builders and strategies for the integration tests

#![allow(dead_code)]

pub mod strategies;

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tasker_flow::{Task, TaskError, WorkflowStep};

/// Ordered record of side effects observed during a test
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Queueable task that succeeds immediately with `value`
pub fn instant_task(name: &str, value: Value) -> Task<(), Value, TaskError> {
    Task::new(name, move |_: ()| {
        let value = value.clone();
        async move { Ok(value) }
    })
}

/// Queueable task that always fails
pub fn failing_task(name: &str) -> Task<(), Value, TaskError> {
    let message = format!("{name} failed");
    Task::new(name, move |_: ()| {
        let message = message.clone();
        async move { Err(TaskError::execution_failed(message)) }
    })
}

/// Workflow step returning `value`, recording its rollback in `log`
pub fn reversible_step(id: &str, value: Value, log: &CallLog) -> WorkflowStep {
    let task = Task::new(id, move |_: Value| {
        let value = value.clone();
        async move { Ok(value) }
    });
    let log = Arc::clone(log);
    let rollback_name = format!("{id}.rollback");
    WorkflowStep::new(id, task).with_rollback(move |_| {
        let log = Arc::clone(&log);
        let entry = rollback_name.clone();
        async move {
            log.lock().push(entry);
            Ok(())
        }
    })
}

/// Workflow step whose task always fails
pub fn failing_step(id: &str) -> WorkflowStep {
    let message = format!("{id} failed");
    let task = Task::new(id, move |_: Value| {
        let message = message.clone();
        async move { Err(TaskError::execution_failed(message)) }
    });
    WorkflowStep::new(id, task)
}

/// Workflow step returning `{"step": id}`
pub fn marker_step(id: &str) -> WorkflowStep {
    let marker = json!({ "step": id });
    let task = Task::new(id, move |_: Value| {
        let marker = marker.clone();
        async move { Ok(marker) }
    });
    WorkflowStep::new(id, task)
}
