//! Pre-flight validation for tasks, schedules and workflows
//!
//! Nothing here runs automatically: callers invoke these checks before enqueueing or
//! executing. The `validate_*` functions explain what is wrong, the `is_valid_*`
//! functions answer yes or no.

use crate::constants::system;
use crate::error::{Result, TaskFailure, TaskerFlowError};
use crate::scheduler::{validate_schedule as check_schedule, Schedule};
use crate::task::Task;
use crate::workflow::{validate_workflow as check_workflow, Workflow};
use serde_json::Value;
use std::collections::HashMap;

/// Maximum nesting depth for metadata values
const MAX_METADATA_DEPTH: usize = 10;

/// Maximum number of keys in a metadata object or items in an array
const MAX_METADATA_KEYS: usize = 1000;

/// Maximum string length for metadata keys and string values
const MAX_METADATA_STRING_LENGTH: usize = 10000;

/// Validates a task: non-empty id and name, positive timeout, bounded metadata
pub fn validate_task<I, O, E>(task: &Task<I, O, E>) -> Result<()> {
    if task.id().trim().is_empty() {
        return Err(TaskerFlowError::ValidationError(
            "Task id must not be empty".to_string(),
        ));
    }
    if task.name().trim().is_empty() {
        return Err(TaskerFlowError::ValidationError(format!(
            "Task {} has an empty name",
            task.id()
        )));
    }
    if task.timeout_ms() == Some(0) {
        return Err(TaskerFlowError::ValidationError(format!(
            "Task {} has a zero timeout",
            task.id()
        )));
    }
    validate_metadata(task.metadata())
}

/// Validates a task's metadata map for size and nesting
pub fn validate_metadata(metadata: &HashMap<String, Value>) -> Result<()> {
    if metadata.len() > MAX_METADATA_KEYS {
        return Err(TaskerFlowError::ValidationError(format!(
            "Too many metadata keys: {} (max: {MAX_METADATA_KEYS})",
            metadata.len()
        )));
    }
    for (key, value) in metadata {
        check_key(key)?;
        validate_json_depth(value, 1)?;
    }
    Ok(())
}

fn check_key(key: &str) -> Result<()> {
    if key.len() > MAX_METADATA_STRING_LENGTH {
        return Err(TaskerFlowError::ValidationError(format!(
            "Metadata key too long: {} chars (max: {MAX_METADATA_STRING_LENGTH})",
            key.len()
        )));
    }
    Ok(())
}

/// Validates JSON depth recursively
fn validate_json_depth(value: &Value, current_depth: usize) -> Result<()> {
    if current_depth > MAX_METADATA_DEPTH {
        return Err(TaskerFlowError::ValidationError(format!(
            "Metadata nesting too deep: {current_depth} (max: {MAX_METADATA_DEPTH})"
        )));
    }

    match value {
        Value::Object(map) => {
            if map.len() > MAX_METADATA_KEYS {
                return Err(TaskerFlowError::ValidationError(format!(
                    "Too many metadata keys: {} (max: {MAX_METADATA_KEYS})",
                    map.len()
                )));
            }
            for (key, val) in map {
                check_key(key)?;
                validate_json_depth(val, current_depth + 1)?;
            }
        }
        Value::Array(arr) => {
            if arr.len() > MAX_METADATA_KEYS {
                return Err(TaskerFlowError::ValidationError(format!(
                    "Metadata array too large: {} items (max: {MAX_METADATA_KEYS})",
                    arr.len()
                )));
            }
            for item in arr {
                validate_json_depth(item, current_depth + 1)?;
            }
        }
        Value::String(s) => {
            if s.len() > MAX_METADATA_STRING_LENGTH {
                return Err(TaskerFlowError::ValidationError(format!(
                    "Metadata string too long: {} chars (max: {MAX_METADATA_STRING_LENGTH})",
                    s.len()
                )));
            }
        }
        _ => {}
    }

    Ok(())
}

/// Validates a schedule's fields without resolving a run time
pub fn validate_schedule(schedule: &Schedule) -> Result<()> {
    check_schedule(schedule)?;
    Ok(())
}

/// Validates a workflow's structure and every step's task
pub fn validate_workflow<E: TaskFailure>(workflow: &Workflow<E>) -> Result<()> {
    if workflow.steps().len() > system::MAX_WORKFLOW_STEPS {
        return Err(TaskerFlowError::ValidationError(format!(
            "Workflow {} has {} steps (max: {})",
            workflow.id(),
            workflow.steps().len(),
            system::MAX_WORKFLOW_STEPS
        )));
    }
    for step in workflow.steps() {
        if step.id().trim().is_empty() {
            return Err(TaskerFlowError::ValidationError(format!(
                "Workflow {} has a step with an empty id",
                workflow.id()
            )));
        }
        validate_task(step.task())?;
    }
    check_workflow(workflow)?;
    Ok(())
}

pub fn is_valid_task<I, O, E>(task: &Task<I, O, E>) -> bool {
    validate_task(task).is_ok()
}

pub fn is_valid_schedule(schedule: &Schedule) -> bool {
    validate_schedule(schedule).is_ok()
}

pub fn is_valid_workflow<E: TaskFailure>(workflow: &Workflow<E>) -> bool {
    validate_workflow(workflow).is_ok()
}
