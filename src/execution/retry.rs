//! Attempt runner shared by queues and workflow steps.
//!
//! Runs a task up to `retries + 1` times. Each attempt is bounded by the timeout (when one
//! applies) and guarded against panics; failed attempts are followed by a delay while
//! attempts remain.

use crate::config::QueueConfig;
use crate::constants::defaults;
use crate::error::{TaskError, TaskFailure};
use crate::task::{Task, TaskResult};
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retry and timeout policy for one task execution
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, always at least one
    pub max_attempts: u32,
    /// Per-attempt timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
    /// Delay before the first retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            timeout: None,
            base_delay: Duration::from_millis(defaults::RETRY_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_RETRY_DELAY_MS),
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// Policy for a task running in a queue; unset task values fall back to the queue's
    pub fn for_queue<I, O, E>(task: &Task<I, O, E>, config: &QueueConfig) -> Self {
        let retries = task.retries().unwrap_or(config.max_retries);
        Self {
            max_attempts: retries.saturating_add(1),
            timeout: Some(Duration::from_millis(
                task.timeout_ms().unwrap_or(config.timeout_ms),
            )),
            base_delay: config.retry_delay(),
            max_delay: config.max_retry_delay(),
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Policy for a task running as a workflow step: only the task's own settings apply
    pub fn for_step<I, O, E>(task: &Task<I, O, E>, retry_delay: Duration) -> Self {
        Self {
            max_attempts: task.retries().unwrap_or(0).saturating_add(1),
            timeout: task.timeout(),
            base_delay: retry_delay,
            ..Self::default()
        }
    }

    /// Delay after the failed attempt numbered `attempt` (1-based), `None` when exhausted
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        // A fixed delay is never clamped below itself
        if factor <= 1.0 {
            return Some(self.base_delay);
        }

        let seconds = self.base_delay.as_secs_f64() * factor;
        let capped = if seconds.is_finite() {
            seconds.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };
        Some(Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay))
    }
}

/// Run `task` with `input` under `policy`, producing its single final [`TaskResult`].
///
/// Never fails: closure errors, timeouts and panics all count as failed attempts.
pub async fn execute_with_retry<I, O, E>(
    task: &Task<I, O, E>,
    input: I,
    policy: &RetryConfig,
) -> TaskResult<O, E>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
    E: TaskFailure,
{
    let started_at = Utc::now();
    let start = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(
            task_id = %task.id(),
            task_name = %task.name(),
            attempt = attempt,
            max_attempts = max_attempts,
            "Executing task attempt"
        );

        let error = match run_attempt(task, input.clone(), policy.timeout).await {
            Ok(value) => {
                return TaskResult::completed(task.id(), value, started_at, start.elapsed(), attempt)
            }
            Err(error) => error,
        };

        match policy.delay_after(attempt).filter(|_| attempt < max_attempts) {
            Some(delay) => {
                warn!(
                    task_id = %task.id(),
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "🔄 Task attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            None => {
                warn!(
                    task_id = %task.id(),
                    attempts = attempt,
                    error = %error,
                    "❌ Task failed after exhausting attempts"
                );
                return TaskResult::failed(task.id(), error, started_at, start.elapsed(), attempt);
            }
        }
    }
}

/// One attempt with timeout and panic catching
async fn run_attempt<I, O, E>(
    task: &Task<I, O, E>,
    input: I,
    timeout: Option<Duration>,
) -> Result<O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: TaskFailure,
{
    // The closure itself runs inside the guard, so a panic before its future exists is
    // caught too
    let guarded = AssertUnwindSafe(async move { task.execute(input).await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(E::from(TaskError::timeout(
                    task.id(),
                    limit.as_millis() as u64,
                )))
            }
        },
        None => guarded.await,
    };

    match outcome {
        Ok(result) => result,
        Err(panic) => Err(E::from(TaskError::panicked(task.id(), panic_message(&*panic)))),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
