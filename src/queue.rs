//! # Task Queue
//!
//! A bounded-concurrency, retrying holding area for tasks.
//!
//! [`TaskQueue`] is a value type: every operation takes `&self` and returns a new queue,
//! leaving the original untouched. A failed operation therefore leaves the caller's queue
//! exactly as it was. Concurrent drivers (see [`Worker`](crate::execution::Worker)) keep
//! the current value in a single-writer cell and swap in each successor.

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult, TaskError, TaskFailure};
use crate::execution::retry::{execute_with_retry, RetryConfig};
use crate::logging::{log_queue_operation, log_task_operation};
use crate::state_machine::TaskStatus;
use crate::task::{Task, TaskResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use tracing::{debug, instrument, warn};

/// Snapshot of list sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStats {
    /// Nothing waiting and nothing executing
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn finished(&self) -> usize {
        self.completed + self.failed
    }
}

/// Queue of tasks taking no input
#[derive(Debug, Clone)]
pub struct TaskQueue<O = Value, E = TaskError> {
    name: String,
    config: QueueConfig,
    pending: Vec<Task<(), O, E>>,
    running: Vec<Task<(), O, E>>,
    completed: Vec<TaskResult<O, E>>,
    failed: Vec<TaskResult<O, E>>,
}

impl<O, E> TaskQueue<O, E>
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    /// Empty queue with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, QueueConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            name: name.into(),
            config,
            pending: Vec::new(),
            running: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Pending tasks, head first
    pub fn pending(&self) -> &[Task<(), O, E>] {
        &self.pending
    }

    pub fn running(&self) -> &[Task<(), O, E>] {
        &self.running
    }

    pub fn completed(&self) -> &[TaskResult<O, E>] {
        &self.completed
    }

    pub fn failed(&self) -> &[TaskResult<O, E>] {
        &self.failed
    }

    /// Whether `task_id` is pending, running or already finished
    pub fn contains(&self, task_id: &str) -> bool {
        self.pending.iter().any(|t| t.id() == task_id)
            || self.running.iter().any(|t| t.id() == task_id)
            || self.completed.iter().any(|r| r.task_id == task_id)
            || self.failed.iter().any(|r| r.task_id == task_id)
    }

    /// Append `task` to the pending list.
    ///
    /// With priority ordering enabled the pending list is re-sorted by rank, keeping
    /// insertion order among equal ranks.
    pub fn enqueue(&self, task: Task<(), O, E>) -> QueueResult<Self> {
        if self.contains(task.id()) {
            return Err(QueueError::duplicate(&self.name, task.id()));
        }

        log_queue_operation(
            "enqueue",
            &self.name,
            Some(task.id()),
            "pending",
            Some(&format!("priority={}", task.priority())),
        );

        let mut next = self.clone();
        next.pending.push(task);
        if next.config.priority_enabled {
            next.pending.sort_by_key(|t| Reverse(t.priority().rank()));
        }
        Ok(next)
    }

    /// Move the head of the pending list to running
    pub fn dequeue(&self) -> QueueResult<(Self, Task<(), O, E>)> {
        if self.pending.is_empty() {
            return Err(QueueError::empty(&self.name));
        }
        if self.running.len() >= self.config.max_concurrent {
            return Err(QueueError::full(
                &self.name,
                self.running.len(),
                self.config.max_concurrent,
            ));
        }

        let mut next = self.clone();
        let task = next.pending.remove(0);
        next.running.push(task.clone());

        log_queue_operation("dequeue", &self.name, Some(task.id()), "running", None);
        Ok((next, task))
    }

    /// Record a finished task: drop it from running and file its result
    pub fn complete(&self, result: TaskResult<O, E>) -> Self {
        let mut next = self.clone();
        let before = next.running.len();
        next.running.retain(|t| t.id() != result.task_id);
        if next.running.len() == before {
            warn!(
                queue = %self.name,
                task_id = %result.task_id,
                "Completing a task that was not running"
            );
        }

        if !TaskStatus::Running.can_transition_to(result.status) {
            warn!(
                queue = %self.name,
                task_id = %result.task_id,
                status = %result.status,
                "Result status is not a finished state; filing it as failed"
            );
        }

        log_task_operation(
            "complete",
            &result.task_id,
            None,
            &result.status.to_string(),
            Some(result.attempts),
            result.error.as_ref().map(|e| e.to_string()).as_deref(),
        );

        match result.status {
            TaskStatus::Completed => next.completed.push(result),
            _ => next.failed.push(result),
        }
        next
    }

    /// Execute a dequeued task under this queue's retry and timeout policy
    pub async fn execute(&self, task: &Task<(), O, E>) -> TaskResult<O, E> {
        execute_with_retry(task, (), &RetryConfig::for_queue(task, &self.config)).await
    }

    /// Dequeue the head task, run it to completion, and return the queue with its result
    /// recorded.
    ///
    /// Fails fast with `QUEUE_EMPTY` or `QUEUE_FULL`; task failures never surface here,
    /// they land in [`failed`](Self::failed).
    #[instrument(skip(self), fields(queue = %self.name))]
    pub async fn process_next(&self) -> QueueResult<Self> {
        let (next, task) = self.dequeue()?;
        debug!(task_id = %task.id(), task_name = %task.name(), "▶️ Processing task");
        let result = next.execute(&task).await;
        Ok(next.complete(result))
    }

    /// Pure projection of list sizes
    pub fn stats(&self) -> QueueStats {
        let pending = self.pending.len();
        let running = self.running.len();
        let completed = self.completed.len();
        let failed = self.failed.len();
        QueueStats {
            pending,
            running,
            completed,
            failed,
            total: pending + running + completed + failed,
        }
    }

    pub fn clear_completed(&self) -> Self {
        Self {
            completed: Vec::new(),
            ..self.clone()
        }
    }

    pub fn clear_failed(&self) -> Self {
        Self {
            failed: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueErrorCode;
    use crate::task::TaskPriority;
    use serde_json::json;

    fn ok_task(name: &str) -> Task<(), Value, TaskError> {
        let output = json!(name);
        Task::new(name, move |_: ()| {
            let output = output.clone();
            async move { Ok(output) }
        })
    }

    fn failing_task(name: &str) -> Task<(), Value, TaskError> {
        Task::new(name, |_: ()| async {
            Err(TaskError::execution_failed("always fails"))
        })
    }

    fn fast_config() -> QueueConfig {
        QueueConfig::default().with_retry_delay_ms(1).with_timeout_ms(1000)
    }

    #[test]
    fn test_priority_enabled_ordering() {
        let queue = TaskQueue::with_config("q", QueueConfig::default().with_priority(true));
        let queue = queue
            .enqueue(ok_task("t1").with_priority(TaskPriority::Low))
            .unwrap()
            .enqueue(ok_task("t2").with_priority(TaskPriority::High))
            .unwrap();

        assert_eq!(queue.pending()[0].name(), "t2");
        assert_eq!(queue.pending()[1].name(), "t1");
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let queue = TaskQueue::with_config("q", QueueConfig::default().with_priority(true));
        let queue = ["a", "b", "c"].iter().fold(queue, |q, name| {
            q.enqueue(ok_task(name)).unwrap()
        });
        let queue = queue
            .enqueue(ok_task("urgent").with_priority(TaskPriority::Critical))
            .unwrap();

        let names: Vec<_> = queue.pending().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["urgent", "a", "b", "c"]);
    }

    #[test]
    fn test_fifo_when_priority_disabled() {
        let queue = TaskQueue::new("q")
            .enqueue(ok_task("t1").with_priority(TaskPriority::Low))
            .unwrap()
            .enqueue(ok_task("t2").with_priority(TaskPriority::Critical))
            .unwrap();

        assert_eq!(queue.pending()[0].name(), "t1");
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let task = ok_task("once");
        let queue = TaskQueue::new("q").enqueue(task.clone()).unwrap();
        let error = queue.enqueue(task).unwrap_err();
        assert_eq!(error.code, QueueErrorCode::DuplicateTask);
        assert_eq!(queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn test_process_next_on_empty_queue() {
        let queue: TaskQueue = TaskQueue::new("empty");
        let error = queue.process_next().await.unwrap_err();
        assert_eq!(error.code, QueueErrorCode::QueueEmpty);
        assert_eq!(error.queue_name, "empty");
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[test]
    fn test_dequeue_respects_concurrency_limit() {
        let queue = TaskQueue::with_config("q", QueueConfig::default().with_max_concurrent(1))
            .enqueue(ok_task("a"))
            .unwrap()
            .enqueue(ok_task("b"))
            .unwrap();

        let (queue, task) = queue.dequeue().unwrap();
        assert_eq!(task.name(), "a");
        assert_eq!(queue.running().len(), 1);

        let error = queue.dequeue().unwrap_err();
        assert_eq!(error.code, QueueErrorCode::QueueFull);
        assert_eq!(queue.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_process_next_records_success() {
        let queue = TaskQueue::with_config("q", fast_config())
            .enqueue(ok_task("works"))
            .unwrap();

        let queue = queue.process_next().await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
        assert!(stats.is_idle());

        let result = &queue.completed()[0];
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.result, Some(json!("works")));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_failing_task_uses_retries_plus_one_attempts() {
        let queue = TaskQueue::with_config("q", fast_config())
            .enqueue(failing_task("broken").with_retries(2))
            .unwrap();

        let queue = queue.process_next().await.unwrap();
        assert_eq!(queue.failed().len(), 1);
        assert_eq!(queue.failed()[0].attempts, 3);
        assert_eq!(queue.failed()[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_inherited_retries_use_queue_max() {
        let queue = TaskQueue::with_config("q", fast_config().with_max_retries(1))
            .enqueue(failing_task("broken").inherit_queue_retries())
            .unwrap();

        let queue = queue.process_next().await.unwrap();
        assert_eq!(queue.failed()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_clear_lists_independently() {
        let queue = TaskQueue::with_config("q", fast_config())
            .enqueue(ok_task("good"))
            .unwrap()
            .enqueue(failing_task("bad"))
            .unwrap();
        let queue = queue.process_next().await.unwrap();
        let queue = queue.process_next().await.unwrap();

        let cleared = queue.clear_completed();
        assert_eq!(cleared.stats().completed, 0);
        assert_eq!(cleared.stats().failed, 1);
        assert_eq!(queue.stats().completed, 1);

        let cleared = queue.clear_failed();
        assert_eq!(cleared.stats().failed, 0);
        assert_eq!(cleared.stats().completed, 1);
        assert_eq!(cleared.stats().total, 1);
    }

    #[test]
    fn test_unfinished_result_is_filed_as_failed() {
        let (queue, task) = TaskQueue::new("q")
            .enqueue(ok_task("odd"))
            .unwrap()
            .dequeue()
            .unwrap();
        let mut result: TaskResult<Value, TaskError> = TaskResult::completed(
            task.id(),
            json!(null),
            chrono::Utc::now(),
            std::time::Duration::ZERO,
            1,
        );
        result.status = TaskStatus::Running;

        let queue = queue.complete(result);
        let stats = queue.stats();
        assert_eq!((stats.running, stats.completed, stats.failed), (0, 0, 1));
    }
}
