//! Bounded worker pool draining a [`TaskQueue`].
//!
//! The worker owns the queue value in a single-writer cell. Its control loop acquires a
//! semaphore permit before every dequeue, so at most `max_concurrent` tasks are ever in
//! flight, and dispatches each task onto its own tokio task without waiting for earlier
//! ones to finish.

use crate::config::WorkerConfig;
use crate::constants::{events, WorkerEventKind};
use crate::error::{QueueErrorCode, QueueResult, TaskError, TaskFailure};
use crate::events::{EventPublisher, PublishedEvent};
use crate::execution::retry::{execute_with_retry, panic_message, RetryConfig};
use crate::logging::{log_error, log_task_operation};
use crate::queue::{QueueStats, TaskQueue};
use crate::state_machine::WorkerState;
use crate::task::{Task, TaskResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle event handed to listeners
#[derive(Debug, Clone)]
pub enum WorkerEvent<O = Value, E = TaskError> {
    /// A task was dequeued and dispatched
    TaskStart { task_id: String, task_name: String },
    TaskComplete(TaskResult<O, E>),
    TaskFail(TaskResult<O, E>),
}

impl<O, E> WorkerEvent<O, E> {
    pub fn kind(&self) -> WorkerEventKind {
        match self {
            Self::TaskStart { .. } => WorkerEventKind::TaskStart,
            Self::TaskComplete(_) => WorkerEventKind::TaskComplete,
            Self::TaskFail(_) => WorkerEventKind::TaskFail,
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskStart { task_id, .. } => task_id,
            Self::TaskComplete(result) | Self::TaskFail(result) => &result.task_id,
        }
    }

    /// The finished task's result, absent for `task:start`
    pub fn result(&self) -> Option<&TaskResult<O, E>> {
        match self {
            Self::TaskStart { .. } => None,
            Self::TaskComplete(result) | Self::TaskFail(result) => Some(result),
        }
    }
}

/// Synchronous event listener
pub type EventListener<O, E> = Arc<dyn Fn(&WorkerEvent<O, E>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub state: WorkerState,
    pub in_flight: usize,
    pub dispatched: u64,
    pub queue: QueueStats,
}

/// Concurrent driver for a [`TaskQueue`]
pub struct Worker<O = Value, E = TaskError> {
    inner: Arc<WorkerInner<O, E>>,
}

impl<O, E> Clone for Worker<O, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct WorkerInner<O, E> {
    queue: Mutex<TaskQueue<O, E>>,
    config: WorkerConfig,
    listeners: DashMap<WorkerEventKind, Vec<EventListener<O, E>>>,
    publisher: EventPublisher,
    state: Mutex<WorkerState>,
    shutdown: watch::Sender<bool>,
    /// Signalled when new work is enqueued
    wakeup: Notify,
    /// Signalled whenever a dispatched task is fully finished
    progress: Notify,
    in_flight: AtomicUsize,
    dispatched: AtomicU64,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<O, E> WorkerInner<O, E>
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    /// Run the listeners for `event`, then publish it. A panicking listener is logged and
    /// skipped.
    fn emit(&self, event: &WorkerEvent<O, E>, context: Value) {
        let kind = event.kind();
        // Clone out so listeners may register further listeners without deadlocking
        let listeners: Vec<EventListener<O, E>> = self
            .listeners
            .get(&kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                log_error(
                    "worker",
                    kind.as_str(),
                    &format!("listener panicked: {}", panic_message(&*panic)),
                    Some(event.task_id()),
                );
            }
        }

        self.publisher.publish(kind.as_str(), event.task_id(), context);
    }

    fn transition(&self, next: WorkerState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "Worker state transition");
            *state = next;
            true
        } else {
            false
        }
    }

    fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.pending().is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

/// Releases the in-flight slot of a dispatched task however its dispatch ends
struct InFlightGuard<O, E> {
    inner: Arc<WorkerInner<O, E>>,
}

impl<O, E> Drop for InFlightGuard<O, E> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.inner.progress.notify_waiters();
    }
}

impl<O, E> Worker<O, E>
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    pub fn new(queue: TaskQueue<O, E>, config: WorkerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        let publisher = EventPublisher::new(config.event_buffer_size);
        Self {
            inner: Arc::new(WorkerInner {
                queue: Mutex::new(queue),
                config,
                listeners: DashMap::new(),
                publisher,
                state: Mutex::new(WorkerState::Idle),
                shutdown,
                wakeup: Notify::new(),
                progress: Notify::new(),
                in_flight: AtomicUsize::new(0),
                dispatched: AtomicU64::new(0),
                handle: Mutex::new(None),
            }),
        }
    }

    pub fn with_defaults(queue: TaskQueue<O, E>) -> Self {
        Self::new(queue, WorkerConfig::default())
    }

    /// Register a synchronous listener for `task:start`, `task:complete` or `task:fail`
    pub fn on<F>(&self, kind: WorkerEventKind, listener: F)
    where
        F: Fn(&WorkerEvent<O, E>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .entry(kind)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Receive every lifecycle event as a [`PublishedEvent`]
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.inner.publisher.subscribe()
    }

    /// Enqueue through the worker's queue cell and wake the control loop
    pub fn enqueue(&self, task: Task<(), O, E>) -> QueueResult<()> {
        {
            let mut queue = self.inner.queue.lock();
            let next = queue.enqueue(task)?;
            *queue = next;
        }
        self.inner.wakeup.notify_one();
        Ok(())
    }

    /// Copy of the current queue value
    pub fn queue(&self) -> TaskQueue<O, E> {
        self.inner.queue.lock().clone()
    }

    pub fn state(&self) -> WorkerState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    pub fn stats(&self) -> WorkerStats {
        let queue = self.inner.queue.lock().stats();
        WorkerStats {
            state: self.state(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            dispatched: self.inner.dispatched.load(Ordering::SeqCst),
            queue,
        }
    }

    /// Start the control loop. Calling `start` on a running worker does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        if !self.inner.transition(WorkerState::Running) {
            debug!(state = %self.state(), "Worker already started");
            return;
        }

        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_loop(inner, shutdown));
        *self.inner.handle.lock() = Some(handle);

        let queue_name = self.inner.queue.lock().name().to_string();
        info!(queue = %queue_name, "🚀 Worker started");
        self.inner
            .publisher
            .publish(events::WORKER_STARTED, queue_name, Value::Null);
    }

    /// Stop dequeuing and wait for every already-dispatched task to finish
    pub async fn stop(&self) {
        let handle = self.inner.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };

        self.inner.transition(WorkerState::Stopping);
        self.inner.shutdown.send_replace(true);

        if let Err(e) = handle.await {
            log_error("worker", "stop", &e.to_string(), None);
        }

        self.inner.transition(WorkerState::Stopped);
        let queue_name = self.inner.queue.lock().name().to_string();
        info!(queue = %queue_name, "🛑 Worker stopped");
        self.inner
            .publisher
            .publish(events::WORKER_STOPPED, queue_name, Value::Null);
    }

    /// Wait until nothing is pending and nothing is in flight.
    ///
    /// Pending tasks are only drained while the worker is running.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.inner.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

async fn run_loop<O, E>(inner: Arc<WorkerInner<O, E>>, mut shutdown: watch::Receiver<bool>)
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    let (queue_name, queue_config) = {
        let queue = inner.queue.lock();
        (queue.name().to_string(), queue.config().clone())
    };
    let max_concurrent = queue_config.max_concurrent.max(1);
    let permits = Arc::new(Semaphore::new(max_concurrent));
    let poll_interval = inner.config.poll_interval();
    let max_poll_interval = inner.config.max_poll_interval();
    let mut backoff = poll_interval;

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.changed() => continue,
        };

        let dequeued = {
            let mut queue = inner.queue.lock();
            match queue.dequeue() {
                Ok((next, task)) => {
                    *queue = next;
                    inner.in_flight.fetch_add(1, Ordering::SeqCst);
                    let guard = InFlightGuard {
                        inner: Arc::clone(&inner),
                    };
                    Ok((task, guard))
                }
                Err(e) => Err(e),
            }
        };

        let (task, guard) = match dequeued {
            Ok(dequeued) => dequeued,
            Err(error) => {
                drop(permit);
                if error.code != QueueErrorCode::QueueEmpty {
                    warn!(queue = %queue_name, error = %error, "Queue refused dequeue");
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = inner.wakeup.notified() => {}
                    _ = shutdown.changed() => {}
                }
                backoff = next_backoff(backoff, max_poll_interval);
                continue;
            }
        };

        backoff = poll_interval;
        inner.dispatched.fetch_add(1, Ordering::SeqCst);
        log_task_operation("dispatch", task.id(), Some(task.name()), "running", None, None);

        inner.emit(
            &WorkerEvent::TaskStart {
                task_id: task.id().to_string(),
                task_name: task.name().to_string(),
            },
            json!({ "task_name": task.name(), "queue": queue_name }),
        );

        let policy = RetryConfig::for_queue(&task, &queue_config);
        tokio::spawn(async move {
            let result = execute_with_retry(&task, (), &policy).await;
            let context = json!({
                "status": result.status,
                "attempts": result.attempts,
                "duration_ms": result.duration_ms(),
                "error": result.error.as_ref().map(|e| e.to_string()),
            });

            {
                let mut queue = guard.inner.queue.lock();
                let next = queue.complete(result.clone());
                *queue = next;
            }

            let event = if result.is_success() {
                WorkerEvent::TaskComplete(result)
            } else {
                WorkerEvent::TaskFail(result)
            };
            guard.inner.emit(&event, context);

            drop(guard);
            drop(permit);
        });
    }

    // Graceful drain: every permit comes back once in-flight tasks finish
    let _ = permits.acquire_many_owned(max_concurrent as u32).await;
    debug!(queue = %queue_name, "Worker loop drained");
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
