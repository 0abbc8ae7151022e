//! Drives [`ScheduledTask`]s into a [`Worker`].
//!
//! A tokio interval ticks at a fixed period; on every tick each due task is enqueued into
//! the worker under a fresh id and its next run is recomputed. `once` schedules are
//! disabled after they fire.

use super::ScheduledTask;
use crate::constants::defaults;
use crate::error::{TaskError, TaskFailure};
use crate::execution::Worker;
use crate::logging::log_error;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ScheduleRunner<O = Value, E = TaskError> {
    worker: Worker<O, E>,
    tasks: Arc<Mutex<Vec<ScheduledTask<O, E>>>>,
    tick_interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<O, E> ScheduleRunner<O, E>
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    pub fn new(worker: Worker<O, E>) -> Self {
        Self::with_tick_interval(worker, Duration::from_millis(defaults::SCHEDULE_TICK_MS))
    }

    pub fn with_tick_interval(worker: Worker<O, E>, tick_interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            worker,
            tasks: Arc::new(Mutex::new(Vec::new())),
            tick_interval,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    pub fn worker(&self) -> &Worker<O, E> {
        &self.worker
    }

    /// Register a scheduled task, replacing any with the same id
    pub fn add(&self, scheduled: ScheduledTask<O, E>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| t.id() != scheduled.id());
        debug!(
            scheduled_id = %scheduled.id(),
            schedule = %scheduled.schedule,
            next_run = ?scheduled.next_run,
            "Scheduled task registered"
        );
        tasks.push(scheduled);
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.id() != id);
        tasks.len() != before
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.iter_mut().find(|t| t.id() == id) {
            Some(task) => {
                *task = task.with_enabled(enabled);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the registered tasks
    pub fn tasks(&self) -> Vec<ScheduledTask<O, E>> {
        self.tasks.lock().clone()
    }

    /// Fire everything due at `now`; returns the ids of the scheduled tasks that fired
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<String> {
        fire_due(&self.tasks, &self.worker, now)
    }

    /// Start ticking. Calling `start` twice does nothing. Must run inside a tokio runtime.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let tasks = Arc::clone(&self.tasks);
        let worker = self.worker.clone();
        let period = self.tick_interval;

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        fire_due(&tasks, &worker, Utc::now());
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
        info!(
            tick_ms = period.as_millis() as u64,
            "⏰ Schedule runner started"
        );
    }

    pub async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.shutdown.send_replace(true);
            if let Err(e) = handle.await {
                log_error("schedule_runner", "stop", &e.to_string(), None);
            }
            info!("Schedule runner stopped");
        }
    }
}

fn fire_due<O, E>(
    tasks: &Mutex<Vec<ScheduledTask<O, E>>>,
    worker: &Worker<O, E>,
    now: DateTime<Utc>,
) -> Vec<String>
where
    O: Clone + Send + 'static,
    E: TaskFailure,
{
    let mut fired = Vec::new();
    let mut tasks = tasks.lock();

    for scheduled in tasks.iter_mut() {
        if !scheduled.should_run(now) {
            continue;
        }

        let run = scheduled.task.with_fresh_id();
        if let Err(error) = worker.enqueue(run) {
            warn!(
                scheduled_id = %scheduled.id(),
                error = %error,
                "Failed to enqueue scheduled task"
            );
            continue;
        }
        fired.push(scheduled.id().to_string());

        *scheduled = if scheduled.schedule.is_once() {
            let mut done = scheduled.with_enabled(false);
            done.last_run = Some(now);
            done.next_run = None;
            done
        } else {
            match scheduled.update_next_run(now) {
                Ok(next) => next,
                Err(error) => {
                    log_error(
                        "schedule_runner",
                        "update_next_run",
                        &error.to_string(),
                        Some(scheduled.id()),
                    );
                    scheduled.with_enabled(false)
                }
            }
        };
    }

    if !fired.is_empty() {
        debug!(count = fired.len(), "Scheduled tasks fired");
    }
    fired
}
