//! Scheduled tasks: a task, its schedule, and when it runs next.

use super::{parse_schedule, Schedule};
use crate::error::{ScheduleResult, TaskError};
use crate::task::Task;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// A task paired with the schedule that fires it.
///
/// Only `next_run`, `last_run` and `enabled` change over its life, and they change by
/// producing a new value.
#[derive(Debug)]
pub struct ScheduledTask<O = Value, E = TaskError> {
    pub task: Task<(), O, E>,
    pub schedule: Schedule,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl<O, E> Clone for ScheduledTask<O, E> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            schedule: self.schedule.clone(),
            enabled: self.enabled,
            next_run: self.next_run,
            last_run: self.last_run,
        }
    }
}

impl<O, E> ScheduledTask<O, E> {
    /// Schedule `task`, resolving its first run relative to now
    pub fn new(task: Task<(), O, E>, schedule: Schedule) -> ScheduleResult<Self> {
        Self::starting_at(task, schedule, Utc::now())
    }

    /// Schedule `task`, resolving its first run relative to `from`
    pub fn starting_at(
        task: Task<(), O, E>,
        schedule: Schedule,
        from: DateTime<Utc>,
    ) -> ScheduleResult<Self> {
        let next_run = parse_schedule(&schedule, from)?;
        Ok(Self {
            task,
            schedule,
            enabled: true,
            next_run: Some(next_run),
            last_run: None,
        })
    }

    pub fn id(&self) -> &str {
        self.task.id()
    }

    /// Enabled and due at `now`
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| now >= next)
    }

    /// Record a firing at `now` and resolve the following run from `now`.
    ///
    /// Scheduler errors are returned unchanged.
    pub fn update_next_run(&self, now: DateTime<Utc>) -> ScheduleResult<Self> {
        let next_run = parse_schedule(&self.schedule, now)?;
        Ok(Self {
            next_run: Some(next_run),
            last_run: Some(now),
            ..self.clone()
        })
    }

    pub fn with_enabled(&self, enabled: bool) -> Self {
        Self {
            enabled,
            ..self.clone()
        }
    }
}
