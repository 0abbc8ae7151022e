//! # Scheduler
//!
//! Maps a [`Schedule`] and a reference instant to the next run instant. All arithmetic is
//! done in UTC.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tasker_flow::scheduler::{parse_schedule, Schedule};
//!
//! let from = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
//! let next = parse_schedule(&Schedule::cron("30 12 * * *"), from).unwrap();
//! assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap());
//! ```

pub mod cron;
pub mod runner;
pub mod scheduled_task;

pub use cron::{CronExpression, RollUnit};
pub use runner::ScheduleRunner;
pub use scheduled_task::ScheduledTask;

use crate::error::{ScheduleError, ScheduleErrorCode, ScheduleResult};
use chrono::{DateTime, Datelike, Days, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// When a task should run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "ScheduleSpec")]
pub enum Schedule {
    /// Run once, immediately
    Once,
    /// Every `interval` milliseconds
    Interval { interval: u64 },
    /// Every day at `time` (`HH:MM`)
    Daily { time: String },
    /// Every week on `day_of_week` (0 = Sunday) at `time`
    Weekly {
        #[serde(rename = "dayOfWeek")]
        day_of_week: u8,
        time: String,
    },
    /// Restricted 5-field cron expression
    Cron { expression: String },
}

impl Schedule {
    pub fn once() -> Self {
        Self::Once
    }

    pub fn interval_ms(interval: u64) -> Self {
        Self::Interval { interval }
    }

    pub fn daily(time: impl Into<String>) -> Self {
        Self::Daily { time: time.into() }
    }

    pub fn weekly(day_of_week: u8, time: impl Into<String>) -> Self {
        Self::Weekly {
            day_of_week,
            time: time.into(),
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Self::Cron {
            expression: expression.into(),
        }
    }

    /// Tag used in serialized form and error reports
    pub fn schedule_type(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Interval { .. } => "interval",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Cron { .. } => "cron",
        }
    }

    pub fn is_once(&self) -> bool {
        matches!(self, Self::Once)
    }

    /// Next run instant after `from`
    pub fn next_run(&self, from: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
        parse_schedule(self, from)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => write!(f, "once"),
            Self::Interval { interval } => write!(f, "every {interval}ms"),
            Self::Daily { time } => write!(f, "daily at {time}"),
            Self::Weekly { day_of_week, time } => write!(f, "weekly on day {day_of_week} at {time}"),
            Self::Cron { expression } => write!(f, "cron '{expression}'"),
        }
    }
}

/// Loosely typed schedule record, as found in JSON or TOML input.
///
/// Converting it into a [`Schedule`] reports the missing or malformed field with the
/// matching [`ScheduleErrorCode`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(rename = "type")]
    pub schedule_type: String,
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "dayOfWeek", alias = "day_of_week")]
    pub day_of_week: Option<i64>,
    #[serde(default)]
    pub expression: Option<String>,
}

impl TryFrom<ScheduleSpec> for Schedule {
    type Error = ScheduleError;

    fn try_from(spec: ScheduleSpec) -> Result<Self, Self::Error> {
        let schedule = match spec.schedule_type.as_str() {
            "once" => Schedule::Once,
            "interval" => match spec.interval {
                Some(interval) if interval > 0 => Schedule::Interval {
                    interval: interval as u64,
                },
                other => {
                    return Err(invalid_interval(other.map_or_else(
                        || "missing".to_string(),
                        |v| v.to_string(),
                    )))
                }
            },
            "daily" => Schedule::Daily {
                time: require_time(spec.time, "daily")?,
            },
            "weekly" => {
                let day_of_week = match spec.day_of_week {
                    Some(day) if (0..=6).contains(&day) => day as u8,
                    other => {
                        return Err(invalid_day(other.map_or_else(
                            || "missing".to_string(),
                            |v| v.to_string(),
                        )))
                    }
                };
                Schedule::Weekly {
                    day_of_week,
                    time: require_time(spec.time, "weekly")?,
                }
            }
            "cron" => match spec.expression {
                Some(expression) => Schedule::Cron { expression },
                None => {
                    return Err(ScheduleError::new(
                        ScheduleErrorCode::InvalidCronFormat,
                        "Cron schedule requires an expression",
                    )
                    .with_schedule_type("cron"))
                }
            },
            other => {
                return Err(ScheduleError::new(
                    ScheduleErrorCode::UnknownType,
                    format!("Unknown schedule type: {other}"),
                )
                .with_metadata("type", other))
            }
        };

        // Field contents are checked too, so a converted schedule always resolves
        validate_schedule(&schedule)?;
        Ok(schedule)
    }
}

/// Next run instant for `schedule` relative to `from`
pub fn parse_schedule(schedule: &Schedule, from: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
    match schedule {
        Schedule::Once => Ok(from),
        Schedule::Interval { interval } => {
            if *interval == 0 {
                return Err(invalid_interval("0".to_string()));
            }
            i64::try_from(*interval)
                .ok()
                .and_then(Duration::try_milliseconds)
                .and_then(|delta| from.checked_add_signed(delta))
                .ok_or_else(|| {
                    parse_error("interval", format!("Interval {interval}ms overflows the calendar"))
                })
        }
        Schedule::Daily { time } => {
            let time = parse_time(time, "daily")?;
            let candidate = at_time(from, time, "daily")?;
            if candidate <= from {
                candidate
                    .checked_add_days(Days::new(1))
                    .ok_or_else(|| parse_error("daily", "Date overflow"))
            } else {
                Ok(candidate)
            }
        }
        Schedule::Weekly { day_of_week, time } => {
            if *day_of_week > 6 {
                return Err(invalid_day(day_of_week.to_string()));
            }
            let time = parse_time(time, "weekly")?;
            let today = from.weekday().num_days_from_sunday();
            let mut days_until = (u32::from(*day_of_week) + 7 - today) % 7;
            if days_until == 0 {
                days_until = 7;
            }
            let target = from
                .checked_add_days(Days::new(u64::from(days_until)))
                .ok_or_else(|| parse_error("weekly", "Date overflow"))?;
            at_time(target, time, "weekly")
        }
        Schedule::Cron { expression } => CronExpression::parse(expression)?.next_after(from),
    }
}

/// Convert a loose record and resolve it in one step
pub fn parse_schedule_spec(spec: ScheduleSpec, from: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
    parse_schedule(&Schedule::try_from(spec)?, from)
}

/// Check a schedule's fields without resolving a run time
pub fn validate_schedule(schedule: &Schedule) -> ScheduleResult<()> {
    match schedule {
        Schedule::Once => Ok(()),
        Schedule::Interval { interval } if *interval == 0 => {
            Err(invalid_interval("0".to_string()))
        }
        Schedule::Interval { .. } => Ok(()),
        Schedule::Daily { time } => parse_time(time, "daily").map(|_| ()),
        Schedule::Weekly { day_of_week, .. } if *day_of_week > 6 => {
            Err(invalid_day(day_of_week.to_string()))
        }
        Schedule::Weekly { time, .. } => parse_time(time, "weekly").map(|_| ()),
        Schedule::Cron { expression } => CronExpression::parse(expression).map(|_| ()),
    }
}

/// Parse `HH:MM` (hour may be one digit) into a time of day
pub fn parse_time(time: &str, schedule_type: &str) -> ScheduleResult<NaiveTime> {
    let format_error = |message: String| {
        ScheduleError::new(ScheduleErrorCode::InvalidTimeFormat, message)
            .with_schedule_type(schedule_type)
            .with_metadata("time", time)
    };

    let (hours, minutes) = time
        .split_once(':')
        .filter(|(h, m)| {
            (1..=2).contains(&h.len())
                && m.len() == 2
                && h.bytes().all(|b| b.is_ascii_digit())
                && m.bytes().all(|b| b.is_ascii_digit())
        })
        .ok_or_else(|| format_error(format!("Time '{time}' must match HH:MM")))?;

    let hours: u32 = hours
        .parse()
        .map_err(|e| format_error(format!("Invalid hour in '{time}'")).with_cause(e))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|e| format_error(format!("Invalid minute in '{time}'")).with_cause(e))?;

    if hours > 23 || minutes > 59 {
        return Err(format_error(format!(
            "Time '{time}' out of range (00:00-23:59)"
        )));
    }

    NaiveTime::from_hms_opt(hours, minutes, 0)
        .ok_or_else(|| format_error(format!("Time '{time}' out of range")))
}

fn at_time(
    date: DateTime<Utc>,
    time: NaiveTime,
    schedule_type: &str,
) -> ScheduleResult<DateTime<Utc>> {
    Utc.from_local_datetime(&date.date_naive().and_time(time))
        .single()
        .ok_or_else(|| parse_error(schedule_type, "Ambiguous local time"))
}

fn require_time(time: Option<String>, schedule_type: &str) -> ScheduleResult<String> {
    time.ok_or_else(|| {
        ScheduleError::new(
            ScheduleErrorCode::InvalidTime,
            format!("{schedule_type} schedule requires a time"),
        )
        .with_schedule_type(schedule_type)
    })
}

fn invalid_interval(got: String) -> ScheduleError {
    ScheduleError::new(
        ScheduleErrorCode::InvalidInterval,
        format!("Interval must be a positive number of milliseconds, got {got}"),
    )
    .with_schedule_type("interval")
}

fn invalid_day(got: String) -> ScheduleError {
    ScheduleError::new(
        ScheduleErrorCode::InvalidDay,
        format!("dayOfWeek must be within 0-6, got {got}"),
    )
    .with_schedule_type("weekly")
}

fn parse_error(schedule_type: &str, message: impl Into<String>) -> ScheduleError {
    ScheduleError::new(ScheduleErrorCode::ParseError, message).with_schedule_type(schedule_type)
}
