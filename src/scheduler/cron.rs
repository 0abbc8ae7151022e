//! Restricted cron expressions.
//!
//! `MIN HOUR DOM MON DOW`, each field either a literal number or `*`. Ranges, lists and
//! steps are rejected with `INVALID_CRON_FORMAT`.

use crate::error::{ScheduleError, ScheduleErrorCode, ScheduleResult};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// Upper bound on roll-forward steps before giving up
const MAX_ROLL_STEPS: u32 = 400;

/// Parsed 5-field expression; `None` is a wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronExpression {
    pub minute: Option<u32>,
    pub hour: Option<u32>,
    pub day: Option<u32>,
    pub month: Option<u32>,
    /// 0 = Sunday
    pub day_of_week: Option<u32>,
}

/// Unit added when the resolved instant is not in the future
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollUnit {
    Day,
    Month,
    Year,
}

impl CronExpression {
    pub fn parse(expression: &str) -> ScheduleResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(
                expression,
                format!(
                    "Expected 5 fields (minute hour day month dayOfWeek), found {}",
                    fields.len()
                ),
            ));
        }

        Ok(Self {
            minute: parse_field(expression, "minute", fields[0], 0, 59)?,
            hour: parse_field(expression, "hour", fields[1], 0, 23)?,
            day: parse_field(expression, "day", fields[2], 1, 31)?,
            month: parse_field(expression, "month", fields[3], 1, 12)?,
            day_of_week: parse_field(expression, "dayOfWeek", fields[4], 0, 6)?,
        })
    }

    /// Unit selected by which fields are wildcards
    pub fn roll_unit(&self) -> RollUnit {
        if self.minute.is_some() && self.hour.is_some() && self.day.is_none() {
            RollUnit::Day
        } else if self.day.is_some() && self.month.is_none() {
            RollUnit::Month
        } else {
            RollUnit::Year
        }
    }

    /// Next instant strictly after `from`.
    ///
    /// Set fields overwrite `from`'s values, wildcards keep them, and seconds are zeroed.
    /// A day that overflows its month carries into the next month. When the result is not
    /// after `from` it rolls forward by [`roll_unit`](Self::roll_unit). A fixed day of week
    /// is honoured only when the day of month is a wildcard.
    pub fn next_after(&self, from: DateTime<Utc>) -> ScheduleResult<DateTime<Utc>> {
        let month = self.month.unwrap_or_else(|| from.month());
        let day = self.day.unwrap_or_else(|| from.day());
        let hour = self.hour.unwrap_or_else(|| from.hour());
        let minute = self.minute.unwrap_or_else(|| from.minute());

        let date = NaiveDate::from_ymd_opt(from.year(), month, 1)
            .and_then(|first| first.checked_add_days(Days::new(u64::from(day - 1))))
            .ok_or_else(|| parse_error(format!("Cannot resolve date {}-{month}-{day}", from.year())))?;
        let mut candidate = at_time(date, hour, minute)?;

        let unit = self.roll_unit();
        let mut steps = 0;
        while candidate <= from {
            steps += 1;
            if steps > MAX_ROLL_STEPS {
                return Err(parse_error(format!("No run time found after {from}")));
            }
            candidate = roll(candidate, unit)?;
        }

        if let (Some(target), None) = (self.day_of_week, self.day) {
            let current = candidate.weekday().num_days_from_sunday();
            let ahead = (target + 7 - current) % 7;
            candidate = candidate
                .checked_add_days(Days::new(u64::from(ahead)))
                .ok_or_else(|| parse_error("Date overflow while matching day of week"))?;
        }

        Ok(candidate)
    }
}

impl FromStr for CronExpression {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let field = |value: Option<u32>| value.map_or_else(|| "*".to_string(), |v| v.to_string());
        write!(
            f,
            "{} {} {} {} {}",
            field(self.minute),
            field(self.hour),
            field(self.day),
            field(self.month),
            field(self.day_of_week)
        )
    }
}

fn parse_field(
    expression: &str,
    name: &str,
    raw: &str,
    min: u32,
    max: u32,
) -> ScheduleResult<Option<u32>> {
    if raw == "*" {
        return Ok(None);
    }

    let value: u32 = raw.parse().map_err(|e| {
        invalid(
            expression,
            format!("Field {name} must be a number or '*', got '{raw}'"),
        )
        .with_cause(e)
    })?;

    if !(min..=max).contains(&value) {
        return Err(invalid(
            expression,
            format!("Field {name} must be within {min}-{max}, got {value}"),
        ));
    }
    Ok(Some(value))
}

fn at_time(date: NaiveDate, hour: u32, minute: u32) -> ScheduleResult<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| parse_error(format!("Invalid time {hour:02}:{minute:02}")))
}

fn roll(candidate: DateTime<Utc>, unit: RollUnit) -> ScheduleResult<DateTime<Utc>> {
    let next = match unit {
        RollUnit::Day => candidate.checked_add_days(Days::new(1)),
        RollUnit::Month => candidate.checked_add_months(Months::new(1)),
        RollUnit::Year => candidate.checked_add_months(Months::new(12)),
    };
    next.ok_or_else(|| parse_error(format!("Date overflow rolling {candidate} forward")))
}

fn invalid(expression: &str, message: String) -> ScheduleError {
    ScheduleError::new(ScheduleErrorCode::InvalidCronFormat, message)
        .with_schedule_type("cron")
        .with_metadata("expression", expression)
}

fn parse_error(message: impl Into<String>) -> ScheduleError {
    ScheduleError::new(ScheduleErrorCode::ParseError, message).with_schedule_type("cron")
}
