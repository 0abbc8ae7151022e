//! Schedule resolution, scheduled tasks and the schedule runner

mod common;

use chrono::{Datelike, Duration, TimeZone, Timelike, Utc};
use common::strategies::{instant_strategy, time_of_day_strategy};
use common::instant_task;
use proptest::prelude::*;
use serde_json::json;
use tasker_flow::{
    parse_schedule, QueueConfig, Schedule, ScheduleErrorCode, ScheduleRunner, ScheduledTask,
    TaskQueue, Worker,
};

proptest! {
    /// Property: a daily schedule always lands strictly after `from`, at the requested time
    #[test]
    fn daily_runs_are_in_the_future_at_wall_clock_time(
        from in instant_strategy(),
        (hour, minute) in time_of_day_strategy(),
    ) {
        let schedule = Schedule::daily(format!("{hour:02}:{minute:02}"));
        let next = parse_schedule(&schedule, from).unwrap();

        prop_assert!(next > from);
        prop_assert!(next - from <= Duration::days(1));
        prop_assert_eq!((next.hour(), next.minute(), next.second()), (hour, minute, 0));
    }

    /// Property: a weekly schedule fired on its own weekday lands exactly one week later
    #[test]
    fn weekly_same_day_schedules_next_week(
        from in instant_strategy(),
        (hour, minute) in time_of_day_strategy(),
    ) {
        let day = from.weekday().num_days_from_sunday() as u8;
        let schedule = Schedule::weekly(day, format!("{hour:02}:{minute:02}"));
        let next = parse_schedule(&schedule, from).unwrap();

        prop_assert_eq!(next.date_naive(), from.date_naive() + Duration::days(7));
        prop_assert_eq!((next.hour(), next.minute()), (hour, minute));
    }

    /// Property: interval schedules add exactly their interval
    #[test]
    fn interval_adds_milliseconds(from in instant_strategy(), interval in 1u64..10_000_000) {
        let next = parse_schedule(&Schedule::interval_ms(interval), from).unwrap();
        prop_assert_eq!(next - from, Duration::milliseconds(interval as i64));
    }
}

#[test]
fn cron_fixed_time_rolls_to_next_day() {
    let schedule = Schedule::cron("30 12 * * *");

    let morning = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
    assert_eq!(
        parse_schedule(&schedule, morning).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap()
    );

    let afternoon = Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap();
    assert_eq!(
        parse_schedule(&schedule, afternoon).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 16, 12, 30, 0).unwrap()
    );
}

#[test]
fn cron_rejects_unsupported_syntax() {
    let from = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
    for expression in ["*/5 * * * *", "0 9-17 * * *", "0 0 1,15 * *", "0 0 * *"] {
        let error = parse_schedule(&Schedule::cron(expression), from).unwrap_err();
        assert_eq!(
            error.code,
            ScheduleErrorCode::InvalidCronFormat,
            "expression {expression:?}"
        );
    }
}

#[test]
fn once_returns_reference_instant() {
    let from = Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap();
    assert_eq!(parse_schedule(&Schedule::once(), from).unwrap(), from);
}

#[test]
fn loose_records_map_to_typed_errors() {
    let cases = [
        (json!({"type": "interval"}), ScheduleErrorCode::InvalidInterval),
        (json!({"type": "interval", "interval": -5}), ScheduleErrorCode::InvalidInterval),
        (json!({"type": "daily"}), ScheduleErrorCode::InvalidTime),
        (json!({"type": "daily", "time": "7:5"}), ScheduleErrorCode::InvalidTimeFormat),
        (json!({"type": "weekly", "time": "09:00"}), ScheduleErrorCode::InvalidDay),
        (
            json!({"type": "weekly", "dayOfWeek": 9, "time": "09:00"}),
            ScheduleErrorCode::InvalidDay,
        ),
        (json!({"type": "cron"}), ScheduleErrorCode::InvalidCronFormat),
        (json!({"type": "hourly"}), ScheduleErrorCode::UnknownType),
    ];

    for (record, expected) in cases {
        let error = serde_json::from_value::<Schedule>(record.clone()).unwrap_err();
        assert!(
            error.to_string().contains(expected.as_str()),
            "{record} should fail with {expected}, got {error}"
        );
    }

    let weekly: Schedule =
        serde_json::from_value(json!({"type": "weekly", "dayOfWeek": 1, "time": "09:00"}))
            .unwrap();
    assert_eq!(weekly, Schedule::weekly(1, "09:00"));
}

#[test]
fn update_next_run_advances_from_firing_time() {
    let from = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
    let scheduled = ScheduledTask::starting_at(
        instant_task("report", json!(null)),
        Schedule::daily("09:00"),
        from,
    )
    .unwrap();
    assert_eq!(
        scheduled.next_run,
        Some(Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 0).unwrap())
    );

    let fired = Utc.with_ymd_and_hms(2024, 1, 16, 9, 0, 5).unwrap();
    assert!(scheduled.should_run(fired));
    let updated = scheduled.update_next_run(fired).unwrap();
    assert_eq!(updated.last_run, Some(fired));
    assert_eq!(
        updated.next_run,
        Some(Utc.with_ymd_and_hms(2024, 1, 17, 9, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn runner_feeds_due_tasks_into_worker() {
    let queue = TaskQueue::with_config("scheduled", QueueConfig::default().with_retry_delay_ms(0));
    let worker = Worker::with_defaults(queue);
    let runner = ScheduleRunner::with_tick_interval(worker.clone(), std::time::Duration::from_millis(10));

    runner.add(ScheduledTask::new(instant_task("ping", json!("pong")), Schedule::once()).unwrap());
    worker.start();
    runner.start();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if worker.stats().queue.completed == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduled task should complete");

    runner.stop().await;
    worker.stop().await;

    let tasks = runner.tasks();
    assert!(!tasks[0].enabled);
    assert_eq!(worker.queue().completed()[0].result, Some(json!("pong")));
}
