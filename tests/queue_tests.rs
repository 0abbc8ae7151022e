//! TaskQueue behaviour: ordering, bounds, retries and timeouts

mod common;

use chrono::Utc;
use common::strategies::priority_strategy;
use common::{failing_task, instant_task};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_flow::{
    QueueConfig, QueueErrorCode, Task, TaskError, TaskErrorCode, TaskPriority, TaskQueue,
    TaskResult, TaskStatus,
};

fn fast_config() -> QueueConfig {
    QueueConfig::default().with_retry_delay_ms(0)
}

#[test]
fn priority_queue_puts_high_before_low() {
    let queue = TaskQueue::with_config("prioritized", QueueConfig::default().with_priority(true));
    let queue = queue
        .enqueue(instant_task("t1", json!(1)).with_priority(TaskPriority::Low))
        .unwrap()
        .enqueue(instant_task("t2", json!(2)).with_priority(TaskPriority::High))
        .unwrap();

    assert_eq!(queue.pending()[0].name(), "t2");
    assert_eq!(queue.pending()[1].name(), "t1");
}

#[test]
fn fifo_without_priority() {
    let queue = TaskQueue::new("fifo")
        .enqueue(instant_task("first", json!(1)).with_priority(TaskPriority::Low))
        .unwrap()
        .enqueue(instant_task("second", json!(2)).with_priority(TaskPriority::Critical))
        .unwrap();

    let names: Vec<_> = queue.pending().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["first", "second"]);
}

#[tokio::test]
async fn process_next_on_empty_queue_leaves_it_unchanged() {
    let queue = TaskQueue::<Value, TaskError>::new("empty");
    let before = queue.stats();

    let error = queue.process_next().await.unwrap_err();
    assert_eq!(error.code, QueueErrorCode::QueueEmpty);
    assert_eq!(error.queue_name, "empty");
    assert_eq!(queue.stats(), before);
}

#[tokio::test]
async fn process_next_records_success() {
    let queue = TaskQueue::new("work")
        .enqueue(instant_task("answer", json!(42)))
        .unwrap();

    let queue = queue.process_next().await.unwrap();
    let stats = queue.stats();
    assert_eq!((stats.pending, stats.running, stats.completed), (0, 0, 1));

    let result = &queue.completed()[0];
    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.result, Some(json!(42)));
    assert_eq!(result.attempts, 1);
    assert!(result.completed_at >= result.started_at);
}

#[tokio::test]
async fn always_failing_task_uses_every_attempt() {
    for retries in 0..4u32 {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = Task::builder("flaky", move |_: ()| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<Value, _>(TaskError::execution_failed("nope"))
            }
        })
        .retries(retries)
        .build();

        let queue = TaskQueue::with_config("retrying", fast_config())
            .enqueue(task)
            .unwrap()
            .process_next()
            .await
            .unwrap();

        let result = &queue.failed()[0];
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.attempts, retries + 1);
        assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
        assert!(queue.completed().is_empty());
    }
}

#[tokio::test]
async fn inherited_retries_come_from_queue() {
    let queue = TaskQueue::with_config("inherit", fast_config().with_max_retries(2))
        .enqueue(failing_task("broken").inherit_queue_retries())
        .unwrap()
        .process_next()
        .await
        .unwrap();

    assert_eq!(queue.failed()[0].attempts, 3);
}

#[tokio::test]
async fn slow_attempts_time_out() {
    let task = Task::builder("sleepy", |_: ()| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, TaskError>(json!("late"))
    })
    .timeout_ms(20)
    .build();

    let queue = TaskQueue::with_config("timeouts", fast_config())
        .enqueue(task)
        .unwrap()
        .process_next()
        .await
        .unwrap();

    let error = queue.failed()[0].error.as_ref().unwrap();
    assert_eq!(error.code, TaskErrorCode::Timeout);
    assert!(error.is_timeout());
}

#[tokio::test]
async fn panicking_task_is_recorded_as_failure() {
    let task = Task::new("boom", |_: ()| async {
        if true {
            panic!("kaboom");
        }
        Ok::<Value, TaskError>(Value::Null)
    });

    let queue = TaskQueue::with_config("panics", fast_config())
        .enqueue(task)
        .unwrap()
        .process_next()
        .await
        .unwrap();

    let error = queue.failed()[0].error.as_ref().unwrap();
    assert_eq!(error.code, TaskErrorCode::Panicked);
    assert!(error.message.contains("kaboom"));
}

#[test]
fn duplicate_ids_are_rejected() {
    let task = instant_task("once", json!(null));
    let queue = TaskQueue::new("dupes").enqueue(task.clone()).unwrap();

    let error = queue.enqueue(task).unwrap_err();
    assert_eq!(error.code, QueueErrorCode::DuplicateTask);
    assert_eq!(queue.pending().len(), 1);
}

#[test]
fn clearing_lists_touches_only_that_list() {
    let now = Utc::now();
    let queue = TaskQueue::<Value, TaskError>::new("clear")
        .enqueue(instant_task("pending", json!(0)))
        .unwrap()
        .complete(TaskResult::completed("done", json!(1), now, Duration::ZERO, 1))
        .complete(TaskResult::failed(
            "oops",
            TaskError::execution_failed("x"),
            now,
            Duration::ZERO,
            1,
        ));

    let cleared = queue.clear_completed();
    assert_eq!(cleared.stats().completed, 0);
    assert_eq!(cleared.stats().failed, 1);
    assert_eq!(cleared.stats().pending, 1);

    let cleared = queue.clear_failed();
    assert_eq!(cleared.stats().completed, 1);
    assert_eq!(cleared.stats().failed, 0);
}

#[derive(Debug, Clone)]
enum QueueOp {
    Enqueue(TaskPriority),
    Dequeue,
    CompleteOldest,
}

fn op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        priority_strategy().prop_map(QueueOp::Enqueue),
        Just(QueueOp::Dequeue),
        Just(QueueOp::CompleteOldest),
    ]
}

proptest! {
    /// Property: no sequence of operations pushes running past max_concurrent, and every
    /// task id stays in exactly one list
    #[test]
    fn running_never_exceeds_max_concurrent(
        max_concurrent in 1usize..5,
        priority in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 0..60),
    ) {
        let config = QueueConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_priority(priority);
        let mut queue = TaskQueue::<Value, TaskError>::with_config("prop", config);
        let mut enqueued = 0usize;

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                QueueOp::Enqueue(p) => {
                    let task = instant_task(&format!("t{i}"), json!(i)).with_priority(p);
                    queue = queue.enqueue(task).unwrap();
                    enqueued += 1;
                }
                QueueOp::Dequeue => match queue.dequeue() {
                    Ok((next, _)) => queue = next,
                    Err(e) => prop_assert!(matches!(
                        e.code,
                        QueueErrorCode::QueueEmpty | QueueErrorCode::QueueFull
                    )),
                },
                QueueOp::CompleteOldest => {
                    if let Some(task) = queue.running().first() {
                        let result =
                            TaskResult::completed(task.id(), json!(null), Utc::now(), Duration::ZERO, 1);
                        queue = queue.complete(result);
                    }
                }
            }

            let stats = queue.stats();
            prop_assert!(stats.running <= max_concurrent);
            prop_assert_eq!(stats.total, enqueued);
        }
    }
}

#[tokio::test]
async fn panic_before_the_future_exists_is_recorded_as_failure() {
    let task = Task::new("eager", |_: ()| {
        if true {
            panic!("synchronous boom");
        }
        async { Ok::<Value, TaskError>(Value::Null) }
    });

    let queue = TaskQueue::with_config("panics", fast_config())
        .enqueue(task)
        .unwrap()
        .process_next()
        .await
        .unwrap();

    assert_eq!(queue.stats().running, 0);
    let error = queue.failed()[0].error.as_ref().unwrap();
    assert_eq!(error.code, TaskErrorCode::Panicked);
}
