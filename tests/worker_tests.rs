//! Worker pool: concurrency bound, lifecycle events and graceful shutdown

mod common;

use common::{call_log, failing_task, instant_task};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_flow::{
    lifecycle_events, QueueConfig, Task, TaskError, TaskQueue, Worker, WorkerConfig,
    WorkerEventKind, WorkerState,
};

fn worker_with(max_concurrent: usize) -> Worker {
    let queue = TaskQueue::with_config(
        "pool",
        QueueConfig::default()
            .with_max_concurrent(max_concurrent)
            .with_retry_delay_ms(0),
    );
    let config = WorkerConfig {
        poll_interval_ms: 5,
        max_poll_interval_ms: 20,
        ..WorkerConfig::default()
    };
    Worker::new(queue, config)
}

/// Task that tracks how many copies of itself are running at once
fn tracked_task(name: String, active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Task {
    Task::new(name, move |_: ()| {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, TaskError>(Value::Null)
        }
    })
}

async fn idle(worker: &Worker) {
    tokio::time::timeout(Duration::from_secs(10), worker.wait_until_idle())
        .await
        .expect("worker should drain its queue");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_up_to_max_concurrent_at_once() {
    let worker = worker_with(3);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for i in 0..12 {
        worker
            .enqueue(tracked_task(format!("job-{i}"), Arc::clone(&active), Arc::clone(&peak)))
            .unwrap();
    }

    worker.start();
    idle(&worker).await;
    worker.stop().await;

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {peak} exceeded the bound");
    assert!(peak > 1, "tasks never overlapped; the pool ran them one at a time");
    assert_eq!(worker.stats().queue.completed, 12);
}

#[tokio::test]
async fn listeners_fire_once_per_task() {
    let worker = worker_with(2);
    let log = call_log();

    for kind in [
        WorkerEventKind::TaskStart,
        WorkerEventKind::TaskComplete,
        WorkerEventKind::TaskFail,
    ] {
        let log = Arc::clone(&log);
        worker.on(kind, move |event| {
            log.lock().push(format!("{}:{}", event.kind(), event.task_id()));
        });
    }

    let ok = instant_task("ok", json!(1));
    let bad = failing_task("bad");
    let (ok_id, bad_id) = (ok.id().to_string(), bad.id().to_string());
    worker.enqueue(ok).unwrap();
    worker.enqueue(bad).unwrap();

    worker.start();
    idle(&worker).await;
    worker.stop().await;

    let mut entries = log.lock().clone();
    entries.sort();
    let mut expected = vec![
        format!("task:start:{ok_id}"),
        format!("task:complete:{ok_id}"),
        format!("task:start:{bad_id}"),
        format!("task:fail:{bad_id}"),
    ];
    expected.sort();
    assert_eq!(entries, expected);
}

#[tokio::test]
async fn subscribers_receive_published_events() {
    let worker = worker_with(1);
    let mut events = worker.subscribe();

    let task = instant_task("observed", json!("done"));
    let task_id = task.id().to_string();
    worker.enqueue(task).unwrap();
    worker.start();
    idle(&worker).await;
    worker.stop().await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.subject_id == task_id {
            names.push(event.name.clone());
        }
    }
    assert_eq!(
        names,
        vec![lifecycle_events::TASK_START, lifecycle_events::TASK_COMPLETE]
    );
}

#[tokio::test]
async fn stop_lets_in_flight_tasks_finish() {
    let worker = worker_with(2);
    let finished = Arc::new(AtomicUsize::new(0));

    for i in 0..2 {
        let finished = Arc::clone(&finished);
        worker
            .enqueue(Task::new(format!("slow-{i}"), move |_: ()| {
                let finished = Arc::clone(&finished);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TaskError>(Value::Null)
                }
            }))
            .unwrap();
    }

    worker.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.stats().in_flight < 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("both tasks should be dispatched");

    worker.stop().await;
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert_eq!(worker.stats().in_flight, 0);
}

#[tokio::test]
async fn stopped_worker_dequeues_nothing_and_can_restart() {
    let worker = worker_with(1);
    worker.start();
    worker.stop().await;

    worker.enqueue(instant_task("later", json!(null))).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(worker.stats().queue.pending, 1);

    worker.start();
    assert!(worker.is_running());
    idle(&worker).await;
    worker.stop().await;
    assert_eq!(worker.stats().queue.completed, 1);
}

#[tokio::test]
async fn panicking_start_listener_does_not_stall_the_pool() {
    let worker = worker_with(1);
    worker.on(WorkerEventKind::TaskStart, |_| panic!("listener blew up"));

    worker.enqueue(instant_task("first", json!(1))).unwrap();
    worker.enqueue(instant_task("second", json!(2))).unwrap();

    worker.start();
    idle(&worker).await;
    worker.stop().await;

    let stats = worker.stats();
    assert_eq!(stats.queue.completed, 2);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.queue.running, 0);
}

#[tokio::test]
async fn task_panicking_before_it_yields_a_future_frees_its_slot() {
    let worker = worker_with(1);
    worker
        .enqueue(Task::new("eager", |_: ()| {
            if true {
                panic!("synchronous boom");
            }
            async { Ok::<_, TaskError>(Value::Null) }
        }))
        .unwrap();
    worker.enqueue(instant_task("after", json!("ran"))).unwrap();

    worker.start();
    idle(&worker).await;
    worker.stop().await;

    let queue = worker.queue();
    assert_eq!(queue.stats().running, 0);
    assert_eq!(queue.completed().len(), 1);
    assert_eq!(queue.failed().len(), 1);
    assert!(queue.failed()[0]
        .error
        .as_ref()
        .is_some_and(|e| e.message.contains("synchronous boom")));
}
