//! Transaction commit and compensation ordering

mod common;

use common::{call_log, CallLog};
use std::sync::Arc;
use tasker_flow::{TaskError, Transaction, TransactionError, TransactionStatus, TransactionStep};

fn step(log: &CallLog, name: &'static str, fails: bool) -> TransactionStep {
    let (run_log, undo_log) = (Arc::clone(log), Arc::clone(log));
    TransactionStep::new(
        move || {
            let log = Arc::clone(&run_log);
            async move {
                if fails {
                    return Err(TaskError::execution_failed(format!("{name} refused")));
                }
                log.lock().push(format!("{name}.execute"));
                Ok(())
            }
        },
        move || {
            let log = Arc::clone(&undo_log);
            async move {
                log.lock().push(format!("{name}.rollback"));
                Ok(())
            }
        },
    )
}

#[tokio::test]
async fn all_steps_succeed_and_commit() {
    let log = call_log();
    let tx = Transaction::new(vec![step(&log, "A", false), step(&log, "B", false)]).with_id("tx-1");

    let committed = tx.execute().await.unwrap();
    assert_eq!(committed.id(), "tx-1");
    assert_eq!(committed.status(), TransactionStatus::Committed);
    assert_eq!(*log.lock(), vec!["A.execute", "B.execute"]);
}

#[tokio::test]
async fn failure_rolls_back_only_executed_steps_in_reverse() {
    let log = call_log();
    let tx = Transaction::new(vec![
        step(&log, "A", false),
        step(&log, "B", false),
        step(&log, "C", true),
        step(&log, "D", false),
    ]);

    let error = tx.execute().await.unwrap_err();
    let TransactionError::StepFailed {
        step_index,
        error,
        rollback_failures,
        ..
    } = error
    else {
        panic!("expected a step failure");
    };

    assert_eq!(step_index, 2);
    assert!(error.message.contains("C refused"));
    assert!(rollback_failures.is_empty());
    assert_eq!(
        *log.lock(),
        vec!["A.execute", "B.execute", "B.rollback", "A.rollback"]
    );
}

#[tokio::test]
async fn panicking_step_is_compensated_like_a_failure() {
    let log = call_log();
    let panicking = TransactionStep::new(
        || async {
            if true {
                panic!("disk on fire");
            }
            Ok::<(), TaskError>(())
        },
        || async { Ok(()) },
    );
    let tx = Transaction::new(vec![step(&log, "A", false), panicking]);

    let error = tx.execute().await.unwrap_err();
    assert!(error.to_string().contains("disk on fire"));
    assert_eq!(*log.lock(), vec!["A.execute", "A.rollback"]);
}

#[tokio::test]
async fn manual_rollback_undoes_everything() {
    let log = call_log();
    let tx = Transaction::new(vec![step(&log, "A", false), step(&log, "B", false)]);

    let rolled_back = tx.rollback().await;
    assert_eq!(rolled_back.status(), TransactionStatus::RolledBack);
    assert_eq!(*log.lock(), vec!["B.rollback", "A.rollback"]);
}
