//! # Transactions
//!
//! An ordered list of execute/rollback pairs with all-or-nothing semantics. Steps execute
//! strictly in order; when one fails, every step that already succeeded is compensated in
//! reverse order. Compensation failures are collected and logged but never stop the
//! remaining compensations.

use crate::error::{RollbackFailure, TaskError, TaskFailure, TransactionError};
use crate::execution::retry::panic_message;
use crate::logging::log_error;
use crate::state_machine::TransactionStatus;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Closure producing one execute or rollback action
pub type StepAction<E> = Arc<dyn Fn() -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

/// One execute/rollback pair
pub struct TransactionStep<E = TaskError> {
    execute: StepAction<E>,
    rollback: StepAction<E>,
}

impl<E> Clone for TransactionStep<E> {
    fn clone(&self) -> Self {
        Self {
            execute: Arc::clone(&self.execute),
            rollback: Arc::clone(&self.rollback),
        }
    }
}

impl<E: Send + 'static> TransactionStep<E> {
    pub fn new<F, FFut, R, RFut>(execute: F, rollback: R) -> Self
    where
        F: Fn() -> FFut + Send + Sync + 'static,
        FFut: Future<Output = Result<(), E>> + Send + 'static,
        R: Fn() -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            execute: Arc::new(move || execute().boxed()),
            rollback: Arc::new(move || rollback().boxed()),
        }
    }
}

pub struct Transaction<E = TaskError> {
    id: String,
    steps: Vec<TransactionStep<E>>,
    status: TransactionStatus,
}

impl<E> Clone for Transaction<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            steps: self.steps.clone(),
            status: self.status,
        }
    }
}

impl<E> fmt::Debug for Transaction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("steps", &self.steps.len())
            .field("status", &self.status)
            .finish()
    }
}

impl<E: TaskFailure> Transaction<E> {
    /// Pending transaction with a fresh id
    pub fn new(steps: Vec<TransactionStep<E>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            steps,
            status: TransactionStatus::Pending,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute every step in order.
    ///
    /// On success the returned transaction is `committed`. On failure the already-executed
    /// steps are rolled back in reverse order and the error carries the original failure
    /// plus any compensation failures; the stored status is left as it was.
    #[instrument(skip(self), fields(transaction_id = %self.id, steps = self.steps.len()))]
    pub async fn execute(&self) -> Result<Self, TransactionError<E>> {
        if !self.status.can_transition_to(TransactionStatus::Committed) {
            return Err(TransactionError::InvalidState {
                transaction_id: self.id.clone(),
                status: self.status,
            });
        }

        let mut executed = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let label = format!("{}#{index}", self.id);
            match guarded(&label, || (step.execute)()).await {
                Ok(()) => executed.push(index),
                Err(error) => {
                    warn!(
                        transaction_id = %self.id,
                        step_index = index,
                        error = %error,
                        "Transaction step failed, rolling back"
                    );
                    let compensations = executed
                        .iter()
                        .rev()
                        .map(|&i| self.compensation(i))
                        .collect();
                    let rollback_failures = compensate(&self.id, compensations).await;

                    return Err(TransactionError::StepFailed {
                        transaction_id: self.id.clone(),
                        step_index: index,
                        error,
                        rollback_failures,
                    });
                }
            }
        }

        info!(transaction_id = %self.id, "✅ Transaction committed");
        Ok(Self {
            status: TransactionStatus::Committed,
            ..self.clone()
        })
    }

    /// Roll back every step in reverse order, regardless of what executed
    #[instrument(skip(self), fields(transaction_id = %self.id))]
    pub async fn rollback(&self) -> Self {
        let compensations = (0..self.steps.len())
            .rev()
            .map(|i| self.compensation(i))
            .collect();
        let failures = compensate(&self.id, compensations).await;

        info!(
            transaction_id = %self.id,
            rollback_failures = failures.len(),
            "↩️ Transaction rolled back"
        );
        Self {
            status: TransactionStatus::RolledBack,
            ..self.clone()
        }
    }

    fn compensation(&self, index: usize) -> Compensation<E> {
        let rollback = Arc::clone(&self.steps[index].rollback);
        Compensation {
            label: format!("{}#{index}", self.id),
            index,
            action: Box::new(move || rollback()),
        }
    }
}

/// Rollback action that has not been started yet
pub(crate) type DeferredAction<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>;

/// A pending compensation action
pub(crate) struct Compensation<E> {
    pub label: String,
    pub index: usize,
    pub action: DeferredAction<E>,
}

/// Run compensations one after another in the given order, collecting failures
pub(crate) async fn compensate<E: TaskFailure>(
    owner: &str,
    compensations: Vec<Compensation<E>>,
) -> Vec<RollbackFailure<E>> {
    let mut failures = Vec::new();
    for compensation in compensations {
        if let Err(error) = guarded(&compensation.label, compensation.action).await {
            log_error(
                "compensation",
                "rollback",
                &error.to_string(),
                Some(&format!("{owner}: {}", compensation.label)),
            );
            failures.push(RollbackFailure {
                step_index: compensation.index,
                error,
            });
        }
    }
    failures
}

/// Start and await `action`, turning a panic in either into a `PANICKED` failure
async fn guarded<E, F>(label: &str, action: F) -> Result<(), E>
where
    E: TaskFailure,
    F: FnOnce() -> BoxFuture<'static, Result<(), E>>,
{
    match AssertUnwindSafe(async move { action().await }).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(E::from(TaskError::panicked(label, panic_message(&*panic)))),
    }
}
