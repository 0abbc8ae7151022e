//! Explicit lifecycle states for queued tasks, transactions and workers.
//!
//! Each state type exposes `can_transition_to` so owners can assert forward-only movement.

pub mod states;

pub use states::{TaskStatus, TransactionStatus, WorkerState};
