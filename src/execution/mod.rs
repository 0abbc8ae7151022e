pub mod retry;
pub mod worker;

pub use retry::{execute_with_retry, RetryConfig};
pub use worker::{EventListener, Worker, WorkerEvent, WorkerStats};
