//! Queue implementations - Infrastructure adapters for queue ports

mod factory;
mod in_process_notifier;
mod memory_queue;
mod retry;
mod sqlite_queue;

pub use factory::{QueueBackendEnum, QueueFactory, GENERATION_QUEUE};
pub use in_process_notifier::InProcessNotifier;
pub use memory_queue::InMemoryQueue;
pub use retry::{RetryPolicy, RetryScheduler};
pub use sqlite_queue::SqliteQueue;
