//! In-process queue notifier using tokio::sync::Notify
//!
//! For single-process deployments where the worker runs in the same
//! process as the producer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::infrastructure::ports::{QueueNotificationPort, WaitResult};

/// In-process notifier using tokio::sync::Notify
///
/// Suitable for the SQLite backend (single process) and the in-memory
/// backend (tests, ephemeral deployments).
#[derive(Clone)]
pub struct InProcessNotifier {
    notify: Arc<Notify>,
    queue_name: String,
}

impl InProcessNotifier {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl QueueNotificationPort for InProcessNotifier {
    async fn notify_work_available(&self) {
        // notify_one stores a permit when nobody is waiting, so an enqueue that
        // lands between a worker's empty dequeue and its wait is not lost.
        self.notify.notify_one();
    }

    async fn wait_for_work(&self, timeout: Duration) -> WaitResult {
        match tokio::time::timeout(timeout, self.notify.notified()).await {
            Ok(()) => WaitResult::Notified,
            Err(_) => WaitResult::Timeout,
        }
    }

    fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stored_permit_wakes_a_later_waiter() {
        let notifier = InProcessNotifier::new("generation");
        notifier.notify_work_available().await;
        assert_eq!(
            notifier.wait_for_work(Duration::from_millis(50)).await,
            WaitResult::Notified
        );
    }

    #[tokio::test]
    async fn times_out_without_work() {
        let notifier = InProcessNotifier::new("generation");
        assert_eq!(
            notifier.wait_for_work(Duration::from_millis(10)).await,
            WaitResult::Timeout
        );
        assert_eq!(notifier.queue_name(), "generation");
    }
}
