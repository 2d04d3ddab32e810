//! In-memory queue implementation for development and testing
//!
//! Vec-based storage with priority-based dequeue. Nothing survives a restart,
//! so `QUEUE_BACKEND=memory` trades durability for zero setup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;

use crate::infrastructure::ports::{
    EnqueueOutcome, FailOutcome, QueueError, QueueItem, QueueItemId, QueueItemStatus,
    QueueNotificationPort, QueuePort,
};

use super::retry::RetryScheduler;

/// In-memory queue implementation
pub struct InMemoryQueue<T, N: QueueNotificationPort> {
    items: Arc<RwLock<Vec<QueueItem<T>>>>,
    notifier: N,
    scheduler: RetryScheduler,
}

impl<T, N: QueueNotificationPort> InMemoryQueue<T, N> {
    /// Get the notifier for this queue
    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

impl<T, N: QueueNotificationPort> InMemoryQueue<T, N>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned,
{
    pub fn new(notifier: N, scheduler: RetryScheduler) -> Self {
        Self {
            items: Arc::new(RwLock::new(Vec::new())),
            notifier,
            scheduler,
        }
    }
}

#[async_trait]
impl<T, N: QueueNotificationPort + 'static> QueuePort<T> for InMemoryQueue<T, N>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned,
{
    async fn enqueue(
        &self,
        id: QueueItemId,
        payload: T,
        priority: u8,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut items = self.items.write().await;
        if items.iter().any(|item| item.id == id) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        let item = QueueItem::new(
            id,
            payload,
            priority,
            self.scheduler.policy().max_attempts,
            self.scheduler.now(),
        );
        items.push(item);
        drop(items); // Release the lock before notifying

        self.notifier.notify_work_available().await;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError> {
        let mut items = self.items.write().await;
        let now = self.scheduler.now();

        // Highest priority first, oldest first within a priority
        let best = items
            .iter_mut()
            .filter(|item| item.is_ready(now))
            .min_by_key(|item| (std::cmp::Reverse(item.priority), item.created_at));

        Ok(best.map(|item| {
            item.status = QueueItemStatus::Processing;
            item.updated_at = now;
            item.scheduled_at = None;
            item.attempts += 1;
            item.clone()
        }))
    }

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        item.status = QueueItemStatus::Completed;
        item.updated_at = self.scheduler.now();
        Ok(())
    }

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<FailOutcome, QueueError> {
        let mut items = self.items.write().await;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let now = self.scheduler.now();
        let outcome = self.scheduler.outcome(item.attempts, item.max_attempts, now);
        item.updated_at = now;
        item.error_message = Some(error.to_string());
        match outcome {
            FailOutcome::Retrying { retry_at } => {
                item.status = QueueItemStatus::Delayed;
                item.scheduled_at = Some(retry_at);
            }
            FailOutcome::Exhausted => {
                item.status = QueueItemStatus::Failed;
                item.scheduled_at = None;
            }
        }
        Ok(outcome)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError> {
        let items = self.items.read().await;
        Ok(items.iter().find(|item| item.id == id).cloned())
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|item| {
                matches!(
                    item.status,
                    QueueItemStatus::Pending | QueueItemStatus::Delayed
                )
            })
            .count())
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        let mut items = self.items.write().await;
        let now = self.scheduler.now();
        let mut count = 0;
        for item in items
            .iter_mut()
            .filter(|item| item.status == QueueItemStatus::Processing)
        {
            item.status = QueueItemStatus::Pending;
            item.updated_at = now;
            count += 1;
        }
        drop(items);

        if count > 0 {
            self.notifier.notify_work_available().await;
        }
        Ok(count)
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        let mut items = self.items.write().await;
        let cutoff = self.scheduler.now()
            - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let before = items.len();
        items.retain(|item| !(item.status.is_settled() && item.updated_at < cutoff));
        Ok(before - items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::{FixedClock, FixedRandom};
    use crate::infrastructure::queues::{InProcessNotifier, RetryPolicy};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn queue(max_attempts: u32) -> InMemoryQueue<String, InProcessNotifier> {
        let now = Utc.with_ymd_and_hms(2025, 4, 2, 8, 0, 0).unwrap();
        let policy = RetryPolicy {
            max_attempts,
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        InMemoryQueue::new(
            InProcessNotifier::new("test"),
            RetryScheduler::new(policy, Arc::new(FixedClock(now)), Arc::new(FixedRandom(0.5))),
        )
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_on_id() {
        let queue = queue(3);
        let id = Uuid::new_v4();

        let first = queue.enqueue(id, "job".into(), 0).await.unwrap();
        let second = queue.enqueue(id, "job again".into(), 0).await.unwrap();

        assert_eq!(first, EnqueueOutcome::Enqueued);
        assert_eq!(second, EnqueueOutcome::Duplicate);
        assert_eq!(queue.depth().await.unwrap(), 1);
        assert_eq!(queue.get(id).await.unwrap().unwrap().payload, "job");
    }

    #[tokio::test]
    async fn dequeue_claims_each_item_once() {
        let queue = queue(3);
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();

        let item = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.status, QueueItemStatus::Processing);
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_prefers_priority_then_age() {
        let queue = queue(3);
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        queue.enqueue(low, "low".into(), 0).await.unwrap();
        queue.enqueue(high, "high".into(), 5).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, high);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, low);
    }

    #[tokio::test]
    async fn fail_delays_until_attempts_run_out() {
        let queue = queue(2);
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();

        queue.dequeue().await.unwrap();
        let outcome = queue.fail(id, "backend down").await.unwrap();
        assert!(matches!(outcome, FailOutcome::Retrying { .. }));
        // The fixed clock never reaches retry_at
        assert!(queue.dequeue().await.unwrap().is_none());

        let item = queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Delayed);
        assert_eq!(item.error_message.as_deref(), Some("backend down"));
    }

    #[tokio::test]
    async fn final_failure_settles_item() {
        let queue = queue(1);
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();
        let item = queue.dequeue().await.unwrap().unwrap();
        assert!(item.is_final_attempt());

        assert_eq!(
            queue.fail(id, "boom").await.unwrap(),
            FailOutcome::Exhausted
        );
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            QueueItemStatus::Failed
        );
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_processing_redelivers_claimed_items() {
        let queue = queue(3);
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(queue.requeue_processing().await.unwrap(), 1);
        let again = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn complete_unknown_item_is_not_found() {
        let queue = queue(3);
        assert!(matches!(
            queue.complete(Uuid::new_v4()).await,
            Err(QueueError::NotFound(_))
        ));
    }
}
