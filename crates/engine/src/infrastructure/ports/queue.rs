//! Queue port - storage-agnostic durable job delivery.
//!
//! Items are keyed by a caller-supplied id, so enqueueing the same id twice
//! yields one item. Retry and backoff after a failed attempt are owned by the
//! queue, not by the worker.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::error::QueueError;

pub type QueueItemId = Uuid;

/// Generic queue item with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem<T> {
    pub id: QueueItemId,
    pub payload: T,
    pub status: QueueItemStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time a delayed item may be dequeued again.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error_message: Option<String>,
}

impl<T> QueueItem<T> {
    pub fn new(id: QueueItemId, payload: T, priority: u8, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            status: QueueItemStatus::Pending,
            priority,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            attempts: 0,
            max_attempts,
            error_message: None,
        }
    }

    /// True when the attempt currently running is the last one the queue will grant.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            QueueItemStatus::Pending => true,
            QueueItemStatus::Delayed => self.scheduled_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }
}

/// Status of a queue item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Delayed,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Processing => "processing",
            QueueItemStatus::Completed => "completed",
            QueueItemStatus::Failed => "failed",
            QueueItemStatus::Delayed => "delayed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(QueueItemStatus::Pending),
            "processing" => Some(QueueItemStatus::Processing),
            "completed" => Some(QueueItemStatus::Completed),
            "failed" => Some(QueueItemStatus::Failed),
            "delayed" => Some(QueueItemStatus::Delayed),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, QueueItemStatus::Completed | QueueItemStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// An item with this id already exists; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The item will be redelivered no earlier than `retry_at`.
    Retrying { retry_at: DateTime<Utc> },
    /// No attempts left; the item is settled as failed.
    Exhausted,
}

/// Core queue port - storage-agnostic interface
#[async_trait]
pub trait QueuePort<T>: Send + Sync
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned,
{
    /// Add an item under `id`. Idempotent on `id`.
    async fn enqueue(
        &self,
        id: QueueItemId,
        payload: T,
        priority: u8,
    ) -> Result<EnqueueOutcome, QueueError>;

    /// Claim the next ready item (marks as Processing, counts an attempt)
    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError>;

    /// Mark item as completed
    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError>;

    /// Record a failed attempt; the queue decides between backoff and giving up
    async fn fail(&self, id: QueueItemId, error: &str) -> Result<FailOutcome, QueueError>;

    /// Get item by ID
    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError>;

    /// Get queue depth (pending + delayed items)
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Return items stuck in Processing (from a crashed process) to Pending
    async fn requeue_processing(&self) -> Result<usize, QueueError>;

    /// Clear completed/failed items older than duration
    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError>;
}

/// Result of waiting for work notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// Worker was notified of new work
    Notified,
    /// Timeout expired (periodic recovery check)
    Timeout,
}

/// Port for queue work notifications
#[async_trait]
pub trait QueueNotificationPort: Send + Sync {
    /// Signal that new work is available on this queue
    async fn notify_work_available(&self);

    /// Wait for new work notification or timeout. A timeout means the worker
    /// should check the queue anyway (delayed items become ready without a signal).
    async fn wait_for_work(&self, timeout: Duration) -> WaitResult;

    /// Get the queue name this notifier is for (for debugging/logging)
    fn queue_name(&self) -> &str;
}
