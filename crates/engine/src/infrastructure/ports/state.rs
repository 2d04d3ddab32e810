//! State cache and event bus ports.
//!
//! The cache holds the coalesced snapshot per task; the bus carries the
//! uncoalesced deltas to whoever is subscribed right now.

use async_trait::async_trait;
use tokio::sync::mpsc;

use genstream_domain::{TaskId, TaskSnapshot};

use super::error::{BusError, CacheError};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateCachePort: Send + Sync {
    async fn get(&self, task_id: TaskId) -> Result<Option<TaskSnapshot>, CacheError>;

    /// Overwrites the snapshot. Only the worker that owns the task writes.
    async fn set(&self, task_id: TaskId, snapshot: TaskSnapshot) -> Result<(), CacheError>;

    /// Writes `snapshot` only when no snapshot exists yet. Returns whether it wrote.
    async fn set_if_absent(
        &self,
        task_id: TaskId,
        snapshot: TaskSnapshot,
    ) -> Result<bool, CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A message as delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEnvelope {
    pub channel: String,
    pub payload: String,
}

/// Live subscription handle. Messages from all subscribed channels arrive
/// on one ordered receiver.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    channels: Vec<String>,
    receiver: mpsc::Receiver<BusEnvelope>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        channels: Vec<String>,
        receiver: mpsc::Receiver<BusEnvelope>,
    ) -> Self {
        Self {
            id,
            channels,
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Next message, or `None` once the bus has dropped this subscription.
    pub async fn recv(&mut self) -> Option<BusEnvelope> {
        self.receiver.recv().await
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBusPort: Send + Sync {
    /// Fire-and-forget fan-out. Returns how many subscribers accepted the message.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError>;

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BusError>;

    /// Idempotent.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError>;
}
