//! In-process event bus.
//!
//! Fan-out pub/sub over per-task channels. Every subscription owns one
//! bounded mpsc queue shared by all of its channels, so a subscriber sees
//! messages in publish order. Publishing never waits: a subscriber whose
//! buffer is full misses the message (at-most-once delivery, no replay).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::infrastructure::ports::{
    BusEnvelope, BusError, EventBusPort, Subscription, SubscriptionId,
};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Clone)]
struct ChannelSubscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<BusEnvelope>,
}

pub struct InProcessEventBus {
    /// channel name -> subscribers
    channels: DashMap<String, Vec<ChannelSubscriber>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl InProcessEventBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }

    fn prune_if_empty(&self, channel: &str) {
        self.channels.remove_if(channel, |_, subs| subs.is_empty());
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[async_trait]
impl EventBusPort for InProcessEventBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize, BusError> {
        let Some(mut subs) = self.channels.get_mut(channel) else {
            return Ok(0);
        };

        let mut delivered = 0;
        subs.retain(|sub| {
            let envelope = BusEnvelope {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            match sub.sender.try_send(envelope) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        channel = %channel,
                        subscription = %sub.id,
                        "Subscriber buffer full, dropping bus message"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        channel = %channel,
                        subscription = %sub.id,
                        "Pruning closed subscriber"
                    );
                    false
                }
            }
        });
        let now_empty = subs.is_empty();
        drop(subs);

        if now_empty {
            self.prune_if_empty(channel);
        }
        Ok(delivered)
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription, BusError> {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);

        let mut seen = HashSet::new();
        let channels: Vec<String> = channels
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        for channel in &channels {
            self.channels
                .entry(channel.clone())
                .or_default()
                .push(ChannelSubscriber {
                    id,
                    sender: sender.clone(),
                });
        }

        tracing::debug!(subscription = %id, channels = channels.len(), "Bus subscription opened");
        Ok(Subscription::new(id, channels, receiver))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError> {
        let id = subscription.id();
        for channel in subscription.channels() {
            if let Some(mut subs) = self.channels.get_mut(channel.as_str()) {
                subs.retain(|sub| sub.id != id);
            }
            self.prune_if_empty(channel);
        }
        tracing::debug!(subscription = %id, "Bus subscription closed");
        Ok(())
    }
}
