//! Subscription bridge: one terminating `ObserverEvent` sequence per observer.
//!
//! The bridge subscribes to the task's bus channels before reading the cache,
//! so a terminal message published between the two can't be missed. While
//! live it re-reads the cache on a fixed interval and treats a terminal
//! snapshot as if the terminal message had arrived; the bus gives no delivery
//! guarantee and this poll is what makes a dropped `done` recoverable.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use genstream_domain::{BusMessage, ObserverEvent, TaskChannel, TaskId};

use crate::infrastructure::ports::{
    BusEnvelope, BusError, EventBusPort, StateCachePort, Subscription,
};

/// Cache reads tried for the final snapshot after a bus `done`.
const FINAL_READ_ATTEMPTS: u32 = 3;
const FINAL_READ_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Cache re-read interval while live
    pub poll_interval: Duration,
    /// Events buffered between the bridge and a slow observer
    pub event_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            event_buffer: 64,
        }
    }
}

/// Stream of events for one observer. Dropping it tears the bridge down.
pub struct TaskEventStream {
    events: ReceiverStream<ObserverEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for TaskEventStream {
    type Item = ObserverEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

pub struct StreamTask {
    cache: Arc<dyn StateCachePort>,
    bus: Arc<dyn EventBusPort>,
    config: BridgeConfig,
}

impl StreamTask {
    pub fn new(
        cache: Arc<dyn StateCachePort>,
        bus: Arc<dyn EventBusPort>,
        config: BridgeConfig,
    ) -> Self {
        Self { cache, bus, config }
    }

    /// Start bridging `task_id`. Cancelling `cancel` or dropping the returned
    /// stream ends the bridge without emitting anything further.
    pub fn execute(&self, task_id: TaskId, cancel: CancellationToken) -> TaskEventStream {
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let cancel = cancel.child_token();

        let bridge = Bridge {
            task_id,
            cache: self.cache.clone(),
            bus: self.bus.clone(),
            poll_interval: self.config.poll_interval,
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(bridge.run());

        TaskEventStream {
            events: ReceiverStream::new(rx),
            _cancel_on_drop: cancel.drop_guard(),
        }
    }
}

struct Bridge {
    task_id: TaskId,
    cache: Arc<dyn StateCachePort>,
    bus: Arc<dyn EventBusPort>,
    poll_interval: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<ObserverEvent>,
}

impl Bridge {
    async fn run(self) {
        let channels = TaskChannel::names_for(self.task_id);
        let subscribed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            subscribed = self.bus.subscribe(&channels) => subscribed,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(task_id = %self.task_id, error = %e, "Bridge failed to subscribe");
                self.emit(ObserverEvent::error(e.to_string())).await;
                return;
            }
        };
        tracing::debug!(task_id = %self.task_id, subscription = %subscription.id(), "Bridge subscribed");

        self.relay(&mut subscription).await;

        let id = subscription.id();
        if let Err(e) = self.bus.unsubscribe(subscription).await {
            tracing::warn!(task_id = %self.task_id, subscription = %id, error = %e, "Bridge failed to unsubscribe");
        }
        tracing::debug!(task_id = %self.task_id, subscription = %id, "Bridge closed");
    }

    /// Emit events until a terminal one, cancellation, or a departed observer.
    async fn relay(&self, subscription: &mut Subscription) {
        let initial = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            initial = self.cache.get(self.task_id) => initial,
        };
        let snapshot = match initial {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                self.emit(ObserverEvent::error("task not found")).await;
                return;
            }
            Err(e) => {
                self.emit(ObserverEvent::error(e.to_string())).await;
                return;
            }
        };

        let terminal = ObserverEvent::terminal_from(&snapshot);
        if !self.emit(ObserverEvent::State(snapshot)).await {
            return;
        }
        if let Some(terminal) = terminal {
            self.emit(terminal).await;
            return;
        }

        let mut poll = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                envelope = subscription.recv() => {
                    let Some(envelope) = envelope else {
                        self.emit(ObserverEvent::error("event bus closed")).await;
                        return;
                    };
                    let event = match decode(&envelope) {
                        Ok(BusMessage::Text { text }) => ObserverEvent::Text { text },
                        Ok(BusMessage::Asset { asset }) => ObserverEvent::Asset { asset },
                        Ok(BusMessage::Done) => self.final_done().await,
                        Ok(BusMessage::Error(info)) => ObserverEvent::Error { message: info.message },
                        Err(e) => ObserverEvent::error(e.to_string()),
                    };
                    let terminal = event.is_terminal();
                    if !self.emit(event).await || terminal {
                        return;
                    }
                }
                _ = poll.tick() => {
                    match self.cache.get(self.task_id).await {
                        Ok(Some(snapshot)) => {
                            if let Some(terminal) = ObserverEvent::terminal_from(&snapshot) {
                                tracing::debug!(task_id = %self.task_id, "Bridge observed terminal snapshot by poll");
                                self.emit(terminal).await;
                                return;
                            }
                        }
                        Ok(None) => {
                            self.emit(ObserverEvent::error("task expired")).await;
                            return;
                        }
                        Err(e) => {
                            self.emit(ObserverEvent::error(e.to_string())).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// `done` carries no payload on the bus; the final text and asset come
    /// from the terminal snapshot written before it was published. A snapshot
    /// that can't be read after a few tries is reported as an error rather
    /// than an empty `done`.
    async fn final_done(&self) -> ObserverEvent {
        let mut attempt = 1;
        loop {
            match self.cache.get(self.task_id).await {
                Ok(Some(snapshot)) => {
                    return ObserverEvent::Done {
                        text: snapshot.text,
                        asset: snapshot.asset,
                    }
                }
                Ok(None) => return ObserverEvent::error("task expired"),
                Err(e) if attempt >= FINAL_READ_ATTEMPTS => {
                    tracing::warn!(task_id = %self.task_id, error = %e, "Failed to read final snapshot for done");
                    return ObserverEvent::error(e.to_string());
                }
                Err(e) => {
                    tracing::debug!(task_id = %self.task_id, attempt, error = %e, "Retrying final snapshot read");
                    attempt += 1;
                    tokio::time::sleep(FINAL_READ_RETRY_DELAY).await;
                }
            }
        }
    }

    /// False once the observer has gone away.
    async fn emit(&self, event: ObserverEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

fn decode(envelope: &BusEnvelope) -> Result<BusMessage, BusError> {
    serde_json::from_str(&envelope.payload).map_err(|e| BusError::decode(&envelope.channel, e))
}
