//! Generation worker.
//!
//! Consumes `GenerationJob`s from the queue. For each attempt it streams the
//! generative backend, keeps the state cache's snapshot coalesced and
//! publishes every delta on the task's bus channels. A job publishes at most
//! one terminal message (`done` or `error`) over its whole lifetime; attempts
//! that will be retried leave a non-terminal snapshot carrying the error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use genstream_domain::{
    AssetRef, BusMessage, ErrorInfo, GenerationJob, TaskId, TaskSnapshot,
};

use crate::infrastructure::ports::{
    AssetError, AssetStorePort, BusError, CacheError, ClockPort, EventBusPort, FailOutcome,
    GenerationError, GenerationPart, GenerationRequest, GenerativePort, QueueError, QueueItem,
    QueueNotificationPort, QueuePort, ReferenceContent, StateCachePort,
};

/// How a retried attempt seeds its running aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySeed {
    /// Continue from the text and asset already in the cache.
    Resume,
    /// Start from empty; the cache is overwritten as the new stream arrives.
    Restart,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub retry_seed: RetrySeed,
    pub recovery_poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_seed: RetrySeed::Resume,
            recovery_poll_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Failed to encode bus message: {0}")]
    Encode(String),
}

/// How one dequeued attempt was settled with the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    /// The cache already held a terminal snapshot; nothing was done.
    AlreadyTerminal,
    Retrying { retry_at: DateTime<Utc> },
    Failed,
}

/// One-shot terminal signal for a job attempt. Once fired, no further
/// cache write or publish happens.
#[derive(Debug, Default)]
struct TerminalGuard {
    fired: bool,
}

impl TerminalGuard {
    fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }

    fn is_fired(&self) -> bool {
        self.fired
    }
}

/// Running state of one attempt.
struct Attempt {
    task_id: TaskId,
    text: String,
    asset: Option<AssetRef>,
    last_written: TaskSnapshot,
    guard: TerminalGuard,
    /// False when the cached snapshot could not be read; such an attempt
    /// never overwrites it.
    cache_read: bool,
}

impl Attempt {
    fn new(task_id: TaskId, cached: TaskSnapshot, seed: RetrySeed) -> Self {
        let (text, asset) = match seed {
            RetrySeed::Resume => (cached.text.clone().unwrap_or_default(), cached.asset.clone()),
            RetrySeed::Restart => (String::new(), None),
        };
        Self {
            task_id,
            text,
            asset,
            last_written: cached,
            guard: TerminalGuard::default(),
            cache_read: true,
        }
    }

    fn unread(task_id: TaskId) -> Self {
        Self {
            cache_read: false,
            ..Self::new(task_id, TaskSnapshot::default(), RetrySeed::Restart)
        }
    }

    fn text(&self) -> Option<String> {
        (!self.text.is_empty()).then(|| self.text.clone())
    }
}

pub struct GenerationWorker {
    queue: Arc<dyn QueuePort<GenerationJob>>,
    notifier: Arc<dyn QueueNotificationPort>,
    cache: Arc<dyn StateCachePort>,
    bus: Arc<dyn EventBusPort>,
    generator: Arc<dyn GenerativePort>,
    assets: Arc<dyn AssetStorePort>,
    clock: Arc<dyn ClockPort>,
    config: WorkerConfig,
}

impl GenerationWorker {
    pub fn new(
        queue: Arc<dyn QueuePort<GenerationJob>>,
        notifier: Arc<dyn QueueNotificationPort>,
        cache: Arc<dyn StateCachePort>,
        bus: Arc<dyn EventBusPort>,
        generator: Arc<dyn GenerativePort>,
        assets: Arc<dyn AssetStorePort>,
        clock: Arc<dyn ClockPort>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            notifier,
            cache,
            bus,
            generator,
            assets,
            clock,
            config,
        }
    }

    /// Poll the queue until `cancel` fires, then wait for in-flight jobs.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            queue = %self.notifier.queue_name(),
            concurrency,
            "Starting generation worker"
        );
        let permits = Arc::new(Semaphore::new(concurrency));

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.queue.dequeue().await {
                Ok(Some(item)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let task_id = item.payload.task_id;
                        if let Err(e) = worker.process(item).await {
                            tracing::error!(task_id = %task_id, error = %e, "Failed to settle generation job");
                        }
                    });
                }
                Ok(None) => {
                    drop(permit);
                    // Queue empty - wait for notification or recovery timeout
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.notifier.wait_for_work(self.config.recovery_poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %e, "Failed to dequeue generation job");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        tracing::info!("Generation worker stopping; waiting for in-flight jobs");
        let _ = permits.acquire_many(concurrency as u32).await;
        tracing::info!("Generation worker stopped");
    }

    /// Run one attempt of a dequeued job and settle it with the queue.
    pub async fn process(
        &self,
        item: QueueItem<GenerationJob>,
    ) -> Result<AttemptOutcome, WorkerError> {
        let task_id = item.payload.task_id;

        let cached = match self.cache.get(task_id).await {
            Ok(cached) => cached.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to read task state");
                let mut attempt = Attempt::unread(task_id);
                return self.settle_failure(&item, &mut attempt, e.into()).await;
            }
        };

        if cached.is_terminal() {
            tracing::info!(task_id = %task_id, "Task already terminal; completing without side effects");
            self.queue.complete(item.id).await?;
            return Ok(AttemptOutcome::AlreadyTerminal);
        }

        tracing::info!(
            task_id = %task_id,
            attempt = item.attempts,
            max_attempts = item.max_attempts,
            "Processing generation job"
        );

        let mut attempt = Attempt::new(task_id, cached, self.config.retry_seed);
        match self.stream_job(&item.payload, &mut attempt).await {
            Ok(()) => match self.finish_success(&mut attempt).await {
                Ok(()) => {
                    self.queue.complete(item.id).await?;
                    tracing::info!(task_id = %task_id, "Generation job completed");
                    Ok(AttemptOutcome::Completed)
                }
                Err(e) => self.settle_failure(&item, &mut attempt, e).await,
            },
            Err(e) => self.settle_failure(&item, &mut attempt, e).await,
        }
    }

    async fn stream_job(
        &self,
        job: &GenerationJob,
        attempt: &mut Attempt,
    ) -> Result<(), WorkerError> {
        let request = GenerationRequest {
            prompt: job.request.prompt().to_string(),
            references: self.resolve_references(job).await,
            aspect_ratio: job.request.aspect_ratio(),
            image_size: job.request.image_size(),
        };

        let mut parts = self.generator.stream(request).await?;
        while let Some(part) = parts.next().await {
            match part? {
                GenerationPart::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    attempt.text.push_str(&text);
                    self.write_progress(attempt).await?;
                    self.publish(attempt, &BusMessage::Text { text }).await?;
                }
                GenerationPart::InlineAsset { mime_type, data } => {
                    let asset = self
                        .assets
                        .store(data, &mime_type, job.request.owner())
                        .await?;
                    tracing::debug!(task_id = %attempt.task_id, asset_id = %asset.id, "Stored generated asset");
                    attempt.asset = Some(asset.clone());
                    self.write_progress(attempt).await?;
                    self.publish(attempt, &BusMessage::Asset { asset }).await?;
                }
            }
        }
        Ok(())
    }

    /// Unresolvable references are dropped, never fatal.
    async fn resolve_references(&self, job: &GenerationJob) -> Vec<ReferenceContent> {
        let lookups = job
            .request
            .reference_asset_ids()
            .iter()
            .map(|id| async move { (*id, self.assets.resolve_reference(*id).await) });

        join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(id, resolved)| match resolved {
                Ok(Some(content)) => Some(content),
                Ok(None) => {
                    tracing::warn!(task_id = %job.task_id, asset_id = %id, "Reference asset not found; dropping");
                    None
                }
                Err(e) => {
                    tracing::warn!(task_id = %job.task_id, asset_id = %id, error = %e, "Failed to resolve reference; dropping");
                    None
                }
            })
            .collect()
    }

    async fn write_progress(&self, attempt: &mut Attempt) -> Result<(), WorkerError> {
        let candidate = TaskSnapshot::in_progress(attempt.text(), attempt.asset.clone());
        self.write_if_changed(attempt, candidate).await
    }

    async fn write_if_changed(
        &self,
        attempt: &mut Attempt,
        snapshot: TaskSnapshot,
    ) -> Result<(), WorkerError> {
        if !attempt.cache_read || attempt.guard.is_fired() || snapshot == attempt.last_written {
            return Ok(());
        }
        self.cache.set(attempt.task_id, snapshot.clone()).await?;
        attempt.last_written = snapshot;
        Ok(())
    }

    async fn publish(&self, attempt: &Attempt, message: &BusMessage) -> Result<(), WorkerError> {
        if attempt.guard.is_fired() {
            return Ok(());
        }
        self.send(attempt.task_id, message).await
    }

    async fn finish_success(&self, attempt: &mut Attempt) -> Result<(), WorkerError> {
        let terminal = TaskSnapshot::succeeded(attempt.text(), attempt.asset.clone());
        self.write_if_changed(attempt, terminal).await?;

        if attempt.guard.claim() {
            // The snapshot is already terminal, so a lost `done` is recovered by the bridge's poll
            if let Err(e) = self.send(attempt.task_id, &BusMessage::Done).await {
                tracing::warn!(task_id = %attempt.task_id, error = %e, "Failed to publish done");
            }
        }
        Ok(())
    }

    async fn send(&self, task_id: TaskId, message: &BusMessage) -> Result<(), WorkerError> {
        let payload =
            serde_json::to_string(message).map_err(|e| WorkerError::Encode(e.to_string()))?;
        self.bus
            .publish(&message.channel().name(task_id), &payload)
            .await?;
        Ok(())
    }

    /// Record the failed attempt in the cache, publish the error if this is
    /// the last attempt, and hand the failure to the queue's retry policy.
    async fn settle_failure(
        &self,
        item: &QueueItem<GenerationJob>,
        attempt: &mut Attempt,
        error: WorkerError,
    ) -> Result<AttemptOutcome, WorkerError> {
        let message = error.to_string();
        let task_id = attempt.task_id;

        if !attempt.cache_read {
            self.reload(attempt).await;
        }

        if item.is_final_attempt() {
            self.finish_failure(attempt, &message).await;
        } else {
            let snapshot = TaskSnapshot::retrying(
                attempt.text(),
                attempt.asset.clone(),
                ErrorInfo::new(message.clone()),
            );
            if let Err(e) = self.write_if_changed(attempt, snapshot).await {
                tracing::warn!(task_id = %task_id, error = %e, "Failed to record retrying state");
            }
        }

        match self.queue.fail(item.id, &message).await? {
            FailOutcome::Retrying { retry_at } => {
                tracing::warn!(
                    task_id = %task_id,
                    attempt = item.attempts,
                    retry_at = %retry_at,
                    error = %message,
                    "Generation attempt failed; retry scheduled"
                );
                self.wake_at(retry_at);
                Ok(AttemptOutcome::Retrying { retry_at })
            }
            FailOutcome::Exhausted => {
                // Covers a queue that gave up earlier than the item suggested
                self.finish_failure(attempt, &message).await;
                tracing::error!(
                    task_id = %task_id,
                    attempts = item.attempts,
                    error = %message,
                    "Generation job failed permanently"
                );
                Ok(AttemptOutcome::Failed)
            }
        }
    }

    async fn finish_failure(&self, attempt: &mut Attempt, message: &str) {
        let snapshot = TaskSnapshot::failed(
            attempt.text(),
            attempt.asset.clone(),
            ErrorInfo::new(message),
        );
        if let Err(e) = self.write_if_changed(attempt, snapshot).await {
            tracing::warn!(task_id = %attempt.task_id, error = %e, "Failed to record terminal failure");
        }
        if attempt.guard.claim() {
            let error = BusMessage::Error(ErrorInfo::new(message));
            if let Err(e) = self.send(attempt.task_id, &error).await {
                tracing::warn!(task_id = %attempt.task_id, error = %e, "Failed to publish error");
            }
        }
    }

    /// Second read of the cache after the first one failed, so a failure
    /// snapshot keeps the progress already recorded.
    async fn reload(&self, attempt: &mut Attempt) {
        match self.cache.get(attempt.task_id).await {
            Ok(cached) => {
                let cached = cached.unwrap_or_default();
                let terminal = cached.is_terminal();
                *attempt = Attempt::new(attempt.task_id, cached, RetrySeed::Resume);
                if terminal {
                    // Someone already settled the task; leave it alone
                    attempt.guard.claim();
                }
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %attempt.task_id,
                    error = %e,
                    "State cache still unreadable; leaving the snapshot untouched"
                );
            }
        }
    }

    /// Nudge the run loop when a delayed item becomes ready.
    fn wake_at(&self, retry_at: DateTime<Utc>) {
        let delay = (retry_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            notifier.notify_work_available().await;
        });
    }
}
