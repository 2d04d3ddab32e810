//! Queue factory - Creates queue instances based on configuration

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::SqlitePool;

use crate::infrastructure::config::{QueueBackend, QueueConfig};
use crate::infrastructure::ports::{
    ClockPort, EnqueueOutcome, FailOutcome, QueueError, QueueItem, QueueItemId, QueuePort,
    RandomPort,
};

use super::{InMemoryQueue, InProcessNotifier, RetryScheduler, SqliteQueue};

pub const GENERATION_QUEUE: &str = "gemini-task-queue";

/// Enum wrapper for queue backends to enable runtime selection.
/// Not Clone - share it as `Arc<QueueBackendEnum<T>>`.
pub enum QueueBackendEnum<T> {
    Memory(InMemoryQueue<T, InProcessNotifier>),
    Sqlite(SqliteQueue<T, InProcessNotifier>),
}

#[async_trait]
impl<T> QueuePort<T> for QueueBackendEnum<T>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
{
    async fn enqueue(
        &self,
        id: QueueItemId,
        payload: T,
        priority: u8,
    ) -> Result<EnqueueOutcome, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.enqueue(id, payload, priority).await,
            QueueBackendEnum::Sqlite(q) => q.enqueue(id, payload, priority).await,
        }
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.dequeue().await,
            QueueBackendEnum::Sqlite(q) => q.dequeue().await,
        }
    }

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.complete(id).await,
            QueueBackendEnum::Sqlite(q) => q.complete(id).await,
        }
    }

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<FailOutcome, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.fail(id, error).await,
            QueueBackendEnum::Sqlite(q) => q.fail(id, error).await,
        }
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.get(id).await,
            QueueBackendEnum::Sqlite(q) => q.get(id).await,
        }
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.depth().await,
            QueueBackendEnum::Sqlite(q) => q.depth().await,
        }
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.requeue_processing().await,
            QueueBackendEnum::Sqlite(q) => q.requeue_processing().await,
        }
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        match self {
            QueueBackendEnum::Memory(q) => q.cleanup(older_than).await,
            QueueBackendEnum::Sqlite(q) => q.cleanup(older_than).await,
        }
    }
}

impl<T> QueueBackendEnum<T> {
    /// Get the notifier for this queue
    pub fn notifier(&self) -> InProcessNotifier {
        match self {
            QueueBackendEnum::Memory(q) => q.notifier().clone(),
            QueueBackendEnum::Sqlite(q) => q.notifier().clone(),
        }
    }
}

/// Queue factory for creating queue instances
pub struct QueueFactory {
    config: QueueConfig,
    sqlite_pool: Option<SqlitePool>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
}

impl QueueFactory {
    pub async fn new(
        config: QueueConfig,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Result<Self> {
        let sqlite_pool = if config.backend == QueueBackend::Sqlite {
            // Ensure data directory exists
            if let Some(parent) = std::path::Path::new(&config.sqlite_path).parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create queue database directory")?;
            }
            let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.sqlite_path))
                .await
                .context("Failed to connect to SQLite queue database")?;
            tracing::info!(path = %config.sqlite_path, "Connected to SQLite queue database");
            Some(pool)
        } else {
            None
        };

        Ok(Self {
            config,
            sqlite_pool,
            clock,
            random,
        })
    }

    /// Create the generation job queue with its own notifier.
    pub async fn create_queue<T>(&self, queue_name: &str) -> Result<QueueBackendEnum<T>>
    where
        T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
    {
        let notifier = InProcessNotifier::new(queue_name);
        let scheduler = RetryScheduler::new(
            self.config.retry,
            self.clock.clone(),
            self.random.clone(),
        );

        match (&self.config.backend, &self.sqlite_pool) {
            (QueueBackend::Sqlite, Some(pool)) => {
                let queue = SqliteQueue::new(pool.clone(), queue_name, notifier, scheduler)
                    .await
                    .with_context(|| format!("Failed to initialize SQLite queue {queue_name}"))?;
                Ok(QueueBackendEnum::Sqlite(queue))
            }
            _ => {
                tracing::warn!(queue = %queue_name, "Using in-memory queue; jobs will not survive a restart");
                Ok(QueueBackendEnum::Memory(InMemoryQueue::new(notifier, scheduler)))
            }
        }
    }
}
