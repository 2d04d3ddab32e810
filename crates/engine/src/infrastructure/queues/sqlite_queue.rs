//! SQLite queue implementation for production persistence
//!
//! Items survive a process restart; together with `requeue_processing` at
//! startup this gives at-least-once delivery keyed by item id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Row, SqlitePool};

use crate::infrastructure::ports::{
    EnqueueOutcome, FailOutcome, QueueError, QueueItem, QueueItemId, QueueItemStatus,
    QueueNotificationPort, QueuePort,
};

use super::retry::RetryScheduler;

/// Fixed-width UTC timestamps so SQL string comparison orders correctly.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::database(format!("Invalid datetime: {e}")))
}

/// SQLite queue implementation
pub struct SqliteQueue<T, N: QueueNotificationPort> {
    pool: SqlitePool,
    queue_name: String,
    notifier: N,
    scheduler: RetryScheduler,
    _phantom: std::marker::PhantomData<T>,
}

impl<T, N: QueueNotificationPort> SqliteQueue<T, N> {
    /// Get the notifier for this queue
    pub fn notifier(&self) -> &N {
        &self.notifier
    }
}

impl<T, N: QueueNotificationPort> SqliteQueue<T, N>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned,
{
    pub async fn new(
        pool: SqlitePool,
        queue_name: impl Into<String>,
        notifier: N,
        scheduler: RetryScheduler,
    ) -> Result<Self, QueueError> {
        let queue_name = queue_name.into();

        // Ensure table exists
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                scheduled_at TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                error_message TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(QueueError::database)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_status
            ON queue_items(queue_name, status, priority DESC, created_at)
            "#,
        )
        .execute(&pool)
        .await
        .map_err(QueueError::database)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_queue_scheduled
            ON queue_items(queue_name, status, scheduled_at)
            WHERE status = 'delayed'
            "#,
        )
        .execute(&pool)
        .await
        .map_err(QueueError::database)?;

        Ok(Self {
            pool,
            queue_name,
            notifier,
            scheduler,
            _phantom: std::marker::PhantomData,
        })
    }

    fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<QueueItem<T>, QueueError> {
        let id_str: String = row.get("id");
        let id = uuid::Uuid::parse_str(&id_str)
            .map_err(|e| QueueError::database(format!("Invalid UUID: {e}")))?;

        let payload_json: String = row.get("payload_json");
        let payload: T = serde_json::from_str(&payload_json)?;

        let status_str: String = row.get("status");
        let status = QueueItemStatus::parse(&status_str).ok_or_else(|| QueueError::InvalidStatus {
            id: id_str.clone(),
            status: status_str.clone(),
        })?;

        let priority: i64 = row.get("priority");
        let created_at: String = row.get("created_at");
        let updated_at: String = row.get("updated_at");
        let scheduled_at: Option<String> = row.get("scheduled_at");
        let attempts: i64 = row.get("attempts");
        let max_attempts: i64 = row.get("max_attempts");
        let error_message: Option<String> = row.get("error_message");

        Ok(QueueItem {
            id,
            payload,
            status,
            priority: priority.clamp(0, u8::MAX as i64) as u8,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
            scheduled_at: scheduled_at.as_deref().map(parse_ts).transpose()?,
            attempts: attempts.max(0) as u32,
            max_attempts: max_attempts.max(0) as u32,
            error_message,
        })
    }
}

#[async_trait]
impl<T, N: QueueNotificationPort + 'static> QueuePort<T> for SqliteQueue<T, N>
where
    T: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
{
    async fn enqueue(
        &self,
        id: QueueItemId,
        payload: T,
        priority: u8,
    ) -> Result<EnqueueOutcome, QueueError> {
        let payload_json = serde_json::to_string(&payload)?;
        let now_str = ts(self.scheduler.now());

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO queue_items
            (id, queue_name, payload_json, status, priority, created_at, updated_at, attempts, max_attempts)
            VALUES (?, ?, ?, 'pending', ?, ?, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&self.queue_name)
        .bind(&payload_json)
        .bind(priority as i64)
        .bind(&now_str)
        .bind(&now_str)
        .bind(self.scheduler.policy().max_attempts as i64)
        .execute(&self.pool)
        .await
        .map_err(QueueError::database)?;

        if result.rows_affected() == 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }

        // Notify workers that work is available
        self.notifier.notify_work_available().await;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<T>>, QueueError> {
        let now_str = ts(self.scheduler.now());

        // Atomic select-and-claim; the status re-check in the outer WHERE
        // keeps two concurrent dequeues from claiming the same row.
        let row = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'processing', updated_at = ?, scheduled_at = NULL, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM queue_items
                WHERE queue_name = ?
                AND (
                    (status = 'pending')
                    OR (status = 'delayed' AND scheduled_at <= ?)
                )
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
            )
            AND queue_name = ?
            AND (status = 'pending' OR status = 'delayed')
            RETURNING *
            "#,
        )
        .bind(&now_str)
        .bind(&self.queue_name)
        .bind(&now_str)
        .bind(&self.queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::database)?;

        row.map(Self::row_to_item).transpose()
    }

    async fn complete(&self, id: QueueItemId) -> Result<(), QueueError> {
        let now_str = ts(self.scheduler.now());

        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'completed', updated_at = ?
            WHERE id = ? AND queue_name = ?
            "#,
        )
        .bind(&now_str)
        .bind(id.to_string())
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await
        .map_err(QueueError::database)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn fail(&self, id: QueueItemId, error: &str) -> Result<FailOutcome, QueueError> {
        let item = self
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let now = self.scheduler.now();
        let outcome = self.scheduler.outcome(item.attempts, item.max_attempts, now);
        let (status, scheduled_at) = match outcome {
            FailOutcome::Retrying { retry_at } => (QueueItemStatus::Delayed, Some(ts(retry_at))),
            FailOutcome::Exhausted => (QueueItemStatus::Failed, None),
        };

        sqlx::query(
            r#"
            UPDATE queue_items
            SET status = ?, updated_at = ?, scheduled_at = ?, error_message = ?
            WHERE id = ? AND queue_name = ?
            "#,
        )
        .bind(status.as_str())
        .bind(ts(now))
        .bind(scheduled_at)
        .bind(error)
        .bind(id.to_string())
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await
        .map_err(QueueError::database)?;

        Ok(outcome)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem<T>>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM queue_items
            WHERE id = ? AND queue_name = ?
            "#,
        )
        .bind(id.to_string())
        .bind(&self.queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(QueueError::database)?;

        row.map(Self::row_to_item).transpose()
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM queue_items
            WHERE queue_name = ? AND status IN ('pending', 'delayed')
            "#,
        )
        .bind(&self.queue_name)
        .fetch_one(&self.pool)
        .await
        .map_err(QueueError::database)?;

        let count: i64 = row.get("count");
        Ok(count.max(0) as usize)
    }

    async fn requeue_processing(&self) -> Result<usize, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_items
            SET status = 'pending', updated_at = ?
            WHERE queue_name = ? AND status = 'processing'
            "#,
        )
        .bind(ts(self.scheduler.now()))
        .bind(&self.queue_name)
        .execute(&self.pool)
        .await
        .map_err(QueueError::database)?;

        let count = result.rows_affected() as usize;
        if count > 0 {
            self.notifier.notify_work_available().await;
        }
        Ok(count)
    }

    async fn cleanup(&self, older_than: Duration) -> Result<usize, QueueError> {
        let cutoff = self.scheduler.now()
            - chrono::Duration::milliseconds(older_than.as_millis() as i64);

        let result = sqlx::query(
            r#"
            DELETE FROM queue_items
            WHERE queue_name = ?
            AND status IN ('completed', 'failed')
            AND updated_at < ?
            "#,
        )
        .bind(&self.queue_name)
        .bind(ts(cutoff))
        .execute(&self.pool)
        .await
        .map_err(QueueError::database)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::{FixedRandom, SystemClock};
    use crate::infrastructure::queues::{InProcessNotifier, RetryPolicy};
    use std::sync::Arc;
    use uuid::Uuid;

    async fn queue(dir: &tempfile::TempDir, max_attempts: u32) -> SqliteQueue<String, InProcessNotifier> {
        let path = dir.path().join("queue.db");
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await
            .unwrap();
        let policy = RetryPolicy {
            max_attempts,
            base_delay_ms: 60_000,
            max_delay_ms: 60_000,
            jitter_factor: 0.0,
        };
        SqliteQueue::new(
            pool,
            "generation",
            InProcessNotifier::new("generation"),
            RetryScheduler::new(policy, Arc::new(SystemClock::new()), Arc::new(FixedRandom(0.5))),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir, 3).await;
        let id = Uuid::new_v4();

        assert_eq!(
            queue.enqueue(id, "first".into(), 0).await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue.enqueue(id, "second".into(), 0).await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert_eq!(queue.get(id).await.unwrap().unwrap().payload, "first");
    }

    #[tokio::test]
    async fn claim_complete_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir, 3).await;
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();

        let item = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.status, QueueItemStatus::Processing);
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.complete(id).await.unwrap();
        assert_eq!(
            queue.get(id).await.unwrap().unwrap().status,
            QueueItemStatus::Completed
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.cleanup(Duration::ZERO).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_backs_off_then_exhausts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue(&dir, 2).await;
        let id = Uuid::new_v4();
        queue.enqueue(id, "job".into(), 0).await.unwrap();

        queue.dequeue().await.unwrap();
        assert!(matches!(
            queue.fail(id, "first").await.unwrap(),
            FailOutcome::Retrying { .. }
        ));
        // Delayed a full minute, so not ready yet
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.depth().await.unwrap(), 1);

        // Pull the schedule into the past to run the second attempt now
        sqlx::query("UPDATE queue_items SET scheduled_at = ? WHERE id = ?")
            .bind(ts(Utc::now() - chrono::Duration::seconds(1)))
            .bind(id.to_string())
            .execute(&queue.pool)
            .await
            .unwrap();
        let second = queue.dequeue().await.unwrap().unwrap();
        assert!(second.is_final_attempt());
        assert_eq!(
            queue.fail(id, "second").await.unwrap(),
            FailOutcome::Exhausted
        );

        let item = queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn requeue_processing_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        {
            let queue = queue(&dir, 3).await;
            queue.enqueue(id, "job".into(), 0).await.unwrap();
            queue.dequeue().await.unwrap();
        }

        let reopened = queue(&dir, 3).await;
        assert_eq!(reopened.requeue_processing().await.unwrap(), 1);
        let item = reopened.dequeue().await.unwrap().unwrap();
        assert_eq!(item.id, id);
        assert_eq!(item.attempts, 2);
    }
}
