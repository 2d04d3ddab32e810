//! Task producer.

use std::sync::Arc;

use genstream_domain::{GenerationJob, TaskId, TaskRequest, TaskSnapshot};

use crate::infrastructure::ports::{
    CacheError, EnqueueOutcome, QueueError, QueuePort, StateCachePort,
};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Failed to seed task state: {0}")]
    Cache(#[from] CacheError),
    #[error("Failed to enqueue task: {0}")]
    Queue(#[from] QueueError),
}

/// Accepts a validated request and hands it to the generation queue.
pub struct SubmitTask {
    queue: Arc<dyn QueuePort<GenerationJob>>,
    cache: Arc<dyn StateCachePort>,
}

impl SubmitTask {
    pub fn new(queue: Arc<dyn QueuePort<GenerationJob>>, cache: Arc<dyn StateCachePort>) -> Self {
        Self { queue, cache }
    }

    pub async fn execute(&self, request: TaskRequest) -> Result<TaskId, SubmitError> {
        self.execute_with_id(TaskId::new(), request).await
    }

    /// Submit under a caller-chosen id. Submitting the same id twice yields
    /// one job and leaves any existing snapshot untouched.
    pub async fn execute_with_id(
        &self,
        task_id: TaskId,
        request: TaskRequest,
    ) -> Result<TaskId, SubmitError> {
        // Seed before enqueueing so an observer never finds the task missing
        let seeded = self
            .cache
            .set_if_absent(task_id, TaskSnapshot::initial())
            .await?;

        let job = GenerationJob::new(task_id, request);
        match self.queue.enqueue(task_id.to_uuid(), job, 0).await? {
            EnqueueOutcome::Enqueued => {
                tracing::info!(task_id = %task_id, "Task submitted");
            }
            EnqueueOutcome::Duplicate => {
                tracing::info!(task_id = %task_id, seeded, "Task already queued; ignoring duplicate submit");
            }
        }

        Ok(task_id)
    }
}
