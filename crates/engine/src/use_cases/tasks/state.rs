//! Poll the current state of a task.

use std::sync::Arc;

use genstream_domain::{TaskId, TaskSnapshot};

use crate::infrastructure::ports::{CacheError, StateCachePort};

pub struct GetTaskState {
    cache: Arc<dyn StateCachePort>,
}

impl GetTaskState {
    pub fn new(cache: Arc<dyn StateCachePort>) -> Self {
        Self { cache }
    }

    /// `None` for unknown or expired tasks.
    pub async fn execute(&self, task_id: TaskId) -> Result<Option<TaskSnapshot>, CacheError> {
        self.cache.get(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::MockStateCachePort;
    use mockall::predicate::*;

    #[tokio::test]
    async fn returns_cached_snapshot() {
        let task_id = TaskId::new();
        let mut cache = MockStateCachePort::new();
        cache
            .expect_get()
            .with(eq(task_id))
            .returning(|_| Ok(Some(TaskSnapshot::succeeded(Some("done".into()), None))));

        let snapshot = GetTaskState::new(Arc::new(cache))
            .execute(task_id)
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.is_success());
        assert_eq!(snapshot.text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn unknown_task_is_none() {
        let mut cache = MockStateCachePort::new();
        cache.expect_get().returning(|_| Ok(None));

        let result = GetTaskState::new(Arc::new(cache))
            .execute(TaskId::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
