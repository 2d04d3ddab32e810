//! In-memory state cache with bounded retention.
//!
//! Snapshots are never deleted explicitly, so every entry carries a TTL
//! counted from its most recent write. For a finished task that write is the
//! terminal one, so finished tasks stay readable for one full TTL.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use genstream_domain::{TaskId, TaskSnapshot};

use crate::infrastructure::ports::{CacheError, StateCachePort};

/// A thread-safe map whose entries expire `ttl` after they were last written.
///
/// Expired entries read as absent but are only dropped by `cleanup_expired()`.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, TtlEntry<V>>>,
    ttl: Duration,
}

struct TtlEntry<V> {
    value: V,
    written_at: Instant,
}

impl<V> TtlEntry<V> {
    fn is_live(&self, ttl: Duration) -> bool {
        self.written_at.elapsed() < ttl
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert a value, replacing any existing entry and restarting its TTL.
    pub async fn insert(&self, key: K, value: V) {
        let entry = TtlEntry {
            value,
            written_at: Instant::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Insert only if no live entry exists. Returns whether the value was written.
    pub async fn insert_if_absent(&self, key: K, value: V) -> bool {
        let mut guard = self.entries.write().await;
        if guard.get(&key).is_some_and(|e| e.is_live(self.ttl)) {
            return false;
        }
        guard.insert(
            key,
            TtlEntry {
                value,
                written_at: Instant::now(),
            },
        );
        true
    }

    /// Insert a value with an explicit write time (tests only).
    #[cfg(test)]
    pub async fn insert_at(&self, key: K, value: V, written_at: Instant) {
        let entry = TtlEntry { value, written_at };
        self.entries.write().await.insert(key, entry);
    }

    /// Get a value if it exists and hasn't expired.
    pub async fn get(&self, key: &K) -> Option<V> {
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|entry| entry.is_live(self.ttl))
            .map(|entry| entry.value.clone())
    }

    /// Remove all expired entries and return the count of removed entries.
    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before_count = guard.len();
        guard.retain(|_, entry| entry.is_live(self.ttl));
        before_count - guard.len()
    }

    /// Number of entries, including expired ones not yet cleaned.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Process-local [`StateCachePort`] backed by a [`TtlCache`].
pub struct TtlStateCache {
    inner: TtlCache<TaskId, TaskSnapshot>,
}

impl TtlStateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub async fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired().await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }
}

#[async_trait]
impl StateCachePort for TtlStateCache {
    async fn get(&self, task_id: TaskId) -> Result<Option<TaskSnapshot>, CacheError> {
        Ok(self.inner.get(&task_id).await)
    }

    async fn set(&self, task_id: TaskId, snapshot: TaskSnapshot) -> Result<(), CacheError> {
        self.inner.insert(task_id, snapshot).await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        task_id: TaskId,
        snapshot: TaskSnapshot,
    ) -> Result<bool, CacheError> {
        Ok(self.inner.insert_if_absent(task_id, snapshot).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(ttl: Duration) -> Instant {
        Instant::now() - (ttl + Duration::from_millis(1))
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<&str, i32> = TtlCache::new(ttl);
        cache.insert_at("stale", 1, expired(ttl)).await;
        cache.insert("fresh", 2).await;

        assert_eq!(cache.get(&"stale").await, None);
        assert_eq!(cache.get(&"fresh").await, Some(2));
    }

    #[tokio::test]
    async fn rewrite_restarts_ttl() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<&str, i32> = TtlCache::new(ttl);
        cache.insert_at("task", 1, expired(ttl)).await;
        cache.insert("task", 2).await;

        assert_eq!(cache.get(&"task").await, Some(2));
        assert_eq!(cache.cleanup_expired().await, 0);
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_live_value() {
        let ttl = Duration::from_secs(60);
        let cache: TtlCache<&str, i32> = TtlCache::new(ttl);
        assert!(cache.insert_if_absent("task", 1).await);
        assert!(!cache.insert_if_absent("task", 2).await);
        assert_eq!(cache.get(&"task").await, Some(1));
    }

    #[tokio::test]
    async fn insert_if_absent_replaces_expired_value() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<&str, i32> = TtlCache::new(ttl);
        cache.insert_at("task", 1, expired(ttl)).await;
        assert!(cache.insert_if_absent("task", 2).await);
        assert_eq!(cache.get(&"task").await, Some(2));
    }

    #[tokio::test]
    async fn cleanup_removes_expired() {
        let ttl = Duration::from_millis(10);
        let cache: TtlCache<&str, i32> = TtlCache::new(ttl);
        cache.insert_at("a", 1, expired(ttl)).await;
        cache.insert_at("b", 2, expired(ttl)).await;
        cache.insert("c", 3).await;

        assert_eq!(cache.cleanup_expired().await, 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn state_cache_round_trips_snapshots() {
        let cache = TtlStateCache::new(Duration::from_secs(60));
        let task_id = TaskId::new();
        assert_eq!(cache.get(task_id).await.unwrap(), None);

        assert!(cache
            .set_if_absent(task_id, TaskSnapshot::initial())
            .await
            .unwrap());
        let done = TaskSnapshot::succeeded(Some("done".into()), None);
        cache.set(task_id, done.clone()).await.unwrap();
        assert!(!cache
            .set_if_absent(task_id, TaskSnapshot::initial())
            .await
            .unwrap());

        assert_eq!(cache.get(task_id).await.unwrap(), Some(done));
    }
}
