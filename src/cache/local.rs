//! Local Backend
//!
//! In-process backend over a [`TieredStore`], shared behind an async lock.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::{CacheBackend, CacheStats, TieredStore};
use crate::config::CapacityPlan;
use crate::error::{CacheError, Result};

/// Thread-safe tiered in-memory backend.
///
/// `stop` drops the store; every later call fails with `IllegalState`.
#[derive(Debug)]
pub struct LocalBackend {
    store: RwLock<Option<TieredStore>>,
}

impl LocalBackend {
    pub fn new(plan: CapacityPlan) -> Self {
        info!(heap = ?plan.heap, off_heap = ?plan.off_heap, "Local cache created");
        Self::from_store(TieredStore::new(plan))
    }

    pub fn from_store(store: TieredStore) -> Self {
        Self {
            store: RwLock::new(Some(store)),
        }
    }

    /// Runs `f` on the store, or fails if the backend was stopped.
    async fn with_store<T>(&self, f: impl FnOnce(&mut TieredStore) -> T) -> Result<T> {
        let mut guard = self.store.write().await;
        let store = guard.as_mut().ok_or_else(stopped)?;
        Ok(f(store))
    }
}

fn stopped() -> CacheError {
    CacheError::IllegalState("local cache has been stopped".to_string())
}

#[async_trait]
impl CacheBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        // Write lock: reads update LRU order and stats
        self.with_store(|store| store.get(key)).await
    }

    /// All keys under one lock.
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        self.with_store(|store| {
            keys.iter()
                .filter_map(|key| store.get(key).map(|value| ((*key).to_string(), value)))
                .collect()
        })
        .await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u32) -> Result<()> {
        self.with_store(|store| store.set(key.to_string(), value, ttl_seconds))
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_store(|store| {
            store.delete(key);
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.with_store(TieredStore::clear).await
    }

    async fn stop(&self) -> Result<()> {
        let mut guard = self.store.write().await;
        let store = guard.take().ok_or_else(stopped)?;
        info!(entries = store.len(), "Local cache stopped");
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        match self.store.read().await.as_ref() {
            Some(store) => store.stats(),
            None => CacheStats::new("local"),
        }
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        self.with_store(TieredStore::cleanup_expired).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Properties, HEAP_SIZE_IN_ENTRIES_KEY};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn backend() -> LocalBackend {
        let properties = Properties::from_iter([(HEAP_SIZE_IN_ENTRIES_KEY, "100")]);
        LocalBackend::new(CapacityPlan::from_properties(&properties).unwrap())
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = backend();
        assert_ok!(cache.set("setAndGet", b"1".to_vec(), 1).await);
        assert_eq!(cache.get("setAndGet").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn test_get_many() {
        let cache = backend();
        cache.set("many1", b"1".to_vec(), 60).await.unwrap();
        cache.set("many2", b"2".to_vec(), 60).await.unwrap();

        let found = cache.get_many(&["many1", "many2", "absent"]).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["many2"], b"2".to_vec());
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = backend();
        cache.set("clear", b"1".to_vec(), 1).await.unwrap();

        assert_ok!(cache.clear().await);

        assert_eq!(cache.get("clear").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = backend();
        cache.set("delete1", b"1".to_vec(), 1).await.unwrap();
        cache.set("delete2", b"2".to_vec(), 1).await.unwrap();

        assert_ok!(cache.delete("delete1").await);
        assert_ok!(cache.delete("never-set").await);

        assert_eq!(cache.get("delete1").await.unwrap(), None);
        assert_eq!(cache.get("delete2").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_stop() {
        let cache = backend();
        assert_ok!(cache.stop().await);

        let err = cache.set("stop", b"1".to_vec(), 1).await.unwrap_err();
        assert!(matches!(err, CacheError::IllegalState(_)));
        assert_err!(cache.get("stop").await);
        assert_err!(cache.delete("stop").await);
        assert_err!(cache.clear().await);
        assert_err!(cache.cleanup_expired().await);
        assert_err!(cache.stop().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_key() {
        let cache = Arc::new(backend());

        let mut handles = Vec::new();
        for i in 0..32u8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.set("shared", vec![i; 64], 0).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let value = cache.get("shared").await.unwrap().unwrap();
        assert_eq!(value.len(), 64);
        assert!(value.iter().all(|b| *b == value[0]), "torn value: {value:?}");
        assert_eq!(cache.stats().await.total_entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_keys() {
        let cache = Arc::new(backend());

        let mut handles = Vec::new();
        for i in 0..50 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                let key = format!("key{i}");
                cache.set(&key, key.clone().into_bytes(), 0).await.unwrap();
                assert_eq!(cache.get(&key).await.unwrap(), Some(key.into_bytes()));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.stats().await.total_entries, 50);
    }
}
