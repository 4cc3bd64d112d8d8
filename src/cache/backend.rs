//! Backend Contract
//!
//! Every storage engine behind the [`crate::cache::Cache`] facade implements
//! [`CacheBackend`]. Values cross this boundary already encoded.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::cache::CacheStats;
use crate::error::Result;

/// Storage engine for encoded values with per-entry TTL.
///
/// After [`CacheBackend::stop`] every method returning a `Result` fails with
/// [`crate::error::CacheError::IllegalState`].
#[async_trait]
pub trait CacheBackend: Send + Sync + Debug {
    /// Short name used in logs and statistics.
    fn name(&self) -> &'static str;

    /// Returns the value for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Returns the values found for `keys`. Missing keys are left out.
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert((*key).to_string(), value);
            }
        }
        Ok(found)
    }

    /// Stores `value` for `ttl_seconds` (0 = no expiration).
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u32) -> Result<()>;

    /// Removes `key`; missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every entry.
    async fn clear(&self) -> Result<()>;

    /// Releases the backend's resources.
    async fn stop(&self) -> Result<()>;

    async fn stats(&self) -> CacheStats;

    /// Drops expired entries eagerly. Backends that expire on their own
    /// keep the default.
    async fn cleanup_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

// == Noop Backend ==
/// Backend used when caching is disabled: reads miss, writes vanish.
#[derive(Debug, Default)]
pub struct NoopBackend;

#[async_trait]
impl CacheBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_seconds: u32) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        CacheStats::new("none")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_noop_never_caches() {
        let backend = NoopBackend;

        assert_ok!(backend.set("key", b"value".to_vec(), 60).await);
        assert_eq!(backend.get("key").await.unwrap(), None);
        assert!(backend.get_many(&["key"]).await.unwrap().is_empty());
        assert_ok!(backend.delete("key").await);
        assert_ok!(backend.clear().await);
        assert_ok!(backend.cleanup_expired().await);
        assert_eq!(backend.stats().await.backend, "none");
    }
}
