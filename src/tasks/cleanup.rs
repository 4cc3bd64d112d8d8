//! TTL Cleanup Task
//!
//! Background task that periodically removes expired entries from a backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheBackend;

/// Spawns a background task that sweeps expired entries every `interval`.
///
/// The task ends on its own once the backend refuses the sweep (it has been
/// stopped). The facade also aborts it through the returned handle on stop.
///
/// # Example
/// ```ignore
/// let backend: Arc<dyn CacheBackend> = Arc::new(LocalBackend::new(plan));
/// let cleanup_handle = spawn_cleanup_task(backend.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(backend: Arc<dyn CacheBackend>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            backend = backend.name(),
            "Starting TTL cleanup task with interval of {:?}", interval
        );

        loop {
            tokio::time::sleep(interval).await;

            match backend.cleanup_expired().await {
                Ok(0) => debug!("TTL cleanup: no expired entries found"),
                Ok(removed) => info!("TTL cleanup: removed {} expired entries", removed),
                Err(e) => {
                    debug!("TTL cleanup task exiting: {}", e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalBackend;
    use crate::config::{CapacityPlan, TierCapacity};

    fn backend() -> Arc<dyn CacheBackend> {
        let plan = CapacityPlan::builder()
            .heap(TierCapacity::Entries(100))
            .unwrap()
            .build()
            .unwrap();
        Arc::new(LocalBackend::new(plan))
    }

    #[tokio::test]
    async fn test_cleanup_task_removes_expired_entries() {
        let backend = backend();
        backend.set("expire_soon", b"value".to_vec(), 1).await.unwrap();

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let stats = backend.stats().await;
        assert_eq!(stats.total_entries, 0, "Expired entry should have been cleaned up");
        assert_eq!(stats.expirations, 1);
        // Swept without a read, so no miss was counted
        assert_eq!(stats.misses, 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_preserves_valid_entries() {
        let backend = backend();
        backend.set("long_lived", b"value".to_vec(), 3600).await.unwrap();
        backend.set("forever", b"value".to_vec(), 0).await.unwrap();

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(200));
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(
            backend.get("long_lived").await.unwrap(),
            Some(b"value".to_vec())
        );
        assert_eq!(backend.stats().await.total_entries, 2);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cleanup_task_can_be_aborted() {
        let handle = spawn_cleanup_task(backend(), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }

    #[tokio::test]
    async fn test_cleanup_task_exits_after_stop() {
        let backend = backend();
        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(50));

        backend.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(handle.is_finished(), "Task should exit once the backend is stopped");
    }
}
