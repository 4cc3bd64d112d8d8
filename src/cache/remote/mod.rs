//! Remote Backend
//!
//! Memcached client. Keys are spread over the configured nodes by hash and
//! each node runs its operations in order through one connection. Every
//! failure of the network or the server is turned into a miss (reads) or a
//! dropped write (writes) and logged; the cache is advisory and never the
//! source of truth.

pub mod node;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheBackend, CacheStats};
use crate::config::RemoteSettings;
use crate::error::{CacheError, Result};

pub use node::{node_index, Node};

/// Longest key memcached accepts, in bytes.
pub const MAX_KEY_LEN: usize = 250;

/// Expirations above this many seconds are read by memcached as Unix
/// timestamps.
pub const MAX_RELATIVE_EXPIRATION: u32 = 60 * 60 * 24 * 30;

/// Converts a TTL in seconds to what memcached expects: relative seconds up
/// to 30 days, an absolute Unix timestamp beyond that.
pub fn wire_expiration(ttl_seconds: u32, now_unix: i64) -> i64 {
    if ttl_seconds <= MAX_RELATIVE_EXPIRATION {
        i64::from(ttl_seconds)
    } else {
        now_unix.saturating_add(i64::from(ttl_seconds))
    }
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CacheError::InvalidRequest(format!(
            "remote cache keys must be 1..={MAX_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    if key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(CacheError::InvalidRequest(format!(
            "remote cache keys must not contain whitespace or control characters: {key:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
    dropped_writes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// == Remote Backend ==
#[derive(Debug)]
pub struct RemoteBackend {
    nodes: Vec<Node>,
    op_timeout: Duration,
    stopped: AtomicBool,
    counters: Counters,
}

impl RemoteBackend {
    /// Creates the client. Each node connects on first use.
    pub fn new(settings: &RemoteSettings) -> Result<Self> {
        if settings.nodes.is_empty() {
            return Err(CacheError::Configuration(
                "Bad configuration for remote cache: missing host(s)".to_string(),
            ));
        }
        let nodes: Vec<Node> = settings
            .nodes
            .iter()
            .map(|address| {
                Node::new(
                    address.clone(),
                    settings.credentials.clone(),
                    settings.op_timeout,
                    settings.queue_capacity,
                )
            })
            .collect();

        info!(
            nodes = %settings.nodes.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
            timeout_ms = settings.op_timeout.as_millis() as u64,
            authenticated = settings.credentials.is_some(),
            "Remote cache client created"
        );

        Ok(Self {
            nodes,
            op_timeout: settings.op_timeout,
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn node_for(&self, key: &str) -> &Node {
        &self.nodes[node_index(key.as_bytes(), self.nodes.len())]
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(CacheError::IllegalState(
                "remote cache client has been stopped".to_string(),
            ));
        }
        Ok(())
    }

    /// Addresses of every node.
    pub fn connection_description(&self) -> String {
        self.nodes
            .iter()
            .map(|node| node.address().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Per-node connection and failure state.
    pub fn connection_status(&self) -> String {
        self.nodes
            .iter()
            .map(Node::status)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Waits for every fire-and-forget write issued so far.
    pub async fn wait_pending_writes(&self) {
        for node in &self.nodes {
            node.drain().await;
        }
    }

    pub fn pending_writes(&self) -> usize {
        self.nodes.iter().map(Node::queued_writes).sum()
    }

    /// Counts and logs the outcome of one read.
    fn settle_get(&self, key: &str, outcome: Result<Option<Vec<u8>>>) -> Option<Vec<u8>> {
        match outcome {
            Ok(Some(value)) => {
                Counters::bump(&self.counters.hits);
                Some(value)
            }
            Ok(None) => {
                Counters::bump(&self.counters.misses);
                None
            }
            Err(CacheError::Timeout(cause)) => {
                Counters::bump(&self.counters.timeouts);
                Counters::bump(&self.counters.misses);
                warn!(
                    "Cache miss due to timeout. key={}, cause={}, connection={}, connectionStatus={}",
                    key,
                    cause,
                    self.connection_description(),
                    self.connection_status()
                );
                None
            }
            Err(e) => {
                Counters::bump(&self.counters.errors);
                Counters::bump(&self.counters.misses);
                error!(
                    "Cache miss due to error. key={}, cause={}, connection={}, connectionStatus={}",
                    key,
                    e,
                    self.connection_description(),
                    self.connection_status()
                );
                None
            }
        }
    }

    fn count_failure(&self, what: &str, target: &str, error: &CacheError) {
        match error {
            CacheError::Timeout(_) => {
                Counters::bump(&self.counters.timeouts);
                warn!("Cache {} timed out. {}, cause={}", what, target, error);
            }
            _ => {
                Counters::bump(&self.counters.errors);
                error!("Cache {} failed. {}, cause={}", what, target, error);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    // == Get ==
    /// Bounded read, queued behind earlier operations on the same node.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_running()?;
        if let Err(e) = validate_key(key) {
            warn!("Cache miss due to invalid key. key={}, cause={}", key, e);
            Counters::bump(&self.counters.misses);
            return Ok(None);
        }

        match self.node_for(key).get(key).await {
            Err(e @ CacheError::IllegalState(_)) => Err(e),
            outcome => Ok(self.settle_get(key, outcome)),
        }
    }

    /// Queues every read before waiting, so nodes answer in parallel under
    /// one deadline.
    async fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        self.ensure_running()?;
        let deadline = Instant::now() + self.op_timeout;

        let mut answers = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(e) = validate_key(key) {
                warn!("Cache miss due to invalid key. key={}, cause={}", key, e);
                Counters::bump(&self.counters.misses);
                continue;
            }
            let node = self.node_for(key);
            answers.push((*key, node, node.request_get(key)));
        }

        let mut found = HashMap::with_capacity(answers.len());
        for (key, node, answer) in answers {
            let outcome = match answer {
                Ok(answer) => node.await_answer(answer, deadline).await,
                Err(e @ CacheError::IllegalState(_)) => return Err(e),
                Err(e) => Err(e),
            };
            if let Some(value) = self.settle_get(key, outcome) {
                found.insert(key.to_string(), value);
            }
        }
        Ok(found)
    }

    // == Set ==
    /// Fire-and-forget write: queued on the key's node and returns
    /// immediately.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u32) -> Result<()> {
        self.ensure_running()?;
        if let Err(e) = validate_key(key) {
            warn!("Cache write dropped due to invalid key. key={}, cause={}", key, e);
            Counters::bump(&self.counters.dropped_writes);
            return Ok(());
        }

        let node = self.node_for(key);
        let expiration = wire_expiration(ttl_seconds, chrono::Utc::now().timestamp());
        match node.set(key, value, expiration) {
            Ok(()) => Ok(()),
            Err(e @ CacheError::IllegalState(_)) => Err(e),
            Err(e) => {
                Counters::bump(&self.counters.dropped_writes);
                warn!(
                    "Cache write dropped. key={}, cause={}, connectionStatus={}",
                    key,
                    e,
                    node.status()
                );
                Ok(())
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_running()?;
        if validate_key(key).is_err() {
            return Ok(());
        }

        let node = self.node_for(key);
        match node.delete(key).await {
            Ok(()) => Ok(()),
            Err(e @ CacheError::IllegalState(_)) => Err(e),
            Err(e) => {
                self.count_failure("delete", &format!("key={key}, connectionStatus={}", node.status()), &e);
                Ok(())
            }
        }
    }

    // == Clear ==
    /// Flushes every node.
    async fn clear(&self) -> Result<()> {
        self.ensure_running()?;
        for node in &self.nodes {
            match node.flush().await {
                Ok(()) => debug!(node = %node.address(), "Flushed remote cache node"),
                Err(e @ CacheError::IllegalState(_)) => return Err(e),
                Err(e) => self.count_failure("flush", &format!("node={}", node.address()), &e),
            }
        }
        Ok(())
    }

    // == Stop ==
    /// Stops accepting operations, lets each node finish its queue (bounded)
    /// and closes every connection.
    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(CacheError::IllegalState(
                "remote cache client has already been stopped".to_string(),
            ));
        }

        let workers: Vec<_> = self.nodes.iter().filter_map(Node::close).collect();
        for worker in workers {
            let abort = worker.abort_handle();
            match timeout(self.op_timeout * 2, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Remote cache node worker failed: {}", e),
                Err(_) => {
                    warn!("Remote cache stopped with writes still pending");
                    abort.abort();
                }
            }
        }
        info!(nodes = self.nodes.len(), "Remote cache client stopped");
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let dropped_on_nodes: u64 = self.nodes.iter().map(Node::dropped_writes).sum();
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            timeouts: load(&self.counters.timeouts),
            errors: load(&self.counters.errors),
            dropped_writes: load(&self.counters.dropped_writes) + dropped_on_nodes,
            ..CacheStats::new("remote")
        }
    }
}
