//! Cache Statistics Module
//!
//! Tracks cache performance metrics: hits, misses, evictions, expirations and
//! the failures the remote backend degraded into misses or dropped writes.

use serde::Serialize;

// == Cache Stats ==
/// Snapshot of a backend's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Backend that produced the snapshot (`local`, `remote`, `none`)
    pub backend: &'static str,
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of retrievals that found nothing (absent, expired or failed)
    pub misses: u64,
    /// Entries dropped to respect tier capacity
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Remote requests abandoned after the timeout
    pub timeouts: u64,
    /// Remote requests that failed with an error
    pub errors: u64,
    /// Writes that never reached storage
    pub dropped_writes: u64,
    /// Entries currently stored (local backend only)
    pub total_entries: usize,
    /// Bytes used by the heap tier (local backend only)
    pub heap_bytes: u64,
    /// Bytes used by the off-heap tier (local backend only)
    pub off_heap_bytes: u64,
}

impl CacheStats {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }
}
