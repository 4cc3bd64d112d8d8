//! Cache Store Module
//!
//! Tiered storage engine: a heap tier in front of an optional off-heap tier,
//! LRU eviction inside each tier and per-entry TTL expiration.

use std::sync::Arc;

use tracing::debug;

use crate::cache::entry::{current_timestamp_ms, EntryTtlExpiry, ExpiryPolicy};
use crate::cache::{CacheEntry, CacheStats, Tier};
use crate::config::CapacityPlan;

// == Cache Store ==
/// Single-threaded tiered store; [`crate::cache::LocalBackend`] adds locking.
///
/// Entries pushed out of the heap tier move to the off-heap tier when one is
/// configured. Reads that hit the off-heap tier move the entry back to the
/// heap tier.
#[derive(Debug)]
pub struct TieredStore {
    heap: Option<Tier>,
    off_heap: Option<Tier>,
    policy: Arc<dyn ExpiryPolicy>,
    stats: CacheStats,
}

impl TieredStore {
    // == Constructor ==
    /// Creates a store with the tiers of `plan` and per-entry TTL expiry.
    pub fn new(plan: CapacityPlan) -> Self {
        Self::with_policy(plan, Arc::new(EntryTtlExpiry))
    }

    pub fn with_policy(plan: CapacityPlan, policy: Arc<dyn ExpiryPolicy>) -> Self {
        Self {
            heap: plan.heap.map(|capacity| Tier::new("heap", capacity)),
            off_heap: plan.off_heap.map(|capacity| Tier::new("off-heap", capacity)),
            policy,
            stats: CacheStats::new("local"),
        }
    }

    // == Set ==
    /// Stores `value` under `key` with its own TTL, replacing any previous
    /// value. Replacing a live entry goes through the policy's update hook.
    pub fn set(&mut self, key: String, value: Vec<u8>, ttl_seconds: u32) {
        let now = current_timestamp_ms();
        let previous = self.take(&key).filter(|old| !old.is_expired_at(now));

        let mut entry = CacheEntry::new(value, ttl_seconds);
        let expiry = match &previous {
            Some(old) => self.policy.on_update(old, &entry),
            None => self.policy.on_creation(&entry),
        };
        entry.apply(expiry, now);

        self.place(key, entry);
    }

    // == Get ==
    /// Returns a copy of the value if present and not expired.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        let now = current_timestamp_ms();
        let policy = Arc::clone(&self.policy);

        if let Some(heap) = self.heap.as_mut() {
            if let Some(entry) = heap.get_mut(key) {
                if entry.is_expired_at(now) {
                    heap.remove(key);
                    self.stats.record_expiration();
                    self.stats.record_miss();
                    return None;
                }
                if let Some(expiry) = policy.on_access(entry) {
                    entry.apply(expiry, now);
                }
                let value = entry.value.clone();
                heap.touch(key);
                self.stats.record_hit();
                return Some(value);
            }
        }

        let Some(off_heap) = self.off_heap.as_mut() else {
            self.stats.record_miss();
            return None;
        };
        let Some(mut entry) = off_heap.remove(key) else {
            self.stats.record_miss();
            return None;
        };
        if entry.is_expired_at(now) {
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }
        if let Some(expiry) = policy.on_access(&entry) {
            entry.apply(expiry, now);
        }
        let value = entry.value.clone();
        self.stats.record_hit();
        self.place(key.to_string(), entry);
        Some(value)
    }

    // == Delete ==
    /// Removes `key` from every tier; missing keys are not an error.
    pub fn delete(&mut self, key: &str) -> bool {
        self.take(key).is_some()
    }

    pub fn clear(&mut self) {
        for tier in self.tiers_mut() {
            tier.clear();
        }
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = current_timestamp_ms();
        let removed: usize = self
            .tiers_mut()
            .map(|tier| tier.remove_expired(now))
            .sum();
        self.stats.expirations += removed as u64;
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.total_entries = self.len();
        stats.heap_bytes = self.heap.as_ref().map_or(0, Tier::used_bytes);
        stats.off_heap_bytes = self.off_heap.as_ref().map_or(0, Tier::used_bytes);
        stats
    }

    pub fn len(&self) -> usize {
        self.heap.as_ref().map_or(0, Tier::len) + self.off_heap.as_ref().map_or(0, Tier::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn heap(&self) -> Option<&Tier> {
        self.heap.as_ref()
    }

    pub fn off_heap(&self) -> Option<&Tier> {
        self.off_heap.as_ref()
    }

    fn tiers_mut(&mut self) -> impl Iterator<Item = &mut Tier> {
        self.heap.iter_mut().chain(self.off_heap.iter_mut())
    }

    fn take(&mut self, key: &str) -> Option<CacheEntry> {
        let from_heap = self.heap.as_mut().and_then(|tier| tier.remove(key));
        let from_off_heap = self.off_heap.as_mut().and_then(|tier| tier.remove(key));
        from_heap.or(from_off_heap)
    }

    // == Placement ==
    /// Puts an entry in the fastest tier that can hold it, cascading victims
    /// down to the off-heap tier.
    fn place(&mut self, key: String, entry: CacheEntry) {
        let footprint = entry.footprint(&key);

        if let Some(heap) = self.heap.as_mut().filter(|tier| tier.admits(footprint)) {
            let victims = heap.insert(key, entry);
            for (victim_key, victim) in victims {
                self.demote(victim_key, victim);
            }
            return;
        }

        self.demote(key, entry);
    }

    fn demote(&mut self, key: String, entry: CacheEntry) {
        if entry.is_expired() {
            self.stats.record_expiration();
            return;
        }

        let footprint = entry.footprint(&key);
        match self.off_heap.as_mut().filter(|tier| tier.admits(footprint)) {
            Some(off_heap) => {
                let victims = off_heap.insert(key, entry);
                self.stats.evictions += victims.len() as u64;
            }
            None => {
                debug!(key = %key, footprint, "No tier can hold entry, evicting");
                self.stats.record_eviction();
            }
        }
    }
}
