//! Storage Tier Module
//!
//! One capacity-bounded pool of entries with its own LRU order.

use std::collections::HashMap;

use crate::cache::{CacheEntry, LruTracker};
use crate::config::TierCapacity;

// == Tier ==
/// A bounded map of entries, evicting least recently used keys when full.
#[derive(Debug)]
pub struct Tier {
    name: &'static str,
    capacity: TierCapacity,
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    used_bytes: u64,
}

impl Tier {
    pub fn new(name: &'static str, capacity: TierCapacity) -> Self {
        Self {
            name,
            capacity,
            entries: HashMap::new(),
            lru: LruTracker::new(),
            used_bytes: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an entry of `footprint` bytes could ever be held here.
    pub fn admits(&self, footprint: u64) -> bool {
        match self.capacity {
            TierCapacity::Entries(max) => max > 0,
            TierCapacity::Bytes(max) => footprint <= max,
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn touch(&mut self, key: &str) {
        if self.entries.contains_key(key) {
            self.lru.touch(key);
        }
    }

    // == Insert ==
    /// Stores `entry` under `key`, replacing any previous entry.
    ///
    /// Returns the entries pushed out to make room, oldest first. The caller
    /// must check [`Tier::admits`] first.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Vec<(String, CacheEntry)> {
        self.remove(&key);

        let footprint = entry.footprint(&key);
        let mut victims = Vec::new();
        while !self.has_room_for(footprint) {
            let Some(victim_key) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(victim) = self.entries.remove(&victim_key) {
                self.used_bytes -= victim.footprint(&victim_key);
                victims.push((victim_key, victim));
            }
        }

        self.used_bytes += footprint;
        self.lru.touch(&key);
        self.entries.insert(key, entry);
        victims
    }

    fn has_room_for(&self, footprint: u64) -> bool {
        match self.capacity {
            TierCapacity::Entries(max) => (self.entries.len() as u64) < max,
            TierCapacity::Bytes(max) => self.used_bytes + footprint <= max,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.used_bytes -= entry.footprint(key);
        self.lru.remove(key);
        Some(entry)
    }

    /// Removes every entry expired at `now_ms`, returning how many.
    pub fn remove_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.used_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::ENTRY_OVERHEAD;

    fn entry(len: usize) -> CacheEntry {
        CacheEntry::new(vec![7; len], 0)
    }

    #[test]
    fn test_entry_bounded_tier_evicts_lru() {
        let mut tier = Tier::new("heap", TierCapacity::Entries(2));

        assert!(tier.insert("a".into(), entry(1)).is_empty());
        assert!(tier.insert("b".into(), entry(1)).is_empty());
        tier.touch("a");

        let victims = tier.insert("c".into(), entry(1));
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].0, "b");
        assert_eq!(tier.len(), 2);
        assert!(tier.get("a").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut tier = Tier::new("heap", TierCapacity::Entries(2));
        tier.insert("a".into(), entry(1));
        tier.insert("b".into(), entry(1));

        assert!(tier.insert("a".into(), entry(5)).is_empty());
        assert_eq!(tier.len(), 2);
        assert_eq!(tier.get("a").unwrap().value.len(), 5);
    }

    #[test]
    fn test_byte_bounded_tier() {
        let per_entry = 1 + 10 + ENTRY_OVERHEAD;
        let mut tier = Tier::new("off-heap", TierCapacity::Bytes(per_entry * 3));

        for key in ["a", "b", "c"] {
            assert!(tier.insert(key.into(), entry(10)).is_empty());
        }
        assert_eq!(tier.used_bytes(), per_entry * 3);

        let victims = tier.insert("d".into(), entry(10));
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].0, "a");
        assert_eq!(tier.used_bytes(), per_entry * 3);
    }

    #[test]
    fn test_large_entry_pushes_out_several() {
        let small = 1 + 10 + ENTRY_OVERHEAD;
        let mut tier = Tier::new("heap", TierCapacity::Bytes(small * 3));
        for key in ["a", "b", "c"] {
            tier.insert(key.into(), entry(10));
        }

        let victims = tier.insert("d".into(), entry(10 + small as usize));
        assert_eq!(victims.len(), 2);
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_admits() {
        let tier = Tier::new("heap", TierCapacity::Bytes(100));
        assert!(tier.admits(100));
        assert!(!tier.admits(101));
        assert!(Tier::new("heap", TierCapacity::Entries(1)).admits(u64::MAX));
    }

    #[test]
    fn test_remove_and_clear_track_bytes() {
        let mut tier = Tier::new("heap", TierCapacity::Entries(10));
        tier.insert("a".into(), entry(10));
        tier.insert("b".into(), entry(20));

        assert!(tier.remove("a").is_some());
        assert!(tier.remove("a").is_none());
        assert_eq!(tier.used_bytes(), 1 + 20 + ENTRY_OVERHEAD);

        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.used_bytes(), 0);
    }

    #[test]
    fn test_remove_expired() {
        let mut tier = Tier::new("heap", TierCapacity::Entries(10));
        let mut expired = entry(1);
        expired.expires_at = Some(1_000);
        let mut live = entry(1);
        live.expires_at = Some(5_000);

        tier.insert("old".into(), expired);
        tier.insert("new".into(), live);
        tier.insert("forever".into(), entry(1));

        assert_eq!(tier.remove_expired(2_000), 1);
        assert!(tier.get("old").is_none());
        assert_eq!(tier.len(), 2);
    }
}
