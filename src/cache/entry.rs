//! Cache Entry Module
//!
//! Defines individual cache entries, which carry their own TTL, and the
//! expiry policy that turns that TTL into an expiration time.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bookkeeping bytes charged per entry on top of key and value.
pub const ENTRY_OVERHEAD: u64 = 64;

// == Cache Entry ==
/// A stored value together with the TTL requested when it was written.
#[derive(Clone)]
pub struct CacheEntry {
    /// The encoded value
    pub value: Vec<u8>,
    /// TTL in seconds requested by the writer, 0 = never expires
    pub ttl_seconds: u32,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry with no expiration applied yet.
    ///
    /// The store applies the policy's [`Expiry`] before the entry is visible.
    pub fn new(value: Vec<u8>, ttl_seconds: u32) -> Self {
        Self {
            value,
            ttl_seconds,
            created_at: current_timestamp_ms(),
            expires_at: None,
        }
    }

    // == Apply Expiry ==
    /// Sets the expiration time relative to `now_ms`.
    pub fn apply(&mut self, expiry: Expiry, now_ms: u64) {
        self.expires_at = match expiry {
            Expiry::Never => None,
            Expiry::After(ttl) => Some(now_ms.saturating_add(ttl.as_millis() as u64)),
        };
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// its expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires) if now_ms >= expires)
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    // == Footprint ==
    /// Bytes this entry accounts for in a byte-bounded tier.
    pub fn footprint(&self, key: &str) -> u64 {
        key.len() as u64 + self.value.len() as u64 + ENTRY_OVERHEAD
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("value_len", &self.value.len())
            .field("ttl_seconds", &self.ttl_seconds)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// == Expiry Policy ==
/// How long an entry lives from the moment a policy hook is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    After(Duration),
}

impl Expiry {
    /// Converts a TTL in seconds, where 0 means no expiration.
    pub fn from_ttl_seconds(ttl_seconds: u32) -> Self {
        if ttl_seconds == 0 {
            Expiry::Never
        } else {
            Expiry::After(Duration::from_secs(u64::from(ttl_seconds)))
        }
    }
}

/// Decides expiration times when entries are created, replaced and read.
pub trait ExpiryPolicy: Send + Sync + fmt::Debug {
    /// Expiry of an entry stored under a key that held nothing live.
    fn on_creation(&self, entry: &CacheEntry) -> Expiry;

    /// Expiry of `new` replacing the live entry `old`.
    fn on_update(&self, old: &CacheEntry, new: &CacheEntry) -> Expiry;

    /// New expiry after a read, or None to keep the current one.
    fn on_access(&self, entry: &CacheEntry) -> Option<Expiry>;
}

/// Uses the TTL each entry was written with; reads never extend it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryTtlExpiry;

impl ExpiryPolicy for EntryTtlExpiry {
    fn on_creation(&self, entry: &CacheEntry) -> Expiry {
        Expiry::from_ttl_seconds(entry.ttl_seconds)
    }

    fn on_update(&self, _old: &CacheEntry, new: &CacheEntry) -> Expiry {
        Expiry::from_ttl_seconds(new.ttl_seconds)
    }

    fn on_access(&self, _entry: &CacheEntry) -> Option<Expiry> {
        None
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
