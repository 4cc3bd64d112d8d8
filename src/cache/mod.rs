//! Cache Module
//!
//! The [`Cache`] facade and the backends behind it: a tiered in-memory store
//! with TTL expiration and LRU eviction, and a memcached client.

mod backend;
mod codec;
mod entry;
mod facade;
mod local;
mod lru;
mod stats;
mod store;
mod tier;

pub mod remote;


// Re-export public types
pub use backend::{CacheBackend, NoopBackend};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use entry::{current_timestamp_ms, CacheEntry, EntryTtlExpiry, Expiry, ExpiryPolicy, ENTRY_OVERHEAD};
pub use facade::{Cache, CacheState};
pub use local::LocalBackend;
pub use lru::LruTracker;
pub use remote::RemoteBackend;
pub use stats::CacheStats;
pub use store::TieredStore;
pub use tier::Tier;
