//! RePlay Cache - pluggable key-value cache with per-entry TTL
//!
//! One [`Cache`] facade in front of either a tiered in-memory store (heap and
//! off-heap tiers, LRU eviction) or a memcached cluster, with a small HTTP
//! service exposing it.

pub mod api;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod duration;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{Cache, CacheBackend, CacheState, CacheStats};
pub use config::{BackendConfig, Config, Properties};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
