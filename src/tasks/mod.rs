//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is active.
//!
//! # Tasks
//! - TTL Cleanup: Removes expired entries from the local backend

mod cleanup;

pub use cleanup::spawn_cleanup_task;
