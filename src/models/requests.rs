//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::remote::MAX_KEY_LEN;
use crate::duration::parse_expiration;
use crate::error::Result;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value, stored as is
/// - `ttl`: Optional TTL in seconds, 0 for no expiration
/// - `expiration`: Optional duration expression (`"10mn"`, `"2d4h"`), used
///   when `ttl` is absent
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Optional duration expression
    #[serde(default)]
    pub expiration: Option<String>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LEN {
            return Some(format!(
                "Key exceeds maximum length of {} bytes",
                MAX_KEY_LEN
            ));
        }
        if self.key.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Some("Key cannot contain whitespace or control characters".to_string());
        }
        None
    }

    /// Effective TTL: `ttl` if given, else the parsed `expiration`, else 30 days.
    pub fn ttl_seconds(&self) -> Result<u32> {
        match self.ttl {
            Some(ttl) => Ok(ttl),
            None => parse_expiration(self.expiration.as_deref()),
        }
    }
}
