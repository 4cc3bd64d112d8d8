//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::Value;
use tracing::debug;

use crate::cache::{Cache, CacheStats};
use crate::config::{BackendConfig, Config};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, DeleteResponse, GetResponse, HealthResponse, SetRequest, SetResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
///
/// The cache does its own locking, so handlers only share an `Arc`.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: Arc<Cache>,
}

impl AppState {
    /// Creates a new AppState around the given cache.
    pub fn new(cache: Cache) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Fails if the cache properties do not describe a valid backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = BackendConfig::from_properties(&config.properties)?;
        let cache = Cache::new(backend)
            .with_cleanup_interval(std::time::Duration::from_secs(config.cleanup_interval));
        Ok(Self::new(cache))
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value under a key, with a TTL given in seconds or as a
/// duration expression.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }
    let ttl = req.ttl_seconds()?;

    state.cache.set(&req.key, &req.value, ttl).await?;

    Ok(Json(SetResponse::new(req.key, ttl)))
}

/// Handler for GET /get/:key
///
/// Any kind of miss (absent, expired, backend failure) answers 404.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    match state.cache.get::<Value>(&key).await {
        Some(value) => Ok(Json(GetResponse::new(key, value))),
        None => {
            debug!(key = %key, "Cache miss");
            Err(CacheError::NotFound(key))
        }
    }
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.cache.delete(&key).await?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /clear
pub async fn clear_handler(State(state): State<AppState>) -> Result<Json<ClearResponse>> {
    state.cache.clear().await?;

    Ok(Json(ClearResponse::cleared()))
}

/// Handler for GET /stats
///
/// Returns the backend counters; all zero before first use or after stop.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = match state.cache.stats().await {
        Some(stats) => stats,
        None => CacheStats::new(state.cache.backend_name()),
    };

    Json(StatsResponse::new(stats))
}

/// Handler for GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_state = state.cache.state().await;
    Json(HealthResponse::new(state.cache.backend_name(), cache_state))
}
