//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache library and its HTTP surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid or contradictory configuration, raised at construction time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation attempted on a cache or backend that has been stopped
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Value could not be encoded or decoded by the codec
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote node answered with an error or an unexpected frame
    #[error("Remote error: {0}")]
    Remote(String),

    /// Remote node did not answer in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Socket level failure talking to a remote node
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::IllegalState(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::Remote(_) | CacheError::Io(_) => StatusCode::BAD_GATEWAY,
            CacheError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Configuration(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
