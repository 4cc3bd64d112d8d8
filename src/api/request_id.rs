//! Request ID Middleware
//!
//! Puts the request id into the diagnostic context of the request, so cache
//! log lines can be correlated with the request that caused them.

use std::collections::HashMap;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::diagnostics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Diagnostic context key holding the request id.
pub const REQUEST_ID_KEY: &str = "requestId";

/// Reuses the caller's `x-request-id` or generates one, runs the rest of the
/// stack inside a diagnostic scope carrying it, and echoes it back.
pub async fn add_request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let context = HashMap::from([(REQUEST_ID_KEY.to_string(), request_id.clone())]);
    let mut response = diagnostics::scope(context, next.run(request)).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
