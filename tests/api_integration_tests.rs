//! Integration Tests for API Endpoints
//!
//! Tests full request/response cycle for each endpoint over a local cache.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use replay_cache::{api::create_router, AppState, Cache, Properties};
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> Router {
    create_router(test_state())
}

fn test_state() -> AppState {
    let properties = Properties::parse("cache.heapSizeInEntries=100").unwrap();
    AppState::new(Cache::from_properties(&properties).unwrap())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

async fn body_to_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// == SET Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let app = create_test_app();

    let response = send(&app, "PUT", "/set", Some(r#"{"key":"test_key","value":"test_value"}"#)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("test_key"));
    // No ttl and no expression: thirty days
    assert_eq!(json["ttl"].as_u64().unwrap(), 30 * 24 * 3600);
}

#[tokio::test]
async fn test_set_endpoint_with_expression() {
    let app = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(r#"{"key":"expr","value":1,"expiration":"1h30mn"}"#),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response).await["ttl"].as_u64().unwrap(), 5400);
}

#[tokio::test]
async fn test_set_endpoint_bad_expression() {
    let app = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(r#"{"key":"expr","value":1,"expiration":"whenever"}"#),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("Invalid duration pattern"));
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_structured_value() {
    let app = create_test_app();

    let set = send(
        &app,
        "PUT",
        "/set",
        Some(r#"{"key":"user","value":{"name":"ada","langs":["en","fr"]},"ttl":60}"#),
    )
    .await;
    assert_eq!(set.status(), StatusCode::OK);

    let response = send(&app, "GET", "/get/user", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["key"], "user");
    assert_eq!(json["value"]["name"], "ada");
    assert_eq!(json["value"]["langs"][1], "fr");
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let app = create_test_app();

    let response = send(&app, "GET", "/get/nonexistent_key", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_to_json(response).await.get("error").is_some());
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint_success() {
    let app = create_test_app();
    send(&app, "PUT", "/set", Some(r#"{"key":"delete_key","value":"v"}"#)).await;

    let response = send(&app, "DELETE", "/del/delete_key", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "GET", "/get/delete_key", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_missing_key_is_ok() {
    let app = create_test_app();

    let response = send(&app, "DELETE", "/del/nonexistent_key", None).await;

    assert_eq!(response.status(), StatusCode::OK);
}

// == CLEAR Endpoint Tests ==

#[tokio::test]
async fn test_clear_endpoint() {
    let app = create_test_app();
    for key in ["one", "two", "three"] {
        let body = format!(r#"{{"key":"{key}","value":"{key}"}}"#);
        send(&app, "PUT", "/set", Some(&body)).await;
    }

    let response = send(&app, "DELETE", "/clear", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    for key in ["one", "two", "three"] {
        let response = send(&app, "GET", &format!("/get/{key}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

// == STATS Endpoint Tests ==

#[tokio::test]
async fn test_stats_endpoint() {
    let app = create_test_app();

    send(&app, "PUT", "/set", Some(r#"{"key":"stats_key","value":"stats_value"}"#)).await;
    send(&app, "GET", "/get/stats_key", None).await;
    send(&app, "GET", "/get/nonexistent", None).await;

    let response = send(&app, "GET", "/stats", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["backend"], "local");
    assert_eq!(json["hits"].as_u64().unwrap(), 1);
    assert_eq!(json["misses"].as_u64().unwrap(), 1);
    assert_eq!(json["total_entries"].as_u64().unwrap(), 1);
    assert!((json["hit_rate"].as_f64().unwrap() - 0.5).abs() < 0.001);
}

// == HEALTH Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app();

    let response = send(&app, "GET", "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["backend"], "local");
    assert!(json.get("timestamp").is_some());
}

// == Lifecycle Tests ==

#[tokio::test]
async fn test_writes_after_stop_are_unavailable() {
    let state = test_state();
    let app = create_router(state.clone());
    state.cache.stop().await.unwrap();

    let response = send(&app, "PUT", "/set", Some(r#"{"key":"late","value":1}"#)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Reads after stop are plain misses
    let response = send(&app, "GET", "/get/late", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_to_json(send(&app, "GET", "/health", None).await).await;
    assert_eq!(json["state"], "stopped");
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let app = create_test_app();

    let response = send(&app, "PUT", "/set", Some(r#"{"invalid json"#)).await;

    // Axum rejects malformed JSON with 400 or 422 depending on the failure
    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_key_request() {
    let app = create_test_app();

    let response = send(&app, "PUT", "/set", Some(r#"{"key":"","value":"test"}"#)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_to_json(response).await.get("error").is_some());
}

// == TTL Expiration via API Tests ==

#[tokio::test]
async fn test_ttl_expiration_via_api() {
    let app = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(r#"{"key":"ttl_test","value":"expires_soon","ttl":1}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "GET", "/get/ttl_test", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = send(&app, "GET", "/get/ttl_test", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let app = create_test_app();

    send(&app, "PUT", "/set", Some(r#"{"key":"pinned","value":true,"ttl":0}"#)).await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = send(&app, "GET", "/get/pinned", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response).await["value"], true);
}
