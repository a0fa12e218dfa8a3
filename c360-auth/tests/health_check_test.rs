mod common;

use axum::http::{header, Method, StatusCode};
use common::TestApp;

#[tokio::test]
async fn test_health_check_reports_dependencies() {
    let app = TestApp::spawn();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "c360-auth-test");
    assert_eq!(body["environment"], "dev");
    assert_eq!(body["checks"]["store"], "up");
    assert_eq!(body["checks"]["cache"], "up");
}

#[tokio::test]
async fn test_metrics_disabled_without_recorder() {
    let app = TestApp::spawn();

    let (status, _) = app.get("/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_responses_carry_security_headers() {
    let app = TestApp::spawn();

    let (_, headers, _) = app.request_raw(Method::GET, "/health", None, None).await;
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert!(headers.contains_key(header::STRICT_TRANSPORT_SECURITY));
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn test_error_responses_carry_request_id() {
    let app = TestApp::spawn();

    let (status, headers, body) = app
        .request_raw(Method::GET, "/v1/users/me", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.contains_key("x-request-id"));

    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
}
