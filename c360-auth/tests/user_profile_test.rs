mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn test_get_and_update_profile() {
    let app = TestApp::spawn();
    let session = app.register("a@x.com", "pw").await;

    let (status, me) = app.get("/v1/users/me", Some(&session.access_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "a@x.com");
    assert!(me.get("password_hash").is_none());

    let (status, me) = app
        .request(
            Method::PATCH,
            "/v1/users/me",
            Some(&session.access_token),
            Some(json!({ "name": "Ada" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Ada");

    let (_, me) = app.get("/v1/users/me", Some(&session.access_token)).await;
    assert_eq!(me["name"], "Ada");
}

#[tokio::test]
async fn test_change_password_revokes_refresh_tokens() {
    let app = TestApp::spawn();
    let session = app.register("a@x.com", "old-pw").await;

    let (status, _) = app
        .post(
            "/v1/users/me/password",
            Some(&session.access_token),
            json!({ "current_password": "wrong", "new_password": "new-pw" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/v1/users/me/password",
            Some(&session.access_token),
            json!({ "current_password": "old-pw", "new_password": "new-pw" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/v1/auth/refresh",
            None,
            json!({ "refresh_token": session.refresh_token }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(app.login("a@x.com", "old-pw").await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login("a@x.com", "new-pw").await.0, StatusCode::OK);
}
