//! Shared setup for c360-auth integration tests.
//!
//! Drives the real router in-process against the in-memory store, mock
//! cache, mock mailer and a fixed Ed25519 key.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use c360_auth::{
    build_router,
    config::{
        AuthConfig, DatabaseConfig, Environment, RateLimitConfig, RedisConfig, RefreshRotation,
        SecurityConfig, SmtpConfig, TokenConfig,
    },
    services::{
        EmailKind, InMemoryStore, ManualClock, MockCache, MockEmailService, StaticKeySource,
    },
    AppState, Dependencies,
};
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TEST_KEY_SEED: [u8; 32] = [42u8; 32];

pub fn test_config(rotation: RefreshRotation) -> AuthConfig {
    AuthConfig {
        common: c360_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "c360-auth-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        public_base_url: "http://localhost:3000".to_string(),
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        tokens: TokenConfig {
            signing_key_path: "unused.pem".to_string(),
            refresh_rotation: rotation,
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            user: String::new(),
            password: SecretString::new(String::new()),
            from_email: "no-reply@c360.test".to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            password_reset_attempts: 100,
            password_reset_window_seconds: 60,
            trust_forwarded_for: false,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub email: Arc<MockEmailService>,
    pub clock: ManualClock,
}

/// A signed-in user as returned by register or login.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub tenant_id: String,
    pub role: String,
}

impl Session {
    pub fn from_body(body: &Value) -> Self {
        Self {
            access_token: body["access_token"].as_str().unwrap().to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap_or_default().to_string(),
            tenant_id: body["tenant_id"].as_str().unwrap().to_string(),
            role: body["role"].as_str().unwrap().to_string(),
        }
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(RefreshRotation::Reuse)
    }

    pub fn spawn_with(rotation: RefreshRotation) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let email = Arc::new(MockEmailService::new());
        let clock = ManualClock::default();

        let state = AppState::new(
            test_config(rotation),
            Dependencies {
                store: store.clone(),
                cache: Arc::new(MockCache::new()),
                email: email.clone(),
                key_source: Arc::new(StaticKeySource::new(SigningKey::from_bytes(
                    &TEST_KEY_SEED,
                ))),
                clock: Arc::new(clock.clone()),
                metrics: None,
            },
        );

        TestApp {
            router: build_router(state.clone()),
            state,
            store,
            email,
            clock,
        }
    }

    /// Sends one request and returns the status and the JSON body
    /// (`Value::Null` for an empty body).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, body) = self.request_raw(method, uri, token, body).await;
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, bytes.to_vec())
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.request(Method::GET, uri, token, None).await
    }

    pub async fn register(&self, email: &str, password: &str) -> Session {
        let (status, body) = self
            .post(
                "/v1/auth/register",
                None,
                serde_json::json!({ "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        Session::from_body(&body)
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/v1/auth/login",
            None,
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn user_id(&self, email: &str) -> uuid::Uuid {
        use c360_auth::services::AuthStore;
        self.store
            .find_user_by_email(email)
            .await
            .unwrap()
            .expect("user exists")
            .id
    }

    pub fn last_email_token(&self, to: &str, kind: EmailKind) -> String {
        self.email.last_token(to, kind).expect("email was sent")
    }
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
