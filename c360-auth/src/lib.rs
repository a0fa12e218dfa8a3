pub mod authz;
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use c360_core::axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use c360_core::middleware::{
    metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    request_id_middleware, security_headers_middleware, REQUEST_ID_HEADER,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AuthConfig;
use crate::services::{
    AuthService, AuthStore, Clock, CompanyService, EmailProvider, KeySource, KeyValueCache,
    TokenService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn AuthStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub tokens: Arc<TokenService>,
    pub auth_service: AuthService,
    pub company_service: CompanyService,
    pub metrics: Option<PrometheusHandle>,
    pub login_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
    pub magic_link_rate_limiter: IpRateLimiter,
}

/// Infrastructure the service is wired from.
pub struct Dependencies {
    pub store: Arc<dyn AuthStore>,
    pub cache: Arc<dyn KeyValueCache>,
    pub email: Arc<dyn EmailProvider>,
    pub key_source: Arc<dyn KeySource>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AuthConfig, deps: Dependencies) -> Self {
        let tokens = Arc::new(TokenService::new(
            deps.key_source,
            deps.store.clone(),
            deps.clock.clone(),
            config.tokens.refresh_rotation,
        ));

        let auth_service = AuthService::new(
            deps.store.clone(),
            tokens.clone(),
            deps.cache.clone(),
            deps.email,
            config.public_base_url.clone(),
            config.is_dev(),
        );
        let company_service = CompanyService::new(deps.store.clone(), deps.clock);

        let limits = &config.rate_limit;
        let login_rate_limiter = create_ip_rate_limiter(
            limits.login_attempts,
            limits.login_window_seconds,
            limits.trust_forwarded_for,
        );
        let password_reset_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
            limits.trust_forwarded_for,
        );
        let magic_link_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
            limits.trust_forwarded_for,
        );

        Self {
            config,
            store: deps.store,
            cache: deps.cache,
            tokens,
            auth_service,
            company_service,
            metrics: deps.metrics,
            login_rate_limiter,
            password_reset_rate_limiter,
            magic_link_rate_limiter,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

pub fn build_router(state: AppState) -> Router {
    // Credential endpoints share the login limiter
    let login_routes = Router::new()
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/register", post(handlers::auth::register))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let reset_request_route = Router::new()
        .route(
            "/v1/auth/password-reset/request",
            post(handlers::auth::request_password_reset),
        )
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let magic_link_route = Router::new()
        .route("/v1/auth/magic-link", post(handlers::auth::request_magic_link))
        .layer(from_fn_with_state(
            state.magic_link_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/v1/auth/logout-all", post(handlers::auth::logout_all))
        .route(
            "/v1/users/me",
            get(handlers::users::get_me).patch(handlers::users::update_me),
        )
        .route(
            "/v1/users/me/password",
            post(handlers::users::change_password),
        )
        .route(
            "/v1/companies/:company_id/members",
            get(handlers::companies::list_members).post(handlers::companies::add_member),
        )
        .route(
            "/v1/companies/:company_id/members/:user_id",
            patch(handlers::companies::update_member).delete(handlers::companies::remove_member),
        )
        .route(
            "/v1/companies/:company_id/audit",
            get(handlers::companies::audit_log),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route(
            "/v1/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .route(
            "/v1/auth/magic-link/verify",
            get(handlers::auth::verify_magic_link),
        )
        .merge(login_routes)
        .merge(reset_request_route)
        .merge(magic_link_route)
        .merge(protected_routes)
        .with_state(state.clone())
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri().path(),
                user_id = tracing::field::Empty,
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins))
}

/// Service health check. Answers 503 when the store or the cache is down.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = match state.store.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            "down"
        }
    };
    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Cache health check failed");
            "down"
        }
    };

    let healthy = store == "up" && cache == "up";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": state.config.environment.as_str(),
            "checks": {
                "store": store,
                "cache": cache
            }
        })),
    )
}

