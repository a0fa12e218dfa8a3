use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use crate::error::AppError;

type KeyedLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

/// Rate limiter keyed by client IP address. Clones share one budget.
///
/// `X-Forwarded-For` is only read when `trust_forwarded_for` is set, which
/// must mean a proxy in front overwrites the header. Otherwise the peer
/// address of the connection is the key.
#[derive(Clone)]
pub struct IpRateLimiter {
    limiter: Arc<KeyedLimiter>,
    trust_forwarded_for: bool,
}

/// Allows `attempts` requests per `window_seconds` per IP, replenished evenly.
pub fn create_ip_rate_limiter(
    attempts: u32,
    window_seconds: u64,
    trust_forwarded_for: bool,
) -> IpRateLimiter {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.max(1) * 1000) / u64::from(burst.get());
    let quota = Quota::with_period(Duration::from_millis(period_ms.max(1)))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst);

    IpRateLimiter {
        limiter: Arc::new(RateLimiter::dashmap(quota)),
        trust_forwarded_for,
    }
}

impl IpRateLimiter {
    /// Spends one request for `ip`. On rejection, returns how long to wait.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        self.limiter
            .check_key(&ip)
            .map_err(|negative| negative.wait_time_from(DefaultClock::default().now()))
    }

    fn client_ip(&self, request: &Request) -> Option<IpAddr> {
        let forwarded = self
            .trust_forwarded_for
            .then(|| {
                request
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.split(',').next())
                    .and_then(|s| s.trim().parse::<IpAddr>().ok())
            })
            .flatten();

        forwarded.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
    }
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = limiter.client_ip(&request) else {
        tracing::warn!(path = %request.uri().path(), "Could not determine IP for rate limiting");
        return Ok(next.run(request).await);
    };

    match limiter.check(ip) {
        Ok(()) => Ok(next.run(request).await),
        Err(wait_time) => {
            tracing::warn!(%ip, path = %request.uri().path(), "Rate limit exceeded");
            Err(AppError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
                Some(wait_time.as_secs().max(1)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn request_from(peer: &str, forwarded_for: Option<&str>) -> Request {
        let mut builder = HttpRequest::builder().uri("/login");
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(peer.parse().unwrap(), 40000)));
        request
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = create_ip_rate_limiter(2, 60, false);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_ok());
        assert!(limiter.check(ip).is_err());

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(other).is_ok());
    }

    #[test]
    fn test_zero_attempts_still_allows_one() {
        let limiter = create_ip_rate_limiter(0, 0, false);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        assert!(limiter.check(ip).is_ok());
    }

    #[test]
    fn test_forwarded_for_only_read_behind_proxy() {
        let request = request_from("10.0.0.9", Some("203.0.113.7, 10.0.0.9"));

        let direct = create_ip_rate_limiter(5, 60, false);
        assert_eq!(direct.client_ip(&request), Some("10.0.0.9".parse().unwrap()));

        let proxied = create_ip_rate_limiter(5, 60, true);
        assert_eq!(proxied.client_ip(&request), Some("203.0.113.7".parse().unwrap()));

        // A garbled header falls back to the peer address.
        let garbled = request_from("10.0.0.9", Some("unknown"));
        assert_eq!(proxied.client_ip(&garbled), Some("10.0.0.9".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_shares_peer_budget() {
        let limiter = create_ip_rate_limiter(2, 60, false);
        let app = Router::new()
            .route("/login", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                limiter,
                ip_rate_limit_middleware,
            ));

        let mut statuses = Vec::new();
        for spoofed in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.4", Some(spoofed)))
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert_eq!(
            statuses,
            [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
    }
}
