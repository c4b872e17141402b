//! Security middleware for the proxy.
//!
//! This module provides middleware for:
//! - HTTP basic authentication
//! - Per-client rate limiting

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::state::ProxyState;

/// State for rate limiting.
#[derive(Debug, Default)]
pub struct RateLimitState {
    /// Request counts per client address.
    requests: RwLock<HashMap<IpAddr, RateLimitEntry>>,
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitState {
    /// Create a new rate limit state.
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    /// Count a request from `ip`.
    ///
    /// Returns the seconds until the window resets once the client is over
    /// `max_requests` for the current window.
    pub async fn check_rate_limit(
        &self,
        ip: IpAddr,
        max_requests: u32,
        window: Duration,
    ) -> Result<(), u64> {
        let now = Instant::now();

        let mut requests = self.requests.write().await;

        let entry = requests.entry(ip).or_insert_with(|| RateLimitEntry {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(entry.window_start) >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count > max_requests {
            let remaining = window
                .checked_sub(now.duration_since(entry.window_start))
                .unwrap_or_default();
            Err(remaining.as_secs_f64().ceil() as u64)
        } else {
            Ok(())
        }
    }

    /// Drop entries whose window expired long ago.
    pub async fn cleanup(&self, window: Duration) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;
        requests.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }

    /// Number of tracked clients.
    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.read().await.is_empty()
    }
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Basic realm=\"soildash\"")],
        Json(serde_json::json!({ "error": format!("Unauthorized: {}", reason) })),
    )
        .into_response()
}

/// Check an `Authorization` header value against the configured credentials.
///
/// Returns the reason for rejection on failure.
pub fn check_basic_auth(header: Option<&str>, config: &SecurityConfig) -> Result<(), &'static str> {
    let header = header.ok_or("missing auth")?;
    let (scheme, credentials) = header.split_once(' ').ok_or("invalid auth scheme")?;
    if scheme != "Basic" || credentials.is_empty() {
        return Err("invalid auth scheme");
    }

    let decoded = STANDARD
        .decode(credentials.trim())
        .map_err(|_| "invalid credentials")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "invalid credentials")?;
    let (user, password) = decoded.split_once(':').ok_or("invalid credentials")?;

    // Evaluate both comparisons so timing does not reveal which one failed.
    let user_ok = user.as_bytes().ct_eq(config.auth_user.as_bytes());
    let password_ok = password.as_bytes().ct_eq(config.auth_password.as_bytes());
    if bool::from(user_ok & password_ok) {
        Ok(())
    } else {
        Err("invalid credentials")
    }
}

/// Basic authentication middleware.
///
/// Returns 401 Unauthorized with a JSON error when auth is enabled and the
/// credentials are missing or wrong.
pub async fn basic_auth(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    let security = &state.config.security;
    if !security.auth_enabled {
        return next.run(request).await;
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match check_basic_auth(header, security) {
        Ok(()) => next.run(request).await,
        Err(reason) => {
            warn!("Authentication failed for {}: {}", request.uri().path(), reason);
            unauthorized(reason)
        }
    }
}

/// Address of the connected client, or `0.0.0.0` when the server was not
/// started with connect info.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware.
///
/// Limits requests per client address within a time window.
/// Returns 429 Too Many Requests if the limit is exceeded.
pub async fn rate_limit(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    let security = &state.config.security;
    let ip = client_ip(&request);

    match state
        .rate_limits
        .check_rate_limit(ip, security.rate_limit_max, security.rate_limit_window())
        .await
    {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!("Rate limit exceeded for {} on {}", ip, request.uri().path());
            (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("Retry-After", retry_after.to_string()),
                    ("X-RateLimit-Limit", security.rate_limit_max.to_string()),
                    ("X-RateLimit-Remaining", "0".to_string()),
                ],
                Json(serde_json::json!({ "error": "Too many requests" })),
            )
                .into_response()
        }
    }
}

/// Log each request with its client address.
pub async fn log_request(request: Request, next: Next) -> Response {
    info!(
        "{} {} from {}",
        request.method(),
        request.uri().path(),
        client_ip(&request)
    );
    next.run(request).await
}
