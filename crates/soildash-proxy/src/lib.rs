//! CORS relay between the SoilDash dashboard and a soil sensor.
//!
//! Browsers cannot read the sensor's `/data` directly because the device
//! sends no CORS headers. This proxy fetches from the device, validates the
//! payload and answers with CORS headers for local origins.
//!
//! # Endpoints
//!
//! - `GET /health` - Proxy health and the relayed device address
//! - `GET /data` - Current reading with a `_proxy` envelope
//! - `GET /history?range=now-24h` - Device history, or `[]`
//! - `GET /subscribe` - Reserved for streaming (501)
//!
//! # Configuration
//!
//! The proxy reads `~/.config/soildash/proxy.toml`, then environment
//! variables, then command-line flags:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 3000
//!
//! [device]
//! ip = "192.168.4.1"
//! port = 80
//!
//! [security]
//! auth_enabled = false
//! auth_user = "admin"
//! auth_password = "password"
//! rate_limit_window_ms = 60000
//! rate_limit_max = 100
//! ```

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod middleware;
pub mod state;

pub use api::AppError;
pub use config::{Config, ConfigError, DeviceConfig, SecurityConfig, ServerConfig};
pub use state::ProxyState;

/// Whether a browser origin may read proxy responses.
///
/// Only local dashboards are allowed.
pub fn is_allowed_origin(origin: &HeaderValue) -> bool {
    origin
        .to_str()
        .is_ok_and(|o| o.contains("localhost") || o.contains("127.0.0.1"))
}

/// CORS policy: local origins, credentials allowed.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| is_allowed_origin(origin)))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// The complete application: routes, auth, rate limiting, logging and CORS.
///
/// Auth runs before rate limiting, so rejected credentials do not count
/// against the client's budget. CORS is outermost so preflight requests are
/// answered without credentials.
pub fn app(state: Arc<ProxyState>) -> Router {
    api::router()
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::basic_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn state(configure: impl FnOnce(&mut Config)) -> Arc<ProxyState> {
        let mut config = Config::default();
        configure(&mut config);
        ProxyState::new(config).unwrap()
    }

    fn health_request() -> Request<Body> {
        Request::builder().uri("/health").body(Body::empty()).unwrap()
    }

    #[test]
    fn test_allowed_origins() {
        assert!(is_allowed_origin(&HeaderValue::from_static("http://localhost:5173")));
        assert!(is_allowed_origin(&HeaderValue::from_static("http://127.0.0.1:3000")));
        assert!(!is_allowed_origin(&HeaderValue::from_static("https://example.com")));
    }

    #[tokio::test]
    async fn test_cors_headers_for_local_origin() {
        let app = app(state(|_| {}));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:5173")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
            "true"
        );
    }

    #[tokio::test]
    async fn test_no_cors_headers_for_foreign_origin() {
        let app = app(state(|_| {}));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "https://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(
            !response
                .headers()
                .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        );
    }

    #[tokio::test]
    async fn test_auth_required_when_enabled() {
        let state = state(|c| c.security.auth_enabled = true);

        let response = app(Arc::clone(&state))
            .oneshot(health_request())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let credentials = STANDARD.encode("admin:password");
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::AUTHORIZATION, format!("Basic {}", credentials))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_also_guards_unknown_routes() {
        let state = state(|c| c.security.auth_enabled = true);
        let response = app(state)
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let state = state(|c| c.security.rate_limit_max = 2);
        let client: SocketAddr = "10.0.0.9:50000".parse().unwrap();
        let other: SocketAddr = "10.0.0.10:50000".parse().unwrap();

        let request_from = |addr: SocketAddr| {
            let mut request = health_request();
            request.extensions_mut().insert(ConnectInfo(addr));
            request
        };

        for _ in 0..2 {
            let response = app(Arc::clone(&state))
                .oneshot(request_from(client))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app(Arc::clone(&state))
            .oneshot(request_from(client))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));

        let response = app(state).oneshot(request_from(other)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
