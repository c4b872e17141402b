//! HTTP endpoints of the proxy.
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `GET /health` | `{"status":"ok","device":"ip:port"}` |
//! | `GET /data` | Device `/data`, validated, with a `_proxy` envelope |
//! | `GET /history?range=` | Device `/history`, or `[]` if unavailable |
//! | `GET /subscribe` | 501, streaming is not offered |
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors (`{"error": "..."}`) via
//! [`AppError`]. A device that answers with a non-2xx status has that status
//! mirrored; an unreachable device yields 503 and a malformed payload 400.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, error, info};

use soildash_types::is_valid_telemetry;

use crate::state::ProxyState;

/// Range used when `/history` is called without one.
pub const DEFAULT_HISTORY_RANGE: &str = "now-24h";

/// Create the API router.
pub fn router() -> Router<Arc<ProxyState>> {
    Router::new()
        .route("/health", get(health))
        .route("/data", get(data))
        .route("/history", get(history))
        .route("/subscribe", get(subscribe))
        .fallback(not_found)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// `ip:port` of the relayed device.
    pub device: String,
}

async fn health(State(state): State<Arc<ProxyState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        device: state.config.device.address(),
    })
}

/// Metadata added to every relayed reading.
#[derive(Debug, Serialize)]
pub struct ProxyEnvelope {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Device IP the reading came from.
    pub from: String,
}

/// The proxy is stricter than the client: the device must send `ts`.
fn is_relayable(payload: &Value) -> bool {
    is_valid_telemetry(payload)
        && payload
            .get("ts")
            .and_then(Value::as_str)
            .is_some_and(|ts| !ts.is_empty())
}

async fn data(State(state): State<Arc<ProxyState>>) -> Result<Json<Value>, AppError> {
    let device = &state.config.device;
    let url = format!("{}/data", device.base_url());
    debug!("Fetching from device: {}", url);

    let response = state
        .client
        .get(&url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| {
            error!("Cannot reach device at {}: {}", url, e);
            AppError::Unavailable(format!("Cannot reach device: {}", e))
        })?;

    let status = response.status();
    if !status.is_success() {
        error!("Device returned {}", status.as_u16());
        return Err(AppError::Upstream(status.as_u16()));
    }

    let mut payload: Value = response.json().await.map_err(|e| {
        error!("Device sent a body that is not JSON: {}", e);
        AppError::BadRequest("Invalid data format from device".to_string())
    })?;

    if !is_relayable(&payload) {
        error!("Invalid data format from device");
        return Err(AppError::BadRequest(
            "Invalid data format from device".to_string(),
        ));
    }

    let envelope = ProxyEnvelope {
        timestamp: OffsetDateTime::now_utc(),
        from: device.ip.clone(),
    };
    if let Value::Object(map) = &mut payload {
        let envelope = serde_json::to_value(envelope)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        map.insert("_proxy".to_string(), envelope);
    }

    Ok(Json(payload))
}

/// Query parameters for `/history`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub range: Option<String>,
}

async fn history(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let range = query
        .range
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_HISTORY_RANGE.to_string());
    info!("History request: {}", range);

    let url = format!("{}/history", state.config.device.base_url());
    let result = state
        .client
        .get(&url)
        .query(&[("range", range.as_str())])
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => match response.json::<Value>().await {
            Ok(body) => return Json(body),
            Err(e) => debug!("Device history is not JSON: {}", e),
        },
        Ok(response) => debug!("Device has no history endpoint ({})", response.status()),
        Err(e) => debug!("Device does not support history: {}", e),
    }

    Json(Value::Array(Vec::new()))
}

async fn subscribe() -> AppError {
    AppError::NotImplemented("WebSocket not yet implemented".to_string())
}

async fn not_found() -> AppError {
    AppError::NotFound("Not found".to_string())
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    NotImplemented(String),
    /// The device answered with this non-2xx status.
    Upstream(u16),
    /// The device could not be reached.
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            AppError::Upstream(code) => (
                StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
                format!("Device returned {}", code),
            ),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use crate::config::Config;

    /// Serve a fake device and return its port.
    async fn fake_device(router: Router) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        port
    }

    fn state_for(port: u16) -> Arc<ProxyState> {
        let mut config = Config::default();
        config.device.ip = "127.0.0.1".to_string();
        config.device.port = port;
        ProxyState::new(config).unwrap()
    }

    /// A port nothing listens on.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn reading() -> Value {
        json!({"temp": 23.5, "hum": 65.2, "soil": 78.4, "status": "SAFE", "ts": "2025-01-01T00:00:00Z"})
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router().with_state(state_for(8080));
        let (status, json) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["device"], "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_data_relays_with_envelope() {
        let port = fake_device(Router::new().route("/data", get(|| async { Json(reading()) }))).await;
        let app = router().with_state(state_for(port));

        let (status, json) = get_json(app, "/data").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["temp"], 23.5);
        assert_eq!(json["status"], "SAFE");
        assert_eq!(json["_proxy"]["from"], "127.0.0.1");
        assert!(json["_proxy"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_data_rejects_invalid_payload() {
        let port = fake_device(Router::new().route(
            "/data",
            get(|| async { Json(json!({"temp": "hot", "hum": 1, "soil": 1, "status": "SAFE", "ts": "x"})) }),
        ))
        .await;
        let app = router().with_state(state_for(port));

        let (status, json) = get_json(app, "/data").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid data format from device");
    }

    #[tokio::test]
    async fn test_data_requires_timestamp() {
        let port = fake_device(Router::new().route(
            "/data",
            get(|| async { Json(json!({"temp": 20.0, "hum": 50.0, "soil": 40.0, "status": "SAFE"})) }),
        ))
        .await;
        let app = router().with_state(state_for(port));

        let (status, _) = get_json(app, "/data").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_data_mirrors_device_status() {
        let port = fake_device(Router::new().route(
            "/data",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "sensor fault") }),
        ))
        .await;
        let app = router().with_state(state_for(port));

        let (status, json) = get_json(app, "/data").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "Device returned 500");
    }

    #[tokio::test]
    async fn test_data_unreachable_device() {
        let app = router().with_state(state_for(closed_port().await));

        let (status, json) = get_json(app, "/data").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(json["error"].as_str().unwrap().starts_with("Cannot reach device"));
    }

    #[tokio::test]
    async fn test_history_relays_device_body() {
        let port = fake_device(Router::new().route(
            "/history",
            get(|Query(q): Query<HistoryQuery>| async move {
                Json(json!([{"range": q.range}]))
            }),
        ))
        .await;
        let app = router().with_state(state_for(port));

        let (status, json) = get_json(app, "/history?range=now-1h").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json[0]["range"], "now-1h");
    }

    #[tokio::test]
    async fn test_history_default_range() {
        let port = fake_device(Router::new().route(
            "/history",
            get(|Query(q): Query<HistoryQuery>| async move {
                Json(json!([{"range": q.range}]))
            }),
        ))
        .await;
        let app = router().with_state(state_for(port));

        let (_, json) = get_json(app, "/history").await;
        assert_eq!(json[0]["range"], DEFAULT_HISTORY_RANGE);
    }

    #[tokio::test]
    async fn test_history_falls_back_to_empty() {
        let port = fake_device(Router::new()).await;
        let app = router().with_state(state_for(port));
        let (status, json) = get_json(app, "/history?range=now-7d").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!([]));

        let app = router().with_state(state_for(closed_port().await));
        let (_, json) = get_json(app, "/history").await;
        assert_eq!(json, json!([]));
    }

    #[tokio::test]
    async fn test_subscribe_not_implemented() {
        let app = router().with_state(state_for(8080));
        let (status, json) = get_json(app, "/subscribe").await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = router().with_state(state_for(8080));
        let (status, json) = get_json(app, "/api/devices").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Not found");
    }

    #[test]
    fn test_relayable_payloads() {
        assert!(is_relayable(&reading()));
        assert!(!is_relayable(
            &json!({"temp": 1.0, "hum": 1.0, "soil": 1.0, "status": "SAFE", "ts": ""})
        ));
        assert!(!is_relayable(
            &json!({"temp": 1.0, "hum": 1.0, "soil": 1.0, "status": "OK", "ts": "x"})
        ));
    }
}
