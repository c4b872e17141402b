//! HTTP client for SoilDash devices.
//!
//! The client talks either straight to the device (`http://{address}/data`)
//! or to the CORS proxy (`{proxy_url}/data`). Every fetch is validated with
//! [`soildash_types::parse_payload`] and wrapped in [`with_retry`].
//!
//! # Example
//!
//! ```no_run
//! use soildash_core::client::{Endpoint, TelemetryClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = TelemetryClient::new(Endpoint::direct("192.168.4.1"))?;
//! let reading = client.fetch_telemetry(&CancellationToken::new()).await?;
//! println!("Temperature: {:.1}°C", reading.temperature_c);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use soildash_types::{TelemetryReading, parse_history, parse_payload};

use crate::error::{Error, Result};
use crate::retry::{RetryConfig, with_retry};
use crate::traits::TelemetrySource;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Where telemetry is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Straight to the device (only works without browser CORS restrictions).
    Direct {
        /// Host or `host:port` of the device.
        address: String,
    },
    /// Through the SoilDash proxy.
    Proxy {
        /// Base URL of the proxy, without trailing slash.
        base_url: String,
    },
}

impl Endpoint {
    /// Direct endpoint for a device address such as `192.168.4.1`.
    pub fn direct(address: impl Into<String>) -> Self {
        let address = address.into();
        let address = address
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        Endpoint::Direct { address }
    }

    /// Proxy endpoint for a base URL such as `http://localhost:3000`.
    pub fn proxy(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Endpoint::Proxy { base_url }
    }

    /// Whether requests go through the proxy.
    pub fn is_proxy(&self) -> bool {
        matches!(self, Endpoint::Proxy { .. })
    }

    /// Identifier of the device behind this endpoint.
    pub fn device_id(&self) -> &str {
        match self {
            Endpoint::Direct { address } => address,
            Endpoint::Proxy { base_url } => base_url,
        }
    }

    /// URL of the current-reading resource.
    pub fn data_url(&self) -> String {
        match self {
            Endpoint::Direct { address } => format!("http://{}/data", address),
            Endpoint::Proxy { base_url } => format!("{}/data", base_url),
        }
    }

    /// URL of the history resource. Only the proxy serves history.
    pub fn history_url(&self, range: HistoryRange) -> Option<String> {
        match self {
            Endpoint::Direct { .. } => None,
            Endpoint::Proxy { base_url } => {
                Some(format!("{}/history?range={}", base_url, range.token()))
            }
        }
    }

    /// URL used for connection probes.
    pub fn health_url(&self) -> String {
        match self {
            Endpoint::Direct { .. } => self.data_url(),
            Endpoint::Proxy { base_url } => format!("{}/health", base_url),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Endpoint::Direct { address } if address.is_empty() => {
                Err(Error::invalid_config("device address must not be empty"))
            }
            Endpoint::Proxy { base_url }
                if !base_url.starts_with("http://") && !base_url.starts_with("https://") =>
            {
                Err(Error::invalid_config(format!(
                    "proxy URL must start with http:// or https://, got: {}",
                    base_url
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct { address } => write!(f, "device {}", address),
            Endpoint::Proxy { base_url } => write!(f, "proxy {}", base_url),
        }
    }
}

/// Time window requested from `/history`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HistoryRange {
    /// Last hour.
    #[serde(rename = "now-1h")]
    LastHour,
    /// Last six hours.
    #[serde(rename = "now-6h")]
    Last6Hours,
    /// Last day.
    #[default]
    #[serde(rename = "now-24h")]
    Last24Hours,
    /// Last week.
    #[serde(rename = "now-7d")]
    Last7Days,
}

impl HistoryRange {
    /// Query token sent to the proxy.
    pub fn token(&self) -> &'static str {
        match self {
            HistoryRange::LastHour => "now-1h",
            HistoryRange::Last6Hours => "now-6h",
            HistoryRange::Last24Hours => "now-24h",
            HistoryRange::Last7Days => "now-7d",
        }
    }

    /// Length of the window.
    pub fn duration(&self) -> Duration {
        match self {
            HistoryRange::LastHour => Duration::from_secs(3600),
            HistoryRange::Last6Hours => Duration::from_secs(6 * 3600),
            HistoryRange::Last24Hours => Duration::from_secs(24 * 3600),
            HistoryRange::Last7Days => Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl FromStr for HistoryRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "now-1h" | "1h" => Ok(HistoryRange::LastHour),
            "now-6h" | "6h" => Ok(HistoryRange::Last6Hours),
            "now-24h" | "24h" => Ok(HistoryRange::Last24Hours),
            "now-7d" | "7d" => Ok(HistoryRange::Last7Days),
            other => Err(Error::invalid_config(format!(
                "unknown history range '{}', expected one of 1h, 6h, 24h, 7d",
                other
            ))),
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// HTTP client for a SoilDash device or proxy.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    client: Client,
    endpoint: Endpoint,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl TelemetryClient {
    /// Create a client with the default retry policy and a 5 s request timeout.
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        endpoint.validate()?;
        let client = Client::builder()
            .build()
            .map_err(|e| Error::invalid_config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Create a client with a custom reqwest Client.
    pub fn with_client(endpoint: Endpoint, client: Client) -> Result<Self> {
        endpoint.validate()?;
        Ok(Self {
            client,
            endpoint,
            retry: RetryConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the per-request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Fetch and validate the current reading, retrying transient failures.
    ///
    /// A payload without `ts` is stamped with the time it was received.
    pub async fn fetch_telemetry(&self, cancel: &CancellationToken) -> Result<TelemetryReading> {
        let url = self.endpoint.data_url();
        with_retry(&self.retry, "fetch_telemetry", cancel, || self.fetch_once(&url)).await
    }

    /// Fetch history from the proxy.
    ///
    /// Returns an empty list for direct endpoints, on non-2xx responses, on
    /// any error and on cancellation. Entries that fail validation are skipped.
    pub async fn fetch_history(
        &self,
        range: HistoryRange,
        cancel: &CancellationToken,
    ) -> Vec<TelemetryReading> {
        let Some(url) = self.endpoint.history_url(range) else {
            debug!("History is only available through the proxy");
            return Vec::new();
        };

        let request = async {
            let response = self.get(&url).await?;
            let value: serde_json::Value = response.json().await?;
            Ok::<_, Error>(parse_history(&value, OffsetDateTime::now_utc()))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Vec::new(),
            result = request => match result {
                Ok(history) => history,
                Err(e) => {
                    warn!("Failed to fetch history from {}: {}", url, e);
                    Vec::new()
                }
            },
        }
    }

    /// Send one request to the health endpoint and measure its latency.
    pub async fn probe(&self, cancel: &CancellationToken) -> Result<Duration> {
        let url = self.endpoint.health_url();
        let started = Instant::now();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.get(&url) => {
                result?;
                Ok(started.elapsed())
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<TelemetryReading> {
        let response = self.get(url).await?;
        let value: serde_json::Value = response.json().await.map_err(|e| {
            Error::Validation(soildash_types::ParseError::InvalidField {
                field: "body",
                reason: format!("is not valid JSON: {}", e),
            })
        })?;
        Ok(parse_payload(&value, OffsetDateTime::now_utc())?)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("GET {}", url), self.request_timeout)
                } else {
                    Error::network(url, e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string()
                });
            Err(Error::protocol(status.as_u16(), message))
        }
    }
}

#[async_trait]
impl TelemetrySource for TelemetryClient {
    fn device_id(&self) -> &str {
        self.endpoint.device_id()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<TelemetryReading> {
        self.fetch_telemetry(cancel).await
    }

    async fn fetch_history(
        &self,
        range: HistoryRange,
        cancel: &CancellationToken,
    ) -> Vec<TelemetryReading> {
        TelemetryClient::fetch_history(self, range, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_urls() {
        let endpoint = Endpoint::direct("192.168.4.1");
        assert_eq!(endpoint.data_url(), "http://192.168.4.1/data");
        assert_eq!(endpoint.health_url(), "http://192.168.4.1/data");
        assert_eq!(endpoint.history_url(HistoryRange::LastHour), None);
        assert!(!endpoint.is_proxy());
    }

    #[test]
    fn test_direct_strips_scheme() {
        let endpoint = Endpoint::direct("http://10.0.0.7/");
        assert_eq!(endpoint.data_url(), "http://10.0.0.7/data");
    }

    #[test]
    fn test_proxy_urls() {
        let endpoint = Endpoint::proxy("http://localhost:3000/");
        assert_eq!(endpoint.data_url(), "http://localhost:3000/data");
        assert_eq!(endpoint.health_url(), "http://localhost:3000/health");
        assert_eq!(
            endpoint.history_url(HistoryRange::Last7Days).as_deref(),
            Some("http://localhost:3000/history?range=now-7d")
        );
    }

    #[test]
    fn test_client_invalid_proxy_url() {
        let result = TelemetryClient::new(Endpoint::proxy("localhost:3000"));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_client_empty_address() {
        let result = TelemetryClient::new(Endpoint::direct(""));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_history_range_parse() {
        assert_eq!("1h".parse::<HistoryRange>().unwrap(), HistoryRange::LastHour);
        assert_eq!(
            "now-24h".parse::<HistoryRange>().unwrap(),
            HistoryRange::Last24Hours
        );
        assert!("2w".parse::<HistoryRange>().is_err());
        assert_eq!(HistoryRange::Last6Hours.to_string(), "now-6h");
    }

    #[tokio::test]
    async fn test_direct_history_is_empty() {
        let client = TelemetryClient::new(Endpoint::direct("192.168.4.1")).unwrap();
        let history = client
            .fetch_history(HistoryRange::LastHour, &CancellationToken::new())
            .await;
        assert!(history.is_empty());
    }
}
