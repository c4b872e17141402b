//! Error types for soildash-core.
//!
//! This module defines the errors that can occur while acquiring telemetry
//! from a SoilDash device, either directly or through the CORS proxy.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Network`] | Retry with backoff | Device may be rebooting or Wi-Fi congested |
//! | [`Error::Timeout`] | Retry with backoff | The ESP32 stalls under load |
//! | [`Error::Protocol`] | Retry with backoff | Proxy relays transient device failures |
//! | [`Error::Validation`] | Retry with backoff | Truncated bodies are assumed transient |
//! | [`Error::Cancelled`] | Never surfaced | Polling was disabled or reconfigured |
//! | [`Error::InvalidConfig`] | Do not retry | Fix configuration and restart |
//!
//! The fetch path in [`crate::client`] wraps every request in
//! [`crate::retry::with_retry`] using [`crate::RetryConfig::default`]
//! (3 retries, 500 ms, x1.5, capped at 5 s).
//!
//! The poller never stops on an error: it keeps the last good reading, records
//! the error (see [`Error::guidance`] for the text shown to the user) and tries
//! again on the next tick.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to a SoilDash device.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The device or proxy could not be reached.
    #[error("Network error contacting {url}: {message}")]
    Network {
        /// The URL that was requested.
        url: String,
        /// Transport-level description.
        message: String,
    },

    /// A request did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The device or proxy answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Protocol {
        /// HTTP status code.
        status: u16,
        /// Status text or error body.
        message: String,
    },

    /// The payload did not have the expected shape.
    #[error(transparent)]
    Validation(#[from] soildash_types::ParseError),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Create a network error for a URL.
    pub fn network(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a protocol error from an HTTP status.
    pub fn protocol(status: u16, message: impl Into<String>) -> Self {
        Self::Protocol {
            status,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error represents a cancelled operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Actionable advice to show next to the error.
    pub fn guidance(&self) -> &'static str {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => {
                "Check that the device is powered on, that the configured address is correct, \
                 or enable demo mode."
            }
            Error::Protocol { status, .. } if *status == 429 => {
                "The proxy is rate limiting requests. Increase the polling interval."
            }
            Error::Protocol { status, .. } if *status == 401 => {
                "The proxy requires authentication. Check the proxy credentials."
            }
            Error::Protocol { .. } => {
                "The device or proxy returned an error. Check the proxy is running and can reach \
                 the device, or enable demo mode."
            }
            Error::Validation(_) => {
                "The device sent an unexpected payload. Check the device firmware version."
            }
            Error::InvalidConfig(_) => "Fix the configuration and try again.",
            Error::Cancelled => "",
            Error::Io(_) | Error::Serialization(_) | Error::Csv(_) => {
                "Check file permissions and available disk space."
            }
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unknown>".to_string());

        if let Some(status) = err.status() {
            Error::protocol(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            Error::Validation(soildash_types::ParseError::InvalidField {
                field: "body",
                reason: err.to_string(),
            })
        } else {
            Error::network(url, err.to_string())
        }
    }
}

/// Result type alias using soildash-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
