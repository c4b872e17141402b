//! Platform-agnostic types for SoilDash soil and climate sensors.
//!
//! This crate provides the shared data model used by the telemetry core,
//! the proxy and the command-line front-end.
//!
//! # Features
//!
//! - [`TelemetryReading`], [`DeviceStatus`] and [`Metric`]
//! - Validation of the device's JSON payload (`serde` feature)
//! - Error types for payload parsing
//!
//! # Example
//!
//! ```
//! use soildash_types::{parse_payload, DeviceStatus};
//! use time::OffsetDateTime;
//!
//! let payload = serde_json::json!({"temp": 23.5, "hum": 65.2, "soil": 78.4, "status": "SAFE"});
//! let reading = parse_payload(&payload, OffsetDateTime::now_utc()).unwrap();
//! assert_eq!(reading.status, DeviceStatus::Safe);
//! ```

pub mod error;
#[cfg(feature = "serde")]
pub mod payload;
pub mod types;

pub use error::{ParseError, ParseResult};
#[cfg(feature = "serde")]
pub use payload::{is_valid_telemetry, parse_history, parse_payload};
pub use types::{DeviceStatus, Metric, TelemetryReading};
