//! Validation of the device's JSON payload.
//!
//! The device (and the proxy relaying it) answers `GET /data` with:
//!
//! ```json
//! {"temp": 23.5, "hum": 65.2, "soil": 78.4, "status": "SAFE", "ts": "2025-01-01T00:00:00Z"}
//! ```
//!
//! `temp`, `hum` and `soil` must be JSON numbers and `status` must be one of
//! the two literals. Ranges are not enforced here. `ts` is optional; a
//! missing, empty or unparseable timestamp is replaced by the caller's
//! `received_at`. Unknown fields (such as the proxy's `_proxy` envelope) are
//! ignored.

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{ParseError, ParseResult};
use crate::types::{DeviceStatus, Metric, TelemetryReading};

/// Parse and validate a single telemetry payload.
///
/// # Errors
///
/// Returns a [`ParseError`] when the payload is not an object, a numeric
/// field is missing or not a number, or the status is unknown.
pub fn parse_payload(value: &Value, received_at: OffsetDateTime) -> ParseResult<TelemetryReading> {
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    let number = |metric: Metric| -> ParseResult<f64> {
        let field = metric.wire_name();
        match obj.get(field) {
            None | Some(Value::Null) => Err(ParseError::MissingField(field)),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ParseError::InvalidField {
                field,
                reason: "is not representable as f64".to_string(),
            }),
            Some(other) => Err(ParseError::InvalidField {
                field,
                reason: format!("must be a number, got {}", json_type(other)),
            }),
        }
    };

    let temperature_c = number(Metric::Temperature)?;
    let humidity_pct = number(Metric::Humidity)?;
    let soil_moisture_pct = number(Metric::SoilMoisture)?;

    let status = match obj.get("status") {
        None | Some(Value::Null) => return Err(ParseError::MissingField("status")),
        Some(Value::String(s)) => s.parse::<DeviceStatus>()?,
        Some(other) => {
            return Err(ParseError::InvalidField {
                field: "status",
                reason: format!("must be a string, got {}", json_type(other)),
            });
        }
    };

    let timestamp = obj
        .get("ts")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .unwrap_or(received_at);

    Ok(TelemetryReading {
        temperature_c,
        humidity_pct,
        soil_moisture_pct,
        status,
        timestamp,
    })
}

/// Check whether a JSON value has the shape of a telemetry payload.
///
/// ```
/// use soildash_types::is_valid_telemetry;
///
/// let ok = serde_json::json!({"temp": 21.0, "hum": 50, "soil": 40, "status": "SAFE"});
/// let bad = serde_json::json!({"temp": "21", "hum": 50, "soil": 40, "status": "SAFE"});
/// assert!(is_valid_telemetry(&ok));
/// assert!(!is_valid_telemetry(&bad));
/// ```
#[must_use]
pub fn is_valid_telemetry(value: &Value) -> bool {
    parse_payload(value, OffsetDateTime::UNIX_EPOCH).is_ok()
}

/// Parse a history array, skipping entries that fail validation.
///
/// Anything that is not an array yields an empty list.
#[must_use]
pub fn parse_history(value: &Value, received_at: OffsetDateTime) -> Vec<TelemetryReading> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| parse_payload(entry, received_at).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
