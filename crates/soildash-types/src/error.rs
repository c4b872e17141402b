//! Error types for telemetry payload parsing in soildash-types.

use thiserror::Error;

/// Errors that can occur when validating a telemetry payload.
///
/// This error type is transport-agnostic and does not include HTTP
/// errors (those belong in soildash-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is not a JSON object.
    #[error("Invalid telemetry payload: expected a JSON object")]
    NotAnObject,

    /// A required field is absent.
    #[error("Invalid telemetry payload: missing field '{0}'")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an unusable value.
    #[error("Invalid telemetry payload: field '{field}' {reason}")]
    InvalidField {
        /// Wire name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The device status is not one of the known literals.
    #[error("Unknown device status: {0:?}")]
    UnknownStatus(String),
}

/// Result type alias using soildash-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
