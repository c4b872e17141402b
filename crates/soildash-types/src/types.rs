//! Core types for SoilDash telemetry.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// Device-reported safety status.
///
/// The device computes this on its own; the dashboard never derives it from
/// the metric values.
///
/// # Display vs Serialization
///
/// `Display` and serde both use the wire literals (`"SAFE"`, `"DANGER"`),
/// so the value round-trips through CSV and JSON unchanged.
///
/// ```
/// use soildash_types::DeviceStatus;
///
/// assert_eq!(DeviceStatus::Danger.to_string(), "DANGER");
/// assert_eq!("SAFE".parse::<DeviceStatus>(), Ok(DeviceStatus::Safe));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum DeviceStatus {
    /// All sensors within the device's own safe band.
    #[default]
    Safe,
    /// The device flagged a dangerous condition.
    Danger,
}

impl DeviceStatus {
    /// Wire literal for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Safe => "SAFE",
            DeviceStatus::Danger => "DANGER",
        }
    }

    /// Whether the device reported a dangerous condition.
    #[must_use]
    pub fn is_danger(&self) -> bool {
        matches!(self, DeviceStatus::Danger)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SAFE" => Ok(DeviceStatus::Safe),
            "DANGER" => Ok(DeviceStatus::Danger),
            other => Err(ParseError::UnknownStatus(other.to_string())),
        }
    }
}

/// A measured quantity carried by every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Metric {
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
    /// Volumetric soil moisture in percent.
    SoilMoisture,
}

impl Metric {
    /// All metrics in display order.
    pub const ALL: [Metric; 3] = [Metric::Temperature, Metric::Humidity, Metric::SoilMoisture];

    /// Field name used in the device's JSON payload.
    #[must_use]
    pub fn wire_name(&self) -> &'static str {
        match self {
            Metric::Temperature => "temp",
            Metric::Humidity => "hum",
            Metric::SoilMoisture => "soil",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
            Metric::SoilMoisture => "Soil moisture",
        }
    }

    /// Canonical unit suffix (temperature is always stored in Celsius).
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Humidity | Metric::SoilMoisture => "%",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One timestamped sensor sample.
///
/// Readings are immutable once created. Serialization uses the device's wire
/// names (`temp`, `hum`, `soil`, `status`, `ts`).
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetryReading {
    /// Temperature in degrees Celsius.
    #[cfg_attr(feature = "serde", serde(rename = "temp"))]
    pub temperature_c: f64,
    /// Relative humidity percentage (0-100).
    #[cfg_attr(feature = "serde", serde(rename = "hum"))]
    pub humidity_pct: f64,
    /// Soil moisture percentage (0-100).
    #[cfg_attr(feature = "serde", serde(rename = "soil"))]
    pub soil_moisture_pct: f64,
    /// Device status.
    pub status: DeviceStatus,
    /// When the reading was taken (or received, if the device sent no timestamp).
    #[cfg_attr(feature = "serde", serde(rename = "ts", with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl TelemetryReading {
    /// Create a new reading.
    #[must_use]
    pub fn new(
        temperature_c: f64,
        humidity_pct: f64,
        soil_moisture_pct: f64,
        status: DeviceStatus,
        timestamp: OffsetDateTime,
    ) -> Self {
        Self {
            temperature_c,
            humidity_pct,
            soil_moisture_pct,
            status,
            timestamp,
        }
    }

    /// Value of a single metric.
    ///
    /// ```
    /// use soildash_types::{DeviceStatus, Metric, TelemetryReading};
    /// use time::OffsetDateTime;
    ///
    /// let r = TelemetryReading::new(23.5, 65.2, 78.4, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH);
    /// assert_eq!(r.value(Metric::SoilMoisture), 78.4);
    /// ```
    #[must_use]
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Temperature => self.temperature_c,
            Metric::Humidity => self.humidity_pct,
            Metric::SoilMoisture => self.soil_moisture_pct,
        }
    }

    /// Return a copy with a different timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
