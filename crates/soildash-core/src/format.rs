//! Display formatting for readings, times and sizes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

use soildash_types::Metric;

/// Temperature display unit. Readings are always stored in Celsius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// Unit suffix including the degree sign.
    pub fn suffix(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// Convert a Celsius value into this unit.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
        }
    }
}

impl fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        })
    }
}

impl FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(format!("unknown temperature unit '{}'", other)),
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Format a Celsius temperature in `unit` with one decimal.
///
/// ```
/// use soildash_core::format::{format_temp, TemperatureUnit};
///
/// assert_eq!(format_temp(23.5, TemperatureUnit::Fahrenheit), "74.3°F");
/// assert_eq!(format_temp(23.5, TemperatureUnit::Celsius), "23.5°C");
/// ```
pub fn format_temp(celsius: f64, unit: TemperatureUnit) -> String {
    format!("{:.1}{}", unit.from_celsius(celsius), unit.suffix())
}

pub fn format_humidity(value: f64) -> String {
    format!("{:.1}%", value)
}

pub fn format_soil(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format a metric value with its canonical unit (temperature in Celsius).
pub fn format_metric(metric: Metric, value: f64) -> String {
    match metric {
        Metric::Temperature => format_temp(value, TemperatureUnit::Celsius),
        Metric::Humidity => format_humidity(value),
        Metric::SoilMoisture => format_soil(value),
    }
}

/// Coarse age of `timestamp` relative to `now`.
///
/// Under a minute is "just now", then minutes, hours and days up to a week;
/// anything older is shown as a date.
pub fn format_relative_time(timestamp: OffsetDateTime, now: OffsetDateTime) -> String {
    let age = now - timestamp;
    if age < Duration::minutes(1) {
        "just now".to_string()
    } else if age < Duration::hours(1) {
        format!("{}m ago", age.whole_minutes())
    } else if age < Duration::days(1) {
        format!("{}h ago", age.whole_hours())
    } else if age < Duration::weeks(1) {
        format!("{}d ago", age.whole_days())
    } else {
        timestamp
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_else(|_| timestamp.date().to_string())
    }
}

/// Human-readable byte count using 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 3] = ["Bytes", "KB", "MB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    let text = format!("{:.2}", rounded);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_temperature_conversion() {
        assert_eq!(celsius_to_fahrenheit(0.0), 32.0);
        assert_eq!(celsius_to_fahrenheit(100.0), 212.0);
        assert!((fahrenheit_to_celsius(celsius_to_fahrenheit(23.5)) - 23.5).abs() < 1e-12);
    }

    #[test]
    fn test_format_values() {
        assert_eq!(format_temp(23.5, TemperatureUnit::Fahrenheit), "74.3°F");
        assert_eq!(format_temp(-4.04, TemperatureUnit::Celsius), "-4.0°C");
        assert_eq!(format_humidity(65.24), "65.2%");
        assert_eq!(format_soil(78.0), "78.0%");
        assert_eq!(format_metric(Metric::SoilMoisture, 12.0), "12.0%");
    }

    #[test]
    fn test_relative_time() {
        let now = datetime!(2024-06-15 12:00:00 UTC);
        assert_eq!(format_relative_time(now - Duration::seconds(30), now), "just now");
        assert_eq!(format_relative_time(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_relative_time(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_relative_time(now - Duration::days(2), now), "2d ago");
        assert_eq!(
            format_relative_time(datetime!(2024-05-01 08:00:00 UTC), now),
            "2024-05-01"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("F".parse::<TemperatureUnit>(), Ok(TemperatureUnit::Fahrenheit));
        assert_eq!("celsius".parse::<TemperatureUnit>(), Ok(TemperatureUnit::Celsius));
        assert!("kelvin".parse::<TemperatureUnit>().is_err());
    }
}
