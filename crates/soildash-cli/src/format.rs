//! Output formatting utilities for text, JSON, and CSV output.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use soildash_core::alerts::{Alert, AlertSeverity};
use soildash_core::export::{CsvOptions, generate_csv};
use soildash_core::format::{TemperatureUnit, format_humidity, format_relative_time, format_soil, format_temp};
use soildash_core::stats::{MetricStats, TelemetryStats, trend_indicator};
use soildash_core::{DeviceStatus, Metric, TelemetryReading};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Display unit for temperatures.
    pub unit: TemperatureUnit,
    /// Omit header row in CSV output.
    pub no_header: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, unit: TemperatureUnit) -> Self {
        Self {
            no_color,
            unit,
            no_header: false,
        }
    }

    #[must_use]
    pub fn with_no_header(mut self, no_header: bool) -> Self {
        self.no_header = no_header;
        self
    }

    fn csv(&self) -> CsvOptions {
        CsvOptions {
            use_fahrenheit: self.unit == TemperatureUnit::Fahrenheit,
            include_headers: !self.no_header,
            ..CsvOptions::default()
        }
    }
}

/// Format device status with color
#[must_use]
pub fn format_status(status: DeviceStatus, no_color: bool) -> String {
    let label = status.as_str();
    if no_color {
        format!("[{}]", label)
    } else {
        match status {
            DeviceStatus::Safe => format!("[{}]", label.green()),
            DeviceStatus::Danger => format!("[{}]", label.red().bold()),
        }
    }
}

fn timestamp(reading: &TelemetryReading) -> String {
    reading
        .timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| reading.timestamp.to_string())
}

/// Multi-line view of one reading.
#[must_use]
pub fn format_reading_text(reading: &TelemetryReading, opts: &FormatOptions) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Status:         {}\n",
        format_status(reading.status, opts.no_color)
    ));
    out.push_str(&format!(
        "Temperature:    {}\n",
        format_temp(reading.temperature_c, opts.unit)
    ));
    out.push_str(&format!(
        "Humidity:       {}\n",
        format_humidity(reading.humidity_pct)
    ));
    out.push_str(&format!(
        "Soil moisture:  {}\n",
        format_soil(reading.soil_moisture_pct)
    ));
    out.push_str(&format!(
        "Measured:       {} ({})\n",
        timestamp(reading),
        format_relative_time(reading.timestamp, OffsetDateTime::now_utc())
    ));
    out
}

/// One line per reading for `watch`, with arrows against the previous one.
#[must_use]
pub fn format_watch_line(
    reading: &TelemetryReading,
    previous: Option<&TelemetryReading>,
    opts: &FormatOptions,
) -> String {
    let arrow = |metric: Metric| trend_indicator(reading.value(metric), previous.map(|p| p.value(metric)));
    format!(
        "{}  {} {}  {} {}  {} {}  {}\n",
        timestamp(reading),
        format_temp(reading.temperature_c, opts.unit),
        arrow(Metric::Temperature),
        format_humidity(reading.humidity_pct),
        arrow(Metric::Humidity),
        format_soil(reading.soil_moisture_pct),
        arrow(Metric::SoilMoisture),
        format_status(reading.status, opts.no_color),
    )
}

/// Readings as CSV, using the export layout.
pub fn format_readings_csv(readings: &[TelemetryReading], opts: &FormatOptions) -> Result<String> {
    let mut csv = generate_csv(readings, opts.csv())?;
    if !csv.is_empty() {
        csv.push('\n');
    }
    Ok(csv)
}

/// Any serializable value as pretty JSON with a trailing newline.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(value)?))
}

/// Table of readings, newest first.
#[must_use]
pub fn format_history_text(readings: &[TelemetryReading], opts: &FormatOptions) -> String {
    if readings.is_empty() {
        return "No readings available.\n".to_string();
    }

    let mut out = format!(
        "{:<26} {:>9} {:>9} {:>9}  {}\n",
        "Timestamp", "Temp", "Humidity", "Soil", "Status"
    );
    out.push_str(&format!("{}\n", "-".repeat(66)));
    for reading in readings {
        out.push_str(&format!(
            "{:<26} {:>9} {:>9} {:>9}  {}\n",
            timestamp(reading),
            format_temp(reading.temperature_c, opts.unit),
            format_humidity(reading.humidity_pct),
            format_soil(reading.soil_moisture_pct),
            format_status(reading.status, opts.no_color),
        ));
    }
    out
}

fn format_metric_row(label: &str, stats: Option<&MetricStats>, fmt: impl Fn(f64) -> String) -> String {
    match stats {
        Some(s) => {
            let spread = s.std_dev.map(|d| format!("±{:.2}", d)).unwrap_or_default();
            let trend = s.trend.map(|t| t.arrow()).unwrap_or("");
            format!(
                "{:<14} {:>9} {:>9} {:>9} {:>8} {}\n",
                label,
                fmt(s.min),
                fmt(s.max),
                fmt(s.avg),
                spread,
                trend
            )
        }
        None => format!("{:<14} {:>9}\n", label, "—"),
    }
}

/// Min/max/avg table.
#[must_use]
pub fn format_stats_text(stats: &TelemetryStats, opts: &FormatOptions) -> String {
    if stats.is_empty() {
        return "No readings available.\n".to_string();
    }

    let unit = opts.unit;
    let mut out = format!("Statistics over {} readings\n", stats.count);
    out.push_str(&format!(
        "{:<14} {:>9} {:>9} {:>9} {:>8} {}\n",
        "", "Min", "Max", "Avg", "StdDev", "Trend"
    ));
    out.push_str(&format_metric_row("Temperature", stats.temperature.as_ref(), |v| {
        format_temp(v, unit)
    }));
    out.push_str(&format_metric_row("Humidity", stats.humidity.as_ref(), format_humidity));
    out.push_str(&format_metric_row("Soil moisture", stats.soil_moisture.as_ref(), format_soil));
    out
}

/// One line for a raised alert.
#[must_use]
pub fn format_alert_line(alert: &Alert, no_color: bool) -> String {
    let label = format!("{} {}", alert.severity.icon(), alert.title);
    let label = if no_color {
        label
    } else {
        match alert.severity {
            AlertSeverity::Critical => label.red().bold().to_string(),
            AlertSeverity::Warning => label.yellow().to_string(),
            AlertSeverity::Info => label.dimmed().to_string(),
        }
    };
    format!("{}: {}\n", label, alert.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_core::stats::{StatsOptions, calculate_stats};
    use time::macros::datetime;

    fn reading(temp: f64, status: DeviceStatus) -> TelemetryReading {
        TelemetryReading::new(temp, 65.2, 78.4, status, datetime!(2025-01-01 00:00:00 UTC))
    }

    fn plain() -> FormatOptions {
        FormatOptions::new(true, TemperatureUnit::Celsius)
    }

    #[test]
    fn test_format_status_plain() {
        assert_eq!(format_status(DeviceStatus::Safe, true), "[SAFE]");
        assert_eq!(format_status(DeviceStatus::Danger, true), "[DANGER]");
    }

    #[test]
    fn test_reading_text() {
        let text = format_reading_text(&reading(23.5, DeviceStatus::Safe), &plain());
        assert!(text.contains("23.5°C"));
        assert!(text.contains("65.2%"));
        assert!(text.contains("78.4%"));
        assert!(text.contains("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_reading_text_fahrenheit() {
        let opts = FormatOptions::new(true, TemperatureUnit::Fahrenheit);
        let text = format_reading_text(&reading(23.5, DeviceStatus::Safe), &opts);
        assert!(text.contains("74.3°F"));
    }

    #[test]
    fn test_watch_line_arrows() {
        let previous = reading(20.0, DeviceStatus::Safe);
        let current = reading(21.0, DeviceStatus::Safe);
        let line = format_watch_line(&current, Some(&previous), &plain());
        assert!(line.contains("21.0°C ↑"));
        assert!(line.contains("65.2% →"));

        let first = format_watch_line(&current, None, &plain());
        assert!(first.contains("21.0°C —"));
    }

    #[test]
    fn test_readings_csv_has_header() {
        let csv = format_readings_csv(&[reading(23.5, DeviceStatus::Safe)], &plain()).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("Timestamp,Temperature (°C)"));
        assert!(lines.next().unwrap().contains("\"23.50\""));
        assert!(csv.ends_with('\n'));

        let no_header = plain().with_no_header(true);
        let csv = format_readings_csv(&[reading(23.5, DeviceStatus::Safe)], &no_header).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_history_text() {
        assert_eq!(format_history_text(&[], &plain()), "No readings available.\n");
        let text = format_history_text(&[reading(23.5, DeviceStatus::Danger)], &plain());
        assert!(text.contains("[DANGER]"));
    }

    #[test]
    fn test_stats_text() {
        let readings = [reading(20.0, DeviceStatus::Safe), reading(22.0, DeviceStatus::Safe)];
        let stats = calculate_stats(readings.iter(), StatsOptions::advanced());
        let text = format_stats_text(&stats, &plain());
        assert!(text.contains("Statistics over 2 readings"));
        assert!(text.contains("21.0°C"));
        assert_eq!(
            format_stats_text(&TelemetryStats::default(), &plain()),
            "No readings available.\n"
        );
    }
}
