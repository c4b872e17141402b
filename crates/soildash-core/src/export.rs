//! CSV and JSON export of readings.
//!
//! CSV rows carry an ISO 8601 UTC timestamp, numbers with two decimals and
//! the device status; every data cell is quoted. JSON exports wrap the
//! readings (in their wire format) with a metadata block.

use std::fmt;
use std::str::FromStr;

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use soildash_types::{DeviceStatus, ParseError, TelemetryReading};

use crate::error::{Error, Result};
use crate::format::{celsius_to_fahrenheit, fahrenheit_to_celsius};

/// Version stamped into JSON exports when none is given.
pub const EXPORT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Device name used in JSON exports when none is given.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Output format for exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// CSV layout options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    /// Write (or expect) temperatures in Fahrenheit.
    pub use_fahrenheit: bool,
    /// Write (or expect) a header row.
    pub include_headers: bool,
    /// Field delimiter; must be ASCII.
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            use_fahrenheit: false,
            include_headers: true,
            delimiter: b',',
        }
    }
}

fn headers(use_fahrenheit: bool) -> [&'static str; 5] {
    [
        "Timestamp",
        if use_fahrenheit {
            "Temperature (°F)"
        } else {
            "Temperature (°C)"
        },
        "Humidity (%)",
        "Soil Moisture (%)",
        "Status",
    ]
}

fn iso_timestamp(ts: OffsetDateTime) -> Result<String> {
    ts.to_offset(time::UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|e| Error::invalid_config(format!("unformattable timestamp: {}", e)))
}

/// Render readings as CSV, in the order given.
///
/// The header row is unquoted; data cells are always quoted. Lines are
/// separated by `\n` with no trailing newline.
pub fn generate_csv(readings: &[TelemetryReading], options: CsvOptions) -> Result<String> {
    let mut out = String::new();
    if options.include_headers {
        let delimiter = char::from(options.delimiter).to_string();
        out.push_str(&headers(options.use_fahrenheit).join(&delimiter));
    }

    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .has_headers(false)
        .from_writer(Vec::new());

    for reading in readings {
        let temperature = if options.use_fahrenheit {
            celsius_to_fahrenheit(reading.temperature_c)
        } else {
            reading.temperature_c
        };
        writer.write_record([
            iso_timestamp(reading.timestamp)?,
            format!("{:.2}", temperature),
            format!("{:.2}", reading.humidity_pct),
            format!("{:.2}", reading.soil_moisture_pct),
            reading.status.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    let body = String::from_utf8_lossy(&bytes);
    let body = body.trim_end_matches('\n');

    if !body.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(body);
    }
    Ok(out)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
    Error::Validation(ParseError::InvalidField {
        field,
        reason: reason.into(),
    })
}

fn number(record: &csv::StringRecord, index: usize, field: &'static str) -> Result<f64> {
    let raw = record
        .get(index)
        .ok_or(Error::Validation(ParseError::MissingField(field)))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| invalid(field, format!("'{}' is not a number: {}", raw, e)))
}

/// Parse CSV produced by [`generate_csv`] back into readings.
///
/// With headers, the temperature unit is taken from the header; otherwise
/// `options.use_fahrenheit` decides.
pub fn parse_csv(input: &str, options: CsvOptions) -> Result<Vec<TelemetryReading>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.include_headers)
        .from_reader(input.as_bytes());

    let fahrenheit = if options.include_headers {
        reader
            .headers()?
            .get(1)
            .map(|h| h.contains("°F"))
            .unwrap_or(options.use_fahrenheit)
    } else {
        options.use_fahrenheit
    };

    let mut readings = Vec::new();
    for record in reader.records() {
        let record = record?;
        let ts_raw = record
            .get(0)
            .ok_or(Error::Validation(ParseError::MissingField("ts")))?;
        let timestamp = OffsetDateTime::parse(ts_raw.trim(), &Rfc3339)
            .map_err(|e| invalid("ts", format!("'{}' is not RFC 3339: {}", ts_raw, e)))?;

        let temperature = number(&record, 1, "temp")?;
        let temperature_c = if fahrenheit {
            fahrenheit_to_celsius(temperature)
        } else {
            temperature
        };
        let status: DeviceStatus = record
            .get(4)
            .ok_or(Error::Validation(ParseError::MissingField("status")))?
            .trim()
            .parse()?;

        readings.push(TelemetryReading::new(
            temperature_c,
            number(&record, 2, "hum")?,
            number(&record, 3, "soil")?,
            status,
            timestamp,
        ));
    }
    Ok(readings)
}

/// Caller-supplied JSON export metadata; `None` fields get defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonMetadata {
    pub device_name: Option<String>,
    pub export_date: Option<OffsetDateTime>,
    pub version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportMetadata {
    #[serde(with = "time::serde::rfc3339")]
    export_date: OffsetDateTime,
    device_name: String,
    version: String,
    record_count: usize,
    time_range: Option<TimeRange>,
}

#[derive(Serialize)]
struct TimeRange {
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    end: OffsetDateTime,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    metadata: ExportMetadata,
    data: &'a [TelemetryReading],
}

/// Render readings (newest first) as pretty-printed JSON with metadata.
///
/// `timeRange.start` is the last (oldest) reading, `timeRange.end` the first.
pub fn generate_json(readings: &[TelemetryReading], metadata: JsonMetadata) -> Result<String> {
    let time_range = match (readings.last(), readings.first()) {
        (Some(oldest), Some(newest)) => Some(TimeRange {
            start: oldest.timestamp,
            end: newest.timestamp,
        }),
        _ => None,
    };

    let export = JsonExport {
        metadata: ExportMetadata {
            export_date: metadata.export_date.unwrap_or_else(OffsetDateTime::now_utc),
            device_name: metadata
                .device_name
                .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string()),
            version: metadata
                .version
                .unwrap_or_else(|| EXPORT_VERSION.to_string()),
            record_count: readings.len(),
            time_range,
        },
        data: readings,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

/// Render readings in `format` with default options.
pub fn export(readings: &[TelemetryReading], format: ExportFormat, device_name: &str) -> Result<String> {
    match format {
        ExportFormat::Csv => generate_csv(readings, CsvOptions::default()),
        ExportFormat::Json => generate_json(
            readings,
            JsonMetadata {
                device_name: Some(device_name.to_string()),
                ..JsonMetadata::default()
            },
        ),
    }
}
