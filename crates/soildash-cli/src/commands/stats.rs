//! Stats command implementation.

use std::path::PathBuf;

use anyhow::Result;
use soildash_core::{
    FileStore, HistoryRange, Metric, Settings, SettingsManager, StatsOptions, TelemetryStats,
    calculate_stats,
};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_json, format_stats_text};
use crate::util::{build_source, load_history, write_output};

pub async fn cmd_stats(
    settings: &Settings,
    manager: &SettingsManager<FileStore>,
    range: HistoryRange,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let source = build_source(settings)?;
    let readings = load_history(&source, manager, range).await;
    let stats = calculate_stats(readings.iter(), StatsOptions::advanced());

    let content = match format {
        OutputFormat::Text => format_stats_text(&stats, opts),
        OutputFormat::Json => format_json(&stats)?,
        OutputFormat::Csv => stats_csv(&stats),
    };
    write_output(output, &content)
}

/// One row per metric: name, min, max, avg, std_dev, trend.
fn stats_csv(stats: &TelemetryStats) -> String {
    let mut out = String::from("metric,min,max,avg,std_dev,trend\n");
    for metric in Metric::ALL {
        if let Some(s) = stats.get(metric) {
            out.push_str(&format!(
                "{},{:.2},{:.2},{:.2},{},{}\n",
                metric.wire_name(),
                s.min,
                s.max,
                s.avg,
                s.std_dev.map(|d| format!("{:.2}", d)).unwrap_or_default(),
                s.trend.map(|t| format!("{:?}", t).to_lowercase()).unwrap_or_default(),
            ));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_core::{DeviceStatus, TelemetryReading};
    use time::OffsetDateTime;

    #[test]
    fn test_stats_csv() {
        // Newest first: temperature is falling.
        let readings = [
            TelemetryReading::new(20.0, 60.0, 40.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH),
            TelemetryReading::new(22.0, 62.0, 44.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH),
        ];
        let stats = calculate_stats(readings.iter(), StatsOptions::advanced());
        let csv = stats_csv(&stats);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("temp,20.00,22.00,21.00,1.00,"));
        assert!(lines[1].ends_with(",down"));
    }
}
