//! Export command implementation.

use std::path::PathBuf;

use anyhow::Result;
use soildash_core::export::{JsonMetadata, generate_json};
use soildash_core::{
    ExportFormat, FileStore, HistoryRange, Settings, SettingsManager, TelemetrySource,
};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

use crate::format::{FormatOptions, format_readings_csv};
use crate::util::{build_source, load_history, write_output};

/// Arguments for the export command.
pub struct ExportArgs<'a> {
    pub settings: &'a Settings,
    pub manager: &'a SettingsManager<FileStore>,
    pub range: HistoryRange,
    pub format: ExportFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

/// File name used when no `--output` is given, e.g. `soildash-2025-01-31.csv`.
pub fn default_file_name(format: ExportFormat, date: OffsetDateTime) -> String {
    let day = date
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| "export".to_string());
    format!("soildash-{}.{}", day, format.extension())
}

pub async fn cmd_export(args: ExportArgs<'_>) -> Result<()> {
    let ExportArgs {
        settings,
        manager,
        range,
        format,
        output,
        quiet,
        opts,
    } = args;

    let source = build_source(settings)?;
    let readings = load_history(&source, manager, range).await;

    let content = match format {
        ExportFormat::Csv => format_readings_csv(&readings, opts)?,
        ExportFormat::Json => {
            let metadata = JsonMetadata {
                device_name: Some(source.device_name().to_string()),
                ..JsonMetadata::default()
            };
            format!("{}\n", generate_json(&readings, metadata)?)
        }
    };

    let path = output
        .cloned()
        .unwrap_or_else(|| PathBuf::from(default_file_name(format, OffsetDateTime::now_utc())));
    write_output(Some(&path), &content)?;

    if !quiet {
        info!("Exported {} readings to {}", readings.len(), path.display());
    }
    Ok(())
}
