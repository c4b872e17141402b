//! History command implementation.

use std::path::PathBuf;

use anyhow::Result;
use soildash_core::{FileStore, HistoryRange, Settings, SettingsManager, TelemetrySource};
use tracing::info;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_history_text, format_json, format_readings_csv};
use crate::util::{build_source, load_history, write_output};

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub settings: &'a Settings,
    pub manager: &'a SettingsManager<FileStore>,
    pub range: HistoryRange,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_history(args: HistoryArgs<'_>) -> Result<()> {
    let HistoryArgs {
        settings,
        manager,
        range,
        format,
        output,
        quiet,
        opts,
    } = args;

    let source = build_source(settings)?;
    if !quiet {
        info!("Fetching {} of history from {}", range, source.device_name());
    }

    let readings = load_history(&source, manager, range).await;
    if !quiet {
        info!("Retrieved {} readings", readings.len());
    }

    let content = match format {
        OutputFormat::Text => format_history_text(&readings, opts),
        OutputFormat::Json => format_json(&readings)?,
        OutputFormat::Csv => format_readings_csv(&readings, opts)?,
    };
    write_output(output, &content)
}
