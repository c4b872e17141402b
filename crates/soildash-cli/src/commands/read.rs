//! Read command implementation.

use std::path::PathBuf;

use anyhow::{Result, bail};
use soildash_core::{Settings, TelemetrySource};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_json, format_reading_text, format_readings_csv};
use crate::util::{build_source, write_output};

pub async fn cmd_read(
    settings: &Settings,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let source = build_source(settings)?;
    if !quiet {
        info!("Reading from {}", source.device_name());
    }

    let reading = match source.fetch(&CancellationToken::new()).await {
        Ok(reading) => reading,
        Err(e) => bail!(
            "Failed to read from {}: {}\n{}",
            source.device_id(),
            e,
            e.guidance()
        ),
    };

    let content = match format {
        OutputFormat::Text => format_reading_text(&reading, opts),
        OutputFormat::Json => format_json(&reading)?,
        OutputFormat::Csv => format_readings_csv(&[reading], opts)?,
    };
    write_output(output, &content)
}
