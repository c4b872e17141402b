//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use soildash_core::{
    FileStore, HistoryRange, MockSource, Settings, SettingsManager, SharedSource, TelemetryClient,
    TelemetryReading, TelemetrySource,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Build the reading source the settings point at.
pub fn build_source(settings: &Settings) -> Result<SharedSource> {
    if settings.demo_mode {
        debug!("Using demo data");
        return Ok(Arc::new(MockSource::default()));
    }

    let endpoint = settings.endpoint();
    debug!("Using {}", endpoint.data_url());
    let client = TelemetryClient::new(endpoint).context("Failed to create HTTP client")?;
    Ok(Arc::new(client))
}

/// History for `range`, newest first.
///
/// Falls back to readings saved by a previous `watch` when the source has
/// none, keeping only those inside the window.
pub async fn load_history(
    source: &SharedSource,
    manager: &SettingsManager<FileStore>,
    range: HistoryRange,
) -> Vec<TelemetryReading> {
    let readings = source
        .fetch_history(range, &CancellationToken::new())
        .await;
    if !readings.is_empty() {
        return readings;
    }

    debug!("Source returned no history, using saved readings");
    let cutoff = time::OffsetDateTime::now_utc() - range.duration();
    manager
        .load_history()
        .into_iter()
        .filter(|r| r.timestamp >= cutoff)
        .collect()
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Append output to file or write to stdout, for streaming commands.
pub fn append_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
