//! Watch command implementation.
//!
//! Drives a [`Monitor`] and prints each reading as it arrives. Alerts and
//! fetch errors go to stderr so stdout stays machine-readable in JSON and CSV
//! modes. Readings collected during the session are saved on exit.

use std::path::PathBuf;

use anyhow::{Context, Result};
use soildash_core::{FileStore, Monitor, Settings, SettingsManager, TelemetryEvent, TelemetryReading};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_alert_line, format_readings_csv, format_watch_line};
use crate::util::{append_output, write_output};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub settings: &'a Settings,
    pub manager: &'a SettingsManager<FileStore>,
    /// Interval override in seconds.
    pub interval: Option<u64>,
    /// Stop after this many readings; 0 runs until Ctrl+C.
    pub count: u32,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

fn render(
    reading: &TelemetryReading,
    previous: Option<&TelemetryReading>,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => format_watch_line(reading, previous, opts),
        OutputFormat::Json => format!("{}\n", serde_json::to_string(reading)?),
        OutputFormat::Csv => format_readings_csv(std::slice::from_ref(reading), &opts.with_no_header(true))?,
    })
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        settings,
        manager,
        interval,
        count,
        format,
        output,
        quiet,
        opts,
    } = args;

    let mut settings = settings.clone();
    if let Some(secs) = interval {
        settings.polling_interval_ms = secs.saturating_mul(1000);
    }
    let monitor = Monitor::from_settings(&settings).context("Failed to set up monitoring")?;
    let mut events = monitor.events();

    // Start from an empty file; readings are appended as they arrive.
    let header = match format {
        OutputFormat::Csv if !opts.no_header => format_readings_csv(&[], opts)?,
        _ => String::new(),
    };
    if output.is_some() || !header.is_empty() {
        write_output(output, &header)?;
    }

    if !quiet {
        info!(
            "Watching {} every {:?} (Ctrl+C to stop)",
            monitor.poller().device_name(),
            monitor.poller().config().effective_interval()
        );
    }
    monitor.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut previous: Option<TelemetryReading> = None;
    let mut seen = 0u32;

    loop {
        tokio::select! {
            biased;
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(TelemetryEvent::Reading { reading, .. }) => {
                    append_output(output, &render(&reading, previous.as_ref(), format, opts)?)?;
                    previous = Some(reading);
                    seen += 1;
                    if count > 0 && seen >= count {
                        break;
                    }
                }
                Ok(TelemetryEvent::Alert { alert }) => {
                    if !quiet {
                        eprint!("{}", format_alert_line(&alert, opts.no_color));
                    }
                }
                Ok(TelemetryEvent::Error { error, guidance, .. }) => {
                    warn!("{}", error);
                    if !quiet {
                        eprintln!("{}", guidance);
                    }
                }
                Ok(TelemetryEvent::ConnectionChanged { quality, .. }) => {
                    debug!("Connection: {:?}", quality);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Display fell behind, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    monitor.stop();

    let history = monitor.poller().history();
    manager.save_history(&history);
    if !quiet {
        info!("Saved {} readings", history.len());
        let unread = monitor.alerts().unread_count();
        if unread > 0 {
            info!("{} unread alerts this session", unread);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_core::TemperatureUnit;

    fn opts() -> FormatOptions {
        FormatOptions::new(true, TemperatureUnit::Celsius)
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_demo_stops_after_count() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::load(FileStore::new(dir.path().join("config")));
        let path = dir.path().join("watch.jsonl");
        let opts = opts();

        cmd_watch(WatchArgs {
            settings: &Settings::default(),
            manager: &manager,
            interval: Some(2),
            count: 3,
            format: OutputFormat::Json,
            output: Some(&path),
            quiet: true,
            opts: &opts,
        })
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let readings: Vec<TelemetryReading> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(readings.len(), 3);
        assert_eq!(manager.load_history().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_csv_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::load(FileStore::new(dir.path().join("config")));
        let path = dir.path().join("watch.csv");
        let opts = opts();

        cmd_watch(WatchArgs {
            settings: &Settings::default(),
            manager: &manager,
            interval: None,
            count: 2,
            format: OutputFormat::Csv,
            output: Some(&path),
            quiet: true,
            opts: &opts,
        })
        .await
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp,"));
        assert!(lines[1].starts_with('"'));
    }

    #[test]
    fn test_render_text_has_arrows() {
        let first = TelemetryReading::new(
            20.0,
            50.0,
            40.0,
            soildash_core::DeviceStatus::Safe,
            time::OffsetDateTime::UNIX_EPOCH,
        );
        let second = TelemetryReading { temperature_c: 19.0, ..first };
        let line = render(&second, Some(&first), OutputFormat::Text, &opts()).unwrap();
        assert!(line.contains("19.0°C ↓"));
    }
}
