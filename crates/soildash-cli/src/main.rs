//! SoilDash command-line dashboard.

mod cli;
mod commands;
mod format;
mod util;

use anyhow::{Context, Result};
use clap::Parser;
use soildash_core::{FileStore, SettingsManager};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{
    ExportArgs, HistoryArgs, WatchArgs, cmd_config, cmd_export, cmd_history, cmd_read, cmd_stats,
    cmd_watch,
};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store = FileStore::default_location().context("Failed to locate settings directory")?;
    let mut manager = SettingsManager::load(store);
    let settings = cli.source.apply(manager.settings());
    let output = cli.output.as_ref();
    let quiet = cli.quiet;
    let configured_unit = settings.temperature_unit;

    match cli.command {
        Commands::Read { format, units } => {
            let opts = FormatOptions::new(cli.no_color, units.resolve(configured_unit));
            cmd_read(&settings, format, output, quiet, &opts).await?;
        }
        Commands::Watch {
            interval,
            count,
            format,
            units,
        } => {
            let opts = FormatOptions::new(cli.no_color, units.resolve(configured_unit));
            cmd_watch(WatchArgs {
                settings: &settings,
                manager: &manager,
                interval,
                count,
                format,
                output,
                quiet,
                opts: &opts,
            })
            .await?;
        }
        Commands::History {
            range,
            format,
            units,
        } => {
            let opts = FormatOptions::new(cli.no_color, units.resolve(configured_unit));
            cmd_history(HistoryArgs {
                settings: &settings,
                manager: &manager,
                range: range.into(),
                format,
                output,
                quiet,
                opts: &opts,
            })
            .await?;
        }
        Commands::Stats { range, format } => {
            let opts = FormatOptions::new(cli.no_color, configured_unit);
            cmd_stats(&settings, &manager, range.into(), format, output, &opts).await?;
        }
        Commands::Export {
            range,
            format,
            no_header,
            units,
        } => {
            let opts = FormatOptions::new(true, units.resolve(configured_unit)).with_no_header(no_header);
            cmd_export(ExportArgs {
                settings: &settings,
                manager: &manager,
                range: range.into(),
                format: format.into(),
                output,
                quiet,
                opts: &opts,
            })
            .await?;
        }
        Commands::Config { action } => {
            cmd_config(action, &mut manager, output, quiet)?;
        }
    }

    Ok(())
}
