//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use soildash_core::{ExportFormat, HistoryRange, Settings, TemperatureUnit};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// File format for `export`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ExportKind {
    #[default]
    Csv,
    Json,
}

impl From<ExportKind> for ExportFormat {
    fn from(kind: ExportKind) -> Self {
        match kind {
            ExportKind::Csv => ExportFormat::Csv,
            ExportKind::Json => ExportFormat::Json,
        }
    }
}

/// History window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RangeArg {
    #[value(name = "1h")]
    Hour,
    #[value(name = "6h")]
    SixHours,
    #[default]
    #[value(name = "24h")]
    Day,
    #[value(name = "7d")]
    Week,
}

impl From<RangeArg> for HistoryRange {
    fn from(range: RangeArg) -> Self {
        match range {
            RangeArg::Hour => HistoryRange::LastHour,
            RangeArg::SixHours => HistoryRange::Last6Hours,
            RangeArg::Day => HistoryRange::Last24Hours,
            RangeArg::Week => HistoryRange::Last7Days,
        }
    }
}

/// Where readings come from. Flags override stored settings.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceArgs {
    /// Use synthetic demo data instead of a device
    #[arg(long, global = true, conflicts_with = "live")]
    pub demo: bool,

    /// Use the configured device even if demo mode is on
    #[arg(long, global = true)]
    pub live: bool,

    /// Device address, or use SOILDASH_DEVICE env var
    #[arg(short, long, global = true, env = "SOILDASH_DEVICE")]
    pub device: Option<String>,

    /// Fetch through this proxy URL
    #[arg(long, global = true, conflicts_with = "direct")]
    pub proxy: Option<String>,

    /// Fetch from the device directly, bypassing the proxy
    #[arg(long, global = true)]
    pub direct: bool,
}

impl SourceArgs {
    /// Apply the flags on top of stored settings.
    pub fn apply(&self, settings: &Settings) -> Settings {
        let mut settings = settings.clone();
        if let Some(device) = &self.device {
            settings.device_ip = device.clone();
            settings.demo_mode = false;
        }
        if let Some(proxy) = &self.proxy {
            settings.proxy_url = proxy.clone();
            settings.use_proxy = true;
            settings.demo_mode = false;
        }
        if self.direct {
            settings.use_proxy = false;
        }
        if self.live {
            settings.demo_mode = false;
        }
        if self.demo {
            settings.demo_mode = true;
        }
        settings
    }
}

/// Temperature unit flags
#[derive(Debug, Clone, Default, Args)]
pub struct UnitArgs {
    /// Show temperatures in Fahrenheit
    #[arg(long, conflicts_with = "celsius")]
    pub fahrenheit: bool,

    /// Show temperatures in Celsius
    #[arg(long, conflicts_with = "fahrenheit")]
    pub celsius: bool,
}

impl UnitArgs {
    /// Resolve the unit: explicit flags override settings
    pub fn resolve(&self, configured: TemperatureUnit) -> TemperatureUnit {
        if self.fahrenheit {
            TemperatureUnit::Fahrenheit
        } else if self.celsius {
            TemperatureUnit::Celsius
        } else {
            configured
        }
    }
}

#[derive(Parser)]
#[command(name = "soildash")]
#[command(author, version, about = "CLI for SoilDash soil and climate sensors", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read the current sensor values once
    Read {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        units: UnitArgs,
    },

    /// Poll continuously and show readings and alerts
    Watch {
        /// Polling interval in seconds (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many readings (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        units: UnitArgs,
    },

    /// Show stored history
    History {
        /// Time window
        #[arg(short, long, value_enum, default_value = "24h")]
        range: RangeArg,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        #[command(flatten)]
        units: UnitArgs,
    },

    /// Summary statistics over a history window
    Stats {
        /// Time window
        #[arg(short, long, value_enum, default_value = "24h")]
        range: RangeArg,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Export history as CSV or JSON
    Export {
        /// Time window
        #[arg(short, long, value_enum, default_value = "24h")]
        range: RangeArg,

        /// File format
        #[arg(short, long, value_enum, default_value = "csv")]
        format: ExportKind,

        /// Omit the CSV header row
        #[arg(long)]
        no_header: bool,

        #[command(flatten)]
        units: UnitArgs,
    },

    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current settings
    Show,
    /// Show where settings are stored
    Path,
    /// Set a value (e.g. `soildash config set unit f`)
    Set {
        /// Setting name
        key: String,
        /// New value
        value: String,
    },
    /// Restore default settings
    Reset,
    /// Remove stored settings and cached history
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch() {
        let cli = Cli::try_parse_from(["soildash", "watch", "-i", "3", "-n", "5", "--demo"]).unwrap();
        assert!(cli.source.demo);
        match cli.command {
            Commands::Watch { interval, count, .. } => {
                assert_eq!(interval, Some(3));
                assert_eq!(count, 5);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_parse_range() {
        let cli = Cli::try_parse_from(["soildash", "history", "--range", "7d"]).unwrap();
        match cli.command {
            Commands::History { range, .. } => {
                assert_eq!(HistoryRange::from(range), HistoryRange::Last7Days)
            }
            _ => panic!("expected history"),
        }
    }

    #[test]
    fn test_source_flags_override_settings() {
        let settings = Settings::default();
        assert!(settings.demo_mode);

        let args = SourceArgs {
            device: Some("10.0.0.8".to_string()),
            direct: true,
            ..SourceArgs::default()
        };
        let resolved = args.apply(&settings);
        assert_eq!(resolved.device_ip, "10.0.0.8");
        assert!(!resolved.demo_mode);
        assert!(!resolved.use_proxy);

        let demo = SourceArgs {
            demo: true,
            ..SourceArgs::default()
        };
        assert!(demo.apply(&resolved).demo_mode);
    }

    #[test]
    fn test_unit_resolution() {
        let units = UnitArgs {
            fahrenheit: true,
            celsius: false,
        };
        assert_eq!(units.resolve(TemperatureUnit::Celsius), TemperatureUnit::Fahrenheit);
        assert_eq!(
            UnitArgs::default().resolve(TemperatureUnit::Fahrenheit),
            TemperatureUnit::Fahrenheit
        );
    }
}
