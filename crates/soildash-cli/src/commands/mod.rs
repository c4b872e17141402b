//! Command implementations for the CLI.

mod config;
mod export;
mod history;
mod read;
mod stats;
mod watch;

pub use config::cmd_config;
pub use export::{ExportArgs, cmd_export};
pub use history::{HistoryArgs, cmd_history};
pub use read::cmd_read;
pub use stats::cmd_stats;
pub use watch::{WatchArgs, cmd_watch};
