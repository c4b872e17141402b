//! Telemetry acquisition and state layer for SoilDash sensors.
//!
//! SoilDash devices are small HTTP sensors that report air temperature,
//! relative humidity and soil moisture as JSON from `GET /data`. This crate
//! fetches, validates and stores those readings and derives everything a
//! dashboard shows from them.
//!
//! # Features
//!
//! - **Fetching**: HTTP client with per-request timeout and retry with backoff
//! - **Polling**: one cancellable fetch in flight per device, fixed period
//! - **Demo mode**: smooth synthetic readings when no device is present
//! - **Statistics**: min/max/avg per metric, optional trend and std-dev
//! - **Alerts**: threshold breaches and device anomalies, deduplicated
//! - **Realtime view**: bounded streaming window and connection quality
//! - **Devices**: registry of known devices with selection and link state
//! - **Settings**: persisted user preferences and cached history
//! - **Export**: CSV and JSON
//!
//! # Quick Start
//!
//! ```no_run
//! use soildash_core::{Monitor, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::default();
//!     let monitor = Monitor::from_settings(&settings)?;
//!     let mut events = monitor.events();
//!     monitor.start();
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod client;
pub mod devices;
pub mod error;
pub mod events;
pub mod export;
pub mod format;
pub mod health;
pub mod history;
pub mod mock;
pub mod monitor;
pub mod poller;
pub mod realtime;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod stats;
pub mod thresholds;
pub mod traits;

// Core exports
pub use client::{Endpoint, HistoryRange, TelemetryClient};
pub use error::{Error, Result};
pub use history::{DEFAULT_MAX_HISTORY, HistoryBuffer};
pub use monitor::Monitor;
pub use poller::{Poller, PollerBuilder, PollerConfig, PollerSnapshot, PollerState};
pub use traits::TelemetrySource;

/// Type alias for a shared telemetry source.
///
/// Pollers and monitors take sources as `Arc<dyn TelemetrySource>` so the
/// same client can also be probed by a health monitor.
pub type SharedSource = std::sync::Arc<dyn TelemetrySource>;

pub use alerts::{
    Alert, AlertEvaluator, AlertFilter, AlertKind, AlertSeverity, AlertStore, TimelineEvent,
};
pub use devices::{DeviceChange, DeviceEntry, DeviceStore};
pub use events::{EventDispatcher, EventReceiver, EventSender, Subscription, TelemetryEvent};
pub use export::{ExportFormat, export};
pub use format::TemperatureUnit;
pub use health::{ConnectionHealth, HealthOptions};
pub use mock::{MockGenerator, MockSource};
pub use realtime::{ConnectionQuality, RealtimeStore};
pub use retry::{RetryConfig, with_retry};
pub use scheduler::{Scheduler, Throttle};
pub use settings::{FileStore, KeyValueStore, MemoryStore, Settings, SettingsManager};
pub use stats::{StatsOptions, TelemetryStats, Trend, calculate_stats};
pub use thresholds::{AlertThresholds, ThresholdRange};

// Re-export from soildash-types
pub use soildash_types::{DeviceStatus, Metric, TelemetryReading};
