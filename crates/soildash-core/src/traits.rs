//! Trait abstractions for telemetry sources.
//!
//! This module provides the [`TelemetrySource`] trait that abstracts over a
//! real device (reached over HTTP) and the demo-mode mock generator.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use soildash_types::TelemetryReading;

use crate::client::HistoryRange;
use crate::error::Result;

/// Anything that can produce telemetry readings on demand.
///
/// The poller drives a `TelemetrySource` once per tick and does not care
/// whether the reading came from a device or from the generator.
///
/// # Example
///
/// ```ignore
/// use soildash_core::{TelemetrySource, Result};
/// use tokio_util::sync::CancellationToken;
///
/// async fn print_reading<S: TelemetrySource>(source: &S) -> Result<()> {
///     let reading = source.fetch(&CancellationToken::new()).await?;
///     println!("Soil: {}%", reading.soil_moisture_pct);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Identifier used for alerts and exports (device address or `"demo"`).
    fn device_id(&self) -> &str;

    /// Display name for alerts.
    fn device_name(&self) -> &str {
        self.device_id()
    }

    /// Fetch one reading.
    ///
    /// Must return [`crate::Error::Cancelled`] promptly once `cancel` fires.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<TelemetryReading>;

    /// Fetch stored history, newest first.
    ///
    /// Sources without history return an empty list.
    async fn fetch_history(
        &self,
        _range: HistoryRange,
        _cancel: &CancellationToken,
    ) -> Vec<TelemetryReading> {
        Vec::new()
    }
}
