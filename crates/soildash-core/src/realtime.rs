//! Live view state: latest reading, a short streaming history and
//! connection quality.
//!
//! Unlike the poller's [`HistoryBuffer`](crate::HistoryBuffer), the streaming
//! history is kept oldest first, which is the order a live chart consumes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::time::Instant;

use soildash_types::TelemetryReading;

use crate::events::{Listeners, Subscription};

/// Readings kept for the live view.
pub const MAX_STREAMING_HISTORY: usize = 100;

/// Coarse link quality shown next to the live view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    #[default]
    Disconnected,
}

impl ConnectionQuality {
    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "Excellent",
            ConnectionQuality::Good => "Good",
            ConnectionQuality::Fair => "Fair",
            ConnectionQuality::Poor => "Poor",
            ConnectionQuality::Disconnected => "Disconnected",
        }
    }

    /// Whether the device is reachable at all.
    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionQuality::Disconnected)
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time copy of a [`RealtimeStore`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeSnapshot {
    pub is_connected: bool,
    pub quality: ConnectionQuality,
    pub latest: Option<TelemetryReading>,
    /// Oldest first.
    pub streaming_history: Vec<TelemetryReading>,
    pub is_paused: bool,
    pub updates_per_second: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

/// What changed in a [`RealtimeStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeChange {
    Reading(TelemetryReading),
    Connection {
        is_connected: bool,
        quality: ConnectionQuality,
    },
    Paused(bool),
    Cleared,
}

#[derive(Debug, Default)]
struct RealtimeState {
    is_connected: bool,
    quality: ConnectionQuality,
    latest: Option<TelemetryReading>,
    history: VecDeque<TelemetryReading>,
    is_paused: bool,
    updates_per_second: f64,
    last_update: Option<OffsetDateTime>,
    last_instant: Option<Instant>,
}

/// Store backing the live view.
#[derive(Debug, Default)]
pub struct RealtimeStore {
    state: Mutex<RealtimeState>,
    listeners: Listeners<RealtimeChange>,
}

impl RealtimeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RealtimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RealtimeChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Record a reading. Dropped (returns `false`) while paused.
    pub fn add_reading(&self, reading: TelemetryReading) -> bool {
        {
            let mut state = self.lock();
            if state.is_paused {
                return false;
            }
            state.latest = Some(reading);
            state.history.push_back(reading);
            while state.history.len() > MAX_STREAMING_HISTORY {
                state.history.pop_front();
            }

            let now = Instant::now();
            state.updates_per_second = match state.last_instant {
                Some(previous) => {
                    let elapsed = now.duration_since(previous).as_secs_f64();
                    if elapsed > 0.0 { 1.0 / elapsed } else { 0.0 }
                }
                None => 0.0,
            };
            state.last_instant = Some(now);
            state.last_update = Some(OffsetDateTime::now_utc());
        }
        self.listeners.notify(&RealtimeChange::Reading(reading));
        true
    }

    /// Update link state. A quality of `Disconnected` implies not connected.
    pub fn set_connection(&self, quality: ConnectionQuality) {
        let changed = {
            let mut state = self.lock();
            let is_connected = quality.is_connected();
            let changed = state.quality != quality || state.is_connected != is_connected;
            state.quality = quality;
            state.is_connected = is_connected;
            changed
        };
        if changed {
            self.listeners.notify(&RealtimeChange::Connection {
                is_connected: quality.is_connected(),
                quality,
            });
        }
    }

    /// Stop accepting readings.
    pub fn pause(&self) {
        self.set_paused(true);
    }

    /// Accept readings again.
    pub fn resume(&self) {
        self.set_paused(false);
    }

    fn set_paused(&self, paused: bool) {
        let changed = {
            let mut state = self.lock();
            std::mem::replace(&mut state.is_paused, paused) != paused
        };
        if changed {
            self.listeners.notify(&RealtimeChange::Paused(paused));
        }
    }

    /// Forget the latest reading and the streaming history.
    pub fn clear_history(&self) {
        {
            let mut state = self.lock();
            state.history.clear();
            state.latest = None;
            state.last_instant = None;
            state.updates_per_second = 0.0;
        }
        self.listeners.notify(&RealtimeChange::Cleared);
    }

    pub fn is_paused(&self) -> bool {
        self.lock().is_paused
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        self.lock().quality
    }

    pub fn latest(&self) -> Option<TelemetryReading> {
        self.lock().latest
    }

    /// Streaming history, oldest first.
    pub fn streaming_history(&self) -> Vec<TelemetryReading> {
        self.lock().history.iter().copied().collect()
    }

    /// Rate implied by the gap between the last two readings.
    pub fn updates_per_second(&self) -> f64 {
        self.lock().updates_per_second
    }

    pub fn snapshot(&self) -> RealtimeSnapshot {
        let state = self.lock();
        RealtimeSnapshot {
            is_connected: state.is_connected,
            quality: state.quality,
            latest: state.latest,
            streaming_history: state.history.iter().copied().collect(),
            is_paused: state.is_paused,
            updates_per_second: state.updates_per_second,
            last_update: state.last_update,
        }
    }
}
