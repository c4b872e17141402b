//! Connection health tracking.
//!
//! [`ConnectionHealth`] classifies probe latency into a [`ConnectionQuality`]
//! and keeps running success-rate and uptime counters. It can be driven
//! manually with [`ConnectionHealth::record_success`] /
//! [`ConnectionHealth::record_failure`], or with [`ConnectionHealth::check`]
//! against a [`TelemetryClient`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::TelemetryClient;
use crate::error::Error;
use crate::events::{Listeners, Subscription};
use crate::realtime::ConnectionQuality;

/// Options for [`ConnectionHealth`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthOptions {
    /// Period of the background check loop.
    pub check_interval: Duration,
    /// Latency under which the link is `Excellent`; under twice this it is `Good`.
    pub healthy_threshold: Duration,
    /// Latency under which the link is `Fair`; above it is `Poor`.
    pub warning_threshold: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            healthy_threshold: Duration::from_millis(100),
            warning_threshold: Duration::from_millis(500),
        }
    }
}

impl HealthOptions {
    /// Classify a successful probe's latency.
    pub fn classify(&self, latency: Duration) -> ConnectionQuality {
        if latency < self.healthy_threshold {
            ConnectionQuality::Excellent
        } else if latency < self.healthy_threshold * 2 {
            ConnectionQuality::Good
        } else if latency < self.warning_threshold {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }
}

/// Point-in-time view of connection health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub quality: ConnectionQuality,
    /// Latency of the last successful probe; `None` after a failure.
    pub latency_ms: Option<u64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    /// Time since tracking started or was last reset.
    pub uptime: Duration,
    /// Percentage of successful checks, rounded to one decimal.
    pub success_rate: f64,
    pub total_checks: u64,
    pub successful_checks: u64,
}

#[derive(Debug)]
struct HealthState {
    quality: ConnectionQuality,
    latency: Option<Duration>,
    last_checked: Option<OffsetDateTime>,
    started: Instant,
}

/// Latency and availability tracker for one endpoint.
#[derive(Debug)]
pub struct ConnectionHealth {
    options: HealthOptions,
    total_checks: AtomicU64,
    successful_checks: AtomicU64,
    state: Mutex<HealthState>,
    listeners: Listeners<ConnectionQuality>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new(HealthOptions::default())
    }
}

impl ConnectionHealth {
    pub fn new(options: HealthOptions) -> Self {
        Self {
            options,
            total_checks: AtomicU64::new(0),
            successful_checks: AtomicU64::new(0),
            state: Mutex::new(HealthState {
                quality: ConnectionQuality::Disconnected,
                latency: None,
                last_checked: None,
                started: Instant::now(),
            }),
            listeners: Listeners::new(),
        }
    }

    /// Create shared health tracking.
    pub fn shared(options: HealthOptions) -> Arc<Self> {
        Arc::new(Self::new(options))
    }

    pub fn options(&self) -> &HealthOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called with the new quality whenever it changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConnectionQuality) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Record a successful probe.
    pub fn record_success(&self, latency: Duration) -> ConnectionQuality {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        self.successful_checks.fetch_add(1, Ordering::Relaxed);
        self.transition(self.options.classify(latency), Some(latency))
    }

    /// Record a probe that reached the endpoint but got an error status.
    pub fn record_degraded(&self) -> ConnectionQuality {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        self.transition(ConnectionQuality::Poor, None)
    }

    /// Record a probe that could not reach the endpoint.
    pub fn record_failure(&self) -> ConnectionQuality {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        self.transition(ConnectionQuality::Disconnected, None)
    }

    fn transition(&self, quality: ConnectionQuality, latency: Option<Duration>) -> ConnectionQuality {
        let previous = {
            let mut state = self.lock();
            state.latency = latency;
            state.last_checked = Some(OffsetDateTime::now_utc());
            std::mem::replace(&mut state.quality, quality)
        };
        if previous != quality {
            info!("Connection quality changed: {} -> {}", previous, quality);
            self.listeners.notify(&quality);
        }
        quality
    }

    /// Probe `client` once and record the outcome.
    ///
    /// Returns `None` if the probe was cancelled; nothing is recorded then.
    pub async fn check(
        &self,
        client: &TelemetryClient,
        cancel: &CancellationToken,
    ) -> Option<ConnectionQuality> {
        match client.probe(cancel).await {
            Ok(latency) => Some(self.record_success(latency)),
            Err(Error::Cancelled) => None,
            Err(Error::Protocol { status, .. }) => {
                debug!("Health probe got HTTP {}", status);
                Some(self.record_degraded())
            }
            Err(e) => {
                debug!("Health probe failed: {}", e);
                Some(self.record_failure())
            }
        }
    }

    /// Run [`check`](Self::check) every `check_interval` until `cancel` fires.
    pub fn spawn(
        self: Arc<Self>,
        client: TelemetryClient,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.options.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Health monitor cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.check(&client, &cancel).await;
                    }
                }
            }
        })
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.lock().quality
    }

    /// Percentage of successful checks, rounded to one decimal.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_checks.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let ok = self.successful_checks.load(Ordering::Relaxed);
        (ok as f64 / total as f64 * 1000.0).round() / 10.0
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.lock();
        HealthSnapshot {
            quality: state.quality,
            latency_ms: state.latency.map(|l| l.as_millis() as u64),
            last_checked: state.last_checked,
            uptime: state.started.elapsed(),
            success_rate: self.success_rate(),
            total_checks: self.total_checks.load(Ordering::Relaxed),
            successful_checks: self.successful_checks.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters and restart the uptime clock.
    pub fn reset(&self) {
        self.total_checks.store(0, Ordering::Relaxed);
        self.successful_checks.store(0, Ordering::Relaxed);
        let mut state = self.lock();
        state.quality = ConnectionQuality::Disconnected;
        state.latency = None;
        state.last_checked = None;
        state.started = Instant::now();
    }
}
