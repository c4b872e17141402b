//! Polling state machine.
//!
//! A [`Poller`] drives one [`TelemetrySource`] on a fixed period from a
//! single tokio task. It owns the [`HistoryBuffer`] for that source and the
//! cancellation token of the fetch in flight.
//!
//! ```text
//!            start / enable
//!   Disabled ───────────────► Idle ◄──────┐
//!      ▲                       │ tick     │ done / failed
//!      │ disable               ▼          │
//!      └──────────────────── Fetching ────┘
//!   (any) ── stop ──► Stopped
//! ```
//!
//! # Cancellation
//!
//! At most one fetch is in flight. When the next tick fires while a fetch is
//! still outstanding, that fetch is cancelled and a new one starts. Disabling,
//! reconfiguring, stopping or dropping the poller cancels both the timer and
//! the in-flight fetch. A cancelled fetch never touches history, never
//! records an error and never calls `on_data` / `on_error`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use soildash_core::{MockSource, Poller, PollerConfig};
//!
//! # async fn example() {
//! let poller = Poller::builder(Arc::new(MockSource::default()))
//!     .config(PollerConfig::new().interval(Duration::from_secs(5)))
//!     .on_data(|reading| println!("{:.1}°C", reading.temperature_c))
//!     .build();
//! poller.start();
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use soildash_types::TelemetryReading;

use crate::client::HistoryRange;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, Listeners, Subscription, TelemetryEvent};
use crate::history::{DEFAULT_MAX_HISTORY, HistoryBuffer};
use crate::stats::{StatsOptions, TelemetryStats, calculate_stats};
use crate::traits::TelemetrySource;

/// Shortest polling period; shorter intervals are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failures after which failures are logged at `error` level.
const ESCALATE_AFTER_FAILURES: u32 = 3;

/// Lifecycle state of a [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// Polling is paused; `enable` resumes it.
    Disabled,
    /// Polling was stopped.
    Stopped,
}

impl PollerState {
    /// Whether the timer is running.
    pub fn is_active(&self) -> bool {
        matches!(self, PollerState::Idle | PollerState::Fetching)
    }
}

/// Poller configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    /// Requested period between fetches.
    pub interval: Duration,
    /// History cap.
    pub max_history: usize,
    /// Back-fill history from the source when polling starts with an empty buffer.
    pub backfill: Option<HistoryRange>,
    /// Compute standard deviation and trend alongside min/max/avg.
    pub advanced_stats: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_history: DEFAULT_MAX_HISTORY,
            backfill: None,
            advanced_stats: true,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    #[must_use]
    pub fn backfill(mut self, range: HistoryRange) -> Self {
        self.backfill = Some(range);
        self
    }

    #[must_use]
    pub fn advanced_stats(mut self, advanced: bool) -> Self {
        self.advanced_stats = advanced;
        self
    }

    /// The period actually used: `max(interval, MIN_POLL_INTERVAL)`.
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }

    fn stats_options(&self) -> StatsOptions {
        if self.advanced_stats {
            StatsOptions::advanced()
        } else {
            StatsOptions::basic()
        }
    }
}

/// The last fetch failure, kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollError {
    pub message: String,
    pub guidance: String,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl PollError {
    fn from_error(error: &Error) -> Self {
        Self {
            message: error.to_string(),
            guidance: error.guidance().to_string(),
            at: OffsetDateTime::now_utc(),
        }
    }
}

/// Point-in-time copy of a poller's observable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollerSnapshot {
    pub device_id: String,
    pub state: PollerState,
    pub latest: Option<TelemetryReading>,
    /// Newest first.
    pub history: Vec<TelemetryReading>,
    pub stats: TelemetryStats,
    pub last_error: Option<PollError>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_updated: Option<OffsetDateTime>,
    pub consecutive_failures: u32,
}

type DataCallback = Arc<dyn Fn(&TelemetryReading) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

struct PollerShared {
    config: PollerConfig,
    state: PollerState,
    history: HistoryBuffer,
    stats: TelemetryStats,
    last_error: Option<PollError>,
    last_updated: Option<OffsetDateTime>,
    consecutive_failures: u32,
}

struct PollerInner {
    source: Arc<dyn TelemetrySource>,
    shared: Mutex<PollerShared>,
    listeners: Listeners<TelemetryEvent>,
    dispatcher: EventDispatcher,
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Builder for [`Poller`].
pub struct PollerBuilder {
    source: Arc<dyn TelemetrySource>,
    config: PollerConfig,
    dispatcher: Option<EventDispatcher>,
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
}

impl PollerBuilder {
    #[must_use]
    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Broadcast events on an existing dispatcher instead of a private one.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Called after each successful fetch has been committed to history.
    #[must_use]
    pub fn on_data<F>(mut self, f: F) -> Self
    where
        F: Fn(&TelemetryReading) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(f));
        self
    }

    /// Called after each failed fetch (never for cancelled ones).
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Poller {
        let history = HistoryBuffer::new(self.config.max_history);
        Poller {
            inner: Arc::new(PollerInner {
                source: self.source,
                shared: Mutex::new(PollerShared {
                    config: self.config,
                    state: PollerState::Idle,
                    history,
                    stats: TelemetryStats::default(),
                    last_error: None,
                    last_updated: None,
                    consecutive_failures: 0,
                }),
                listeners: Listeners::new(),
                dispatcher: self.dispatcher.unwrap_or_default(),
                on_data: self.on_data,
                on_error: self.on_error,
            }),
            task: Mutex::new(None),
        }
    }
}

/// Periodic fetcher for one telemetry source.
///
/// All operations take `&self`; share the poller with `Arc` if several
/// owners need it. Starting requires a tokio runtime.
pub struct Poller {
    inner: Arc<PollerInner>,
    task: Mutex<Option<PollTask>>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("device_id", &self.inner.source.device_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Poller {
    /// Start building a poller for `source`.
    pub fn builder(source: Arc<dyn TelemetrySource>) -> PollerBuilder {
        PollerBuilder {
            source,
            config: PollerConfig::default(),
            dispatcher: None,
            on_data: None,
            on_error: None,
        }
    }

    /// Poller with default configuration and no callbacks.
    pub fn new(source: Arc<dyn TelemetrySource>) -> Self {
        Self::builder(source).build()
    }

    fn task(&self) -> MutexGuard<'_, Option<PollTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling. The first fetch happens immediately.
    ///
    /// No-op if already running.
    pub fn start(&self) {
        let mut task = self.task();
        if task.as_ref().is_some_and(|t| !t.cancel.is_cancelled()) {
            return;
        }

        let cancel = CancellationToken::new();
        let config = self.inner.lock().config.clone();
        info!(
            "Starting poller for {} every {:?}",
            self.inner.source.device_id(),
            config.effective_interval()
        );
        self.inner.set_state(PollerState::Idle);

        let handle = tokio::spawn(run(Arc::clone(&self.inner), cancel.clone(), config));
        *task = Some(PollTask { cancel, handle });
    }

    /// Cancel the timer and the in-flight fetch, then move to `state`.
    ///
    /// The state change happens under the shared lock together with the
    /// cancellation, so a fetch completing concurrently cannot commit.
    fn halt(&self, state: PollerState) {
        let task = self.task().take();
        let changed = {
            let mut shared = self.inner.lock();
            if let Some(task) = &task {
                task.cancel.cancel();
            }
            std::mem::replace(&mut shared.state, state) != state
        };
        if changed {
            self.inner.emit(TelemetryEvent::StateChanged {
                device_id: self.inner.source.device_id().to_string(),
                state,
            });
        }
    }

    /// Pause polling. History and the last reading are kept.
    pub fn disable(&self) {
        debug!("Disabling poller for {}", self.inner.source.device_id());
        self.halt(PollerState::Disabled);
    }

    /// Resume after [`disable`](Self::disable). No-op in any other state.
    pub fn enable(&self) {
        if self.state() == PollerState::Disabled {
            self.start();
        }
    }

    /// Apply a new configuration.
    ///
    /// The timer and in-flight fetch are cancelled; history is truncated to the
    /// new cap. Polling restarts if it was running.
    pub fn reconfigure(&self, config: PollerConfig) {
        let was_active = self.state().is_active() && self.is_running();
        let task = self.task().take();
        if let Some(task) = task {
            let _guard = self.inner.lock();
            task.cancel.cancel();
        }
        {
            let mut shared = self.inner.lock();
            shared.history.set_capacity(config.max_history);
            let options = config.stats_options();
            shared.stats = calculate_stats(shared.history.iter(), options);
            shared.config = config;
        }
        if was_active {
            self.start();
        }
    }

    /// Stop polling for good.
    pub fn stop(&self) {
        info!("Stopping poller for {}", self.inner.source.device_id());
        self.halt(PollerState::Stopped);
    }

    /// Whether the polling task is running.
    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|t| !t.cancel.is_cancelled() && !t.handle.is_finished())
    }

    /// Register a synchronous listener for this poller's events.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TelemetryEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Receive this poller's events asynchronously.
    pub fn events(&self) -> EventReceiver {
        self.inner.dispatcher.subscribe()
    }

    pub fn device_id(&self) -> &str {
        self.inner.source.device_id()
    }

    pub fn device_name(&self) -> &str {
        self.inner.source.device_name()
    }

    pub fn config(&self) -> PollerConfig {
        self.inner.lock().config.clone()
    }

    pub fn state(&self) -> PollerState {
        self.inner.lock().state
    }

    /// Most recent reading.
    pub fn latest(&self) -> Option<TelemetryReading> {
        self.inner.lock().history.latest().copied()
    }

    /// History, newest first.
    pub fn history(&self) -> Vec<TelemetryReading> {
        self.inner.lock().history.to_vec()
    }

    /// Statistics over the current history.
    pub fn stats(&self) -> TelemetryStats {
        self.inner.lock().stats
    }

    /// The last failure, cleared by the next success.
    pub fn last_error(&self) -> Option<PollError> {
        self.inner.lock().last_error.clone()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        let shared = self.inner.lock();
        PollerSnapshot {
            device_id: self.inner.source.device_id().to_string(),
            state: shared.state,
            latest: shared.history.latest().copied(),
            history: shared.history.to_vec(),
            stats: shared.stats,
            last_error: shared.last_error.clone(),
            last_updated: shared.last_updated,
            consecutive_failures: shared.consecutive_failures,
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.task().take() {
            task.cancel.cancel();
        }
    }
}

impl PollerInner {
    fn lock(&self) -> MutexGuard<'_, PollerShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TelemetryEvent) {
        self.listeners.notify(&event);
        self.dispatcher.send(event);
    }

    fn set_state(&self, state: PollerState) {
        let changed = std::mem::replace(&mut self.lock().state, state) != state;
        if changed {
            self.emit(TelemetryEvent::StateChanged {
                device_id: self.source.device_id().to_string(),
                state,
            });
        }
    }

    /// Move to `Fetching` unless `token` was cancelled in the meantime.
    fn begin_fetch(&self, token: &CancellationToken) {
        let changed = {
            let mut shared = self.lock();
            if token.is_cancelled() {
                return;
            }
            std::mem::replace(&mut shared.state, PollerState::Fetching) != PollerState::Fetching
        };
        if changed {
            self.emit(TelemetryEvent::StateChanged {
                device_id: self.source.device_id().to_string(),
                state: PollerState::Fetching,
            });
        }
    }

    fn backfill(&self, older: Vec<TelemetryReading>, token: &CancellationToken) {
        let mut shared = self.lock();
        if token.is_cancelled() || older.is_empty() {
            return;
        }
        let count = older.len();
        shared.history.extend_older(older);
        let options = shared.config.stats_options();
        shared.stats = calculate_stats(shared.history.iter(), options);
        debug!("Back-filled {} readings", count);
    }

    /// Apply a fetch outcome. Returns without side effects if `token` fired.
    fn complete(&self, result: Result<TelemetryReading>, token: &CancellationToken) {
        let device_id = self.source.device_id().to_string();

        let outcome = {
            let mut shared = self.lock();
            if token.is_cancelled() {
                return;
            }
            let outcome = match result {
                Ok(reading) => {
                    shared.history.push(reading);
                    let options = shared.config.stats_options();
                    shared.stats = calculate_stats(shared.history.iter(), options);
                    shared.last_error = None;
                    shared.last_updated = Some(OffsetDateTime::now_utc());
                    shared.consecutive_failures = 0;
                    Ok(reading)
                }
                Err(Error::Cancelled) => return,
                Err(e) => {
                    shared.consecutive_failures += 1;
                    shared.last_error = Some(PollError::from_error(&e));
                    Err((e, shared.consecutive_failures))
                }
            };
            shared.state = PollerState::Idle;
            outcome
        };

        match outcome {
            Ok(reading) => {
                debug!("Reading from {}: {:.1}°C", device_id, reading.temperature_c);
                if let Some(on_data) = &self.on_data {
                    on_data(&reading);
                }
                self.emit(TelemetryEvent::Reading {
                    device_id: device_id.clone(),
                    reading,
                });
            }
            Err((e, failures)) => {
                if failures >= ESCALATE_AFTER_FAILURES {
                    error!(
                        "Poll of {} failed ({} consecutive failures): {}",
                        device_id, failures, e
                    );
                } else {
                    warn!("Poll of {} failed: {}", device_id, e);
                }
                if let Some(on_error) = &self.on_error {
                    on_error(&e);
                }
                self.emit(TelemetryEvent::Error {
                    device_id: device_id.clone(),
                    error: e.to_string(),
                    guidance: e.guidance().to_string(),
                });
            }
        }
        self.emit(TelemetryEvent::StateChanged {
            device_id,
            state: PollerState::Idle,
        });
    }
}

type FetchFuture = Pin<Box<dyn Future<Output = Result<TelemetryReading>> + Send>>;

async fn run(inner: Arc<PollerInner>, cancel: CancellationToken, config: PollerConfig) {
    if let Some(range) = config.backfill {
        let empty = inner.lock().history.is_empty();
        if empty {
            let older = inner.source.fetch_history(range, &cancel).await;
            inner.backfill(older, &cancel);
        }
    }

    let mut ticker = interval(config.effective_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut in_flight: Option<(FetchFuture, CancellationToken)> = None;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Poller for {} cancelled", inner.source.device_id());
                break;
            }
            result = async {
                match in_flight.as_mut() {
                    Some((fetch, _)) => fetch.await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some((_, token)) = in_flight.take() {
                    inner.complete(result, &token);
                }
            }
            _ = ticker.tick() => {
                if let Some((_, token)) = in_flight.take() {
                    debug!("Cancelling outstanding fetch for {}", inner.source.device_id());
                    token.cancel();
                }

                let token = cancel.child_token();
                let source = Arc::clone(&inner.source);
                let fetch_token = token.clone();
                let fetch: FetchFuture = Box::pin(async move { source.fetch(&fetch_token).await });
                inner.begin_fetch(&token);
                in_flight = Some((fetch, token));
            }
        }
    }
}
