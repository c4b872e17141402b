//! Alert evaluation and the alert store.
//!
//! [`AlertEvaluator`] turns readings into alerts: each metric outside its
//! threshold band raises a [`AlertSeverity::Warning`] and a device-reported
//! `DANGER` status raises a [`AlertSeverity::Critical`].
//!
//! # De-duplication
//!
//! At most one *open* alert exists per `(device, kind)`. An alert is open
//! while it is neither read nor dismissed. While one is open, a persisting
//! condition raises nothing new; once the user reads or dismisses it, the
//! condition is re-armed and the next breaching reading raises a fresh alert.
//! `TemperatureHigh` and `TemperatureLow` are distinct kinds.
//!
//! [`AlertStore`] holds alerts newest first, capped at [`MAX_ALERTS`], plus a
//! timeline of notable events capped at [`MAX_TIMELINE_EVENTS`]. All methods
//! take `&self`; listeners registered with [`AlertStore::subscribe`] are
//! called synchronously after each committed change.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use soildash_types::{Metric, TelemetryReading};

use crate::events::{Listeners, Subscription};
use crate::format::format_metric;
use crate::thresholds::{AlertThresholds, BreachKind};

/// Maximum number of alerts retained.
pub const MAX_ALERTS: usize = 500;

/// Maximum number of timeline events retained.
pub const MAX_TIMELINE_EVENTS: usize = 500;

/// Default limit for [`AlertStore::recent`].
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl AlertSeverity {
    /// Icon shown next to the alert.
    pub fn icon(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "🔴",
            AlertSeverity::Warning => "⚠️",
            AlertSeverity::Info => "ℹ️",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        })
    }
}

/// What condition raised an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AlertKind {
    TemperatureHigh,
    TemperatureLow,
    HumidityHigh,
    HumidityLow,
    SoilDry,
    SoilWet,
    /// The device reported `DANGER`.
    AnomalyDetected,
    /// Fetching failed after all retries.
    ConnectionLost,
    Custom,
}

impl AlertKind {
    /// Kind for a metric crossing one side of its band.
    pub fn for_breach(metric: Metric, kind: BreachKind) -> Self {
        match (metric, kind) {
            (Metric::Temperature, BreachKind::Above) => AlertKind::TemperatureHigh,
            (Metric::Temperature, BreachKind::Below) => AlertKind::TemperatureLow,
            (Metric::Humidity, BreachKind::Above) => AlertKind::HumidityHigh,
            (Metric::Humidity, BreachKind::Below) => AlertKind::HumidityLow,
            (Metric::SoilMoisture, BreachKind::Above) => AlertKind::SoilWet,
            (Metric::SoilMoisture, BreachKind::Below) => AlertKind::SoilDry,
        }
    }

    /// Short human title.
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::TemperatureHigh => "High temperature",
            AlertKind::TemperatureLow => "Low temperature",
            AlertKind::HumidityHigh => "High humidity",
            AlertKind::HumidityLow => "Low humidity",
            AlertKind::SoilDry => "Soil too dry",
            AlertKind::SoilWet => "Soil too wet",
            AlertKind::AnomalyDetected => "Device reports danger",
            AlertKind::ConnectionLost => "Connection lost",
            AlertKind::Custom => "Alert",
        }
    }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub is_read: bool,
    pub is_dismissed: bool,
    pub is_silenced: bool,
}

impl Alert {
    /// Neither read nor dismissed.
    pub fn is_open(&self) -> bool {
        !self.is_read && !self.is_dismissed
    }
}

/// Everything needed to raise an alert; the store fills in id, timestamp and
/// lifecycle flags.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub device_id: String,
    pub device_name: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
}

/// Category of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Alert,
    StatusChange,
    DataReceived,
    Connection,
    UserAction,
}

/// One entry of the event timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    #[serde(rename = "type")]
    pub kind: TimelineKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub icon: String,
}

/// A timeline entry before the store stamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTimelineEvent {
    pub device_id: String,
    pub device_name: String,
    pub kind: TimelineKind,
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
}

/// Inclusive time window for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl DateRange {
    /// Whether `at` falls inside the window.
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Criteria for [`AlertStore::filtered`]. Empty / `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFilter {
    pub severity: Vec<AlertSeverity>,
    pub device_id: Option<String>,
    pub is_read: Option<bool>,
    pub date_range: Option<DateRange>,
}

impl AlertFilter {
    /// Whether `alert` passes the filter. Dismissed alerts never do.
    pub fn matches(&self, alert: &Alert) -> bool {
        if !self.severity.is_empty() && !self.severity.contains(&alert.severity) {
            return false;
        }
        if let Some(device_id) = &self.device_id
            && &alert.device_id != device_id
        {
            return false;
        }
        if let Some(is_read) = self.is_read
            && alert.is_read != is_read
        {
            return false;
        }
        if let Some(range) = &self.date_range
            && !range.contains(alert.timestamp)
        {
            return false;
        }
        !alert.is_dismissed
    }
}

/// What changed in an [`AlertStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum AlertChange {
    Added(Alert),
    Updated { id: String },
    Removed { id: String },
    AllRead,
    Cleared,
    FilterChanged,
    TimelineChanged,
}

#[derive(Debug, Default)]
struct AlertState {
    alerts: VecDeque<Alert>,
    timeline: VecDeque<TimelineEvent>,
    filter: AlertFilter,
}

impl AlertState {
    fn has_open(&self, device_id: &str, kind: AlertKind) -> bool {
        self.alerts
            .iter()
            .any(|a| a.device_id == device_id && a.kind == kind && a.is_open())
    }
}

/// Newest-first alert list with read/dismiss/silence lifecycle.
#[derive(Debug, Default)]
pub struct AlertStore {
    state: Mutex<AlertState>,
    listeners: Listeners<AlertChange>,
}

impl AlertStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AlertState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AlertChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Raise an alert. It is prepended, recorded on the timeline and the
    /// oldest alert is dropped beyond [`MAX_ALERTS`].
    pub fn add(&self, new: NewAlert) -> Alert {
        let alert = {
            let mut state = self.lock();
            Self::insert(&mut state, new)
        };
        self.announce(&alert);
        alert
    }

    /// Like [`AlertStore::add`], unless an open alert of the same kind already
    /// exists for the device. Check and insert happen under one lock.
    pub fn add_unless_open(&self, new: NewAlert) -> Option<Alert> {
        let alert = {
            let mut state = self.lock();
            if state.has_open(&new.device_id, new.kind) {
                debug!(
                    "Suppressing {:?} for {}: an open alert exists",
                    new.kind, new.device_id
                );
                return None;
            }
            Self::insert(&mut state, new)
        };
        self.announce(&alert);
        Some(alert)
    }

    fn insert(state: &mut AlertState, new: NewAlert) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            device_id: new.device_id,
            device_name: new.device_name,
            kind: new.kind,
            severity: new.severity,
            title: new.title,
            message: new.message,
            value: new.value,
            threshold: new.threshold,
            timestamp: OffsetDateTime::now_utc(),
            is_read: false,
            is_dismissed: false,
            is_silenced: false,
        };

        state.alerts.push_front(alert.clone());
        state.alerts.truncate(MAX_ALERTS);

        state.timeline.push_front(TimelineEvent {
            id: Uuid::new_v4().to_string(),
            device_id: alert.device_id.clone(),
            device_name: alert.device_name.clone(),
            kind: TimelineKind::Alert,
            title: alert.title.clone(),
            description: Some(alert.message.clone()),
            timestamp: alert.timestamp,
            icon: alert.severity.icon().to_string(),
        });
        state.timeline.truncate(MAX_TIMELINE_EVENTS);
        alert
    }

    fn announce(&self, alert: &Alert) {
        info!(
            "{} alert for {}: {}",
            alert.severity, alert.device_id, alert.message
        );
        self.listeners.notify(&AlertChange::Added(alert.clone()));
    }

    fn update<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Alert) -> bool,
    {
        let changed = {
            let mut state = self.lock();
            state
                .alerts
                .iter_mut()
                .find(|a| a.id == id)
                .is_some_and(apply)
        };
        if changed {
            self.listeners
                .notify(&AlertChange::Updated { id: id.to_string() });
        }
        changed
    }

    /// Mark one alert read. Returns whether anything changed.
    pub fn mark_as_read(&self, id: &str) -> bool {
        self.update(id, |a| !std::mem::replace(&mut a.is_read, true))
    }

    /// Mark every alert read.
    pub fn mark_all_as_read(&self) {
        {
            let mut state = self.lock();
            for alert in state.alerts.iter_mut() {
                alert.is_read = true;
            }
        }
        self.listeners.notify(&AlertChange::AllRead);
    }

    /// Hide an alert from the default views.
    pub fn dismiss(&self, id: &str) -> bool {
        self.update(id, |a| !std::mem::replace(&mut a.is_dismissed, true))
    }

    /// Mute an alert's notifications.
    pub fn silence(&self, id: &str) -> bool {
        self.update(id, |a| !std::mem::replace(&mut a.is_silenced, true))
    }

    /// Remove one alert entirely.
    pub fn clear(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.alerts.len();
            state.alerts.retain(|a| a.id != id);
            state.alerts.len() != before
        };
        if removed {
            self.listeners
                .notify(&AlertChange::Removed { id: id.to_string() });
        }
        removed
    }

    /// Remove all alerts. The timeline is kept.
    pub fn clear_all(&self) {
        self.lock().alerts.clear();
        self.listeners.notify(&AlertChange::Cleared);
    }

    /// Replace the active filter.
    pub fn set_filter(&self, filter: AlertFilter) {
        self.lock().filter = filter;
        self.listeners.notify(&AlertChange::FilterChanged);
    }

    /// The active filter.
    pub fn filter(&self) -> AlertFilter {
        self.lock().filter.clone()
    }

    /// Alerts passing the active filter, newest first.
    pub fn filtered(&self) -> Vec<Alert> {
        let state = self.lock();
        state
            .alerts
            .iter()
            .filter(|a| state.filter.matches(a))
            .cloned()
            .collect()
    }

    fn by_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.lock()
            .alerts
            .iter()
            .filter(|a| a.severity == severity && !a.is_dismissed)
            .cloned()
            .collect()
    }

    /// Undismissed critical alerts.
    pub fn critical(&self) -> Vec<Alert> {
        self.by_severity(AlertSeverity::Critical)
    }

    /// Undismissed warnings.
    pub fn warnings(&self) -> Vec<Alert> {
        self.by_severity(AlertSeverity::Warning)
    }

    /// Undismissed informational alerts.
    pub fn infos(&self) -> Vec<Alert> {
        self.by_severity(AlertSeverity::Info)
    }

    /// The `limit` newest undismissed alerts.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        self.lock()
            .alerts
            .iter()
            .filter(|a| !a.is_dismissed)
            .take(limit)
            .cloned()
            .collect()
    }

    /// All alerts, newest first, including dismissed ones.
    pub fn alerts(&self) -> Vec<Alert> {
        self.lock().alerts.iter().cloned().collect()
    }

    /// Number of alerts neither read nor dismissed.
    pub fn unread_count(&self) -> usize {
        self.lock().alerts.iter().filter(|a| a.is_open()).count()
    }

    /// Whether an open alert of `kind` exists for `device_id`.
    pub fn has_open(&self, device_id: &str, kind: AlertKind) -> bool {
        self.lock().has_open(device_id, kind)
    }

    /// Record a non-alert event on the timeline.
    pub fn add_timeline_event(&self, event: NewTimelineEvent) -> TimelineEvent {
        let event = TimelineEvent {
            id: Uuid::new_v4().to_string(),
            device_id: event.device_id,
            device_name: event.device_name,
            kind: event.kind,
            title: event.title,
            description: event.description,
            timestamp: OffsetDateTime::now_utc(),
            icon: event.icon,
        };
        {
            let mut state = self.lock();
            state.timeline.push_front(event.clone());
            state.timeline.truncate(MAX_TIMELINE_EVENTS);
        }
        self.listeners.notify(&AlertChange::TimelineChanged);
        event
    }

    /// The `limit` newest timeline events.
    pub fn timeline(&self, limit: usize) -> Vec<TimelineEvent> {
        self.lock().timeline.iter().take(limit).cloned().collect()
    }

    /// Remove all timeline events.
    pub fn clear_timeline(&self) {
        self.lock().timeline.clear();
        self.listeners.notify(&AlertChange::TimelineChanged);
    }
}

/// Turns readings into alerts, honoring the one-open-alert-per-kind rule.
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator;

impl AlertEvaluator {
    /// Create an evaluator.
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one reading and add any new alerts to `store`.
    ///
    /// Returns the alerts that were raised.
    pub fn evaluate(
        &self,
        device_id: &str,
        device_name: &str,
        reading: &TelemetryReading,
        thresholds: &AlertThresholds,
        store: &AlertStore,
    ) -> Vec<Alert> {
        let mut candidates: Vec<NewAlert> = Vec::new();

        if reading.status.is_danger() {
            candidates.push(NewAlert {
                device_id: device_id.to_string(),
                device_name: device_name.to_string(),
                kind: AlertKind::AnomalyDetected,
                severity: AlertSeverity::Critical,
                title: AlertKind::AnomalyDetected.title().to_string(),
                message: format!("{} reported status DANGER", device_name),
                value: None,
                threshold: None,
            });
        }

        for breach in thresholds.breaches(reading) {
            let kind = AlertKind::for_breach(breach.metric, breach.kind);
            let side = match breach.kind {
                BreachKind::Above => "above the maximum",
                BreachKind::Below => "below the minimum",
            };
            candidates.push(NewAlert {
                device_id: device_id.to_string(),
                device_name: device_name.to_string(),
                kind,
                severity: AlertSeverity::Warning,
                title: kind.title().to_string(),
                message: format!(
                    "{} {} is {} of {}",
                    breach.metric,
                    format_metric(breach.metric, breach.value),
                    side,
                    format_metric(breach.metric, breach.threshold),
                ),
                value: Some(breach.value),
                threshold: Some(breach.threshold),
            });
        }

        self.raise(candidates, store)
    }

    /// Raise a connection-lost warning after a failed fetch.
    pub fn connection_lost(
        &self,
        device_id: &str,
        device_name: &str,
        error: &str,
        store: &AlertStore,
    ) -> Option<Alert> {
        let candidate = NewAlert {
            device_id: device_id.to_string(),
            device_name: device_name.to_string(),
            kind: AlertKind::ConnectionLost,
            severity: AlertSeverity::Warning,
            title: AlertKind::ConnectionLost.title().to_string(),
            message: format!("Cannot reach {}: {}", device_name, error),
            value: None,
            threshold: None,
        };
        self.raise(vec![candidate], store).pop()
    }

    fn raise(&self, candidates: Vec<NewAlert>, store: &AlertStore) -> Vec<Alert> {
        candidates
            .into_iter()
            .filter_map(|candidate| store.add_unless_open(candidate))
            .collect()
    }
}
