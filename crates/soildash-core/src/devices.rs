//! Registry of known devices.
//!
//! A [`DeviceStore`] keeps one [`DeviceEntry`] per device id, in the order
//! devices were added, together with an optional selection. The first device
//! added is selected automatically; removing the selected device moves the
//! selection to the first remaining one.
//!
//! Several [`Monitor`](crate::Monitor)s can share one store, each keeping its
//! own entry's quality and last reading current.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use soildash_types::TelemetryReading;

use crate::events::{Listeners, Subscription};
use crate::realtime::ConnectionQuality;

/// What the store knows about one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub id: String,
    pub name: String,
    /// Host or base URL the device is reached at, when known.
    pub address: Option<String>,
    pub quality: ConnectionQuality,
    pub last_reading: Option<TelemetryReading>,
    /// When a reading last arrived.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

impl DeviceEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            quality: ConnectionQuality::Disconnected,
            last_reading: None,
            last_seen: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn is_online(&self) -> bool {
        self.quality.is_connected()
    }
}

/// What changed in a [`DeviceStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    Added(String),
    Updated(String),
    Removed(String),
    Selected(Option<String>),
}

#[derive(Debug, Default)]
struct DeviceState {
    devices: Vec<DeviceEntry>,
    selected: Option<String>,
}

impl DeviceState {
    fn find_mut(&mut self, id: &str) -> Option<&mut DeviceEntry> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// Point the selection at the first device if it no longer names one.
    fn repair_selection(&mut self) -> bool {
        let valid = self
            .selected
            .as_deref()
            .is_some_and(|id| self.devices.iter().any(|d| d.id == id));
        if valid {
            return false;
        }
        let next = self.devices.first().map(|d| d.id.clone());
        std::mem::replace(&mut self.selected, next.clone()) != next
    }
}

/// Store of all devices the dashboard knows about.
#[derive(Debug, Default)]
pub struct DeviceStore {
    state: Mutex<DeviceState>,
    listeners: Listeners<DeviceChange>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_all(&self, changes: Vec<DeviceChange>) {
        for change in &changes {
            self.listeners.notify(change);
        }
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DeviceChange) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Add a device. Returns `false` if the id is already known, leaving the
    /// existing entry untouched.
    pub fn add(&self, entry: DeviceEntry) -> bool {
        let mut changes = Vec::new();
        {
            let mut state = self.lock();
            if state.devices.iter().any(|d| d.id == entry.id) {
                debug!("Device {} already registered", entry.id);
                return false;
            }
            let id = entry.id.clone();
            state.devices.push(entry);
            changes.push(DeviceChange::Added(id));
            if state.repair_selection() {
                changes.push(DeviceChange::Selected(state.selected.clone()));
            }
        }
        self.notify_all(changes);
        true
    }

    /// Apply `f` to the entry for `id`. Returns `false` for an unknown id.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut DeviceEntry),
    {
        {
            let mut state = self.lock();
            let Some(entry) = state.find_mut(id) else {
                return false;
            };
            f(entry);
            // The id is the key; keep it stable whatever `f` did.
            entry.id = id.to_string();
        }
        self.listeners.notify(&DeviceChange::Updated(id.to_string()));
        true
    }

    /// Apply `f` to every listed device that exists. Returns how many were updated.
    pub fn update_many<F>(&self, ids: &[&str], f: F) -> usize
    where
        F: Fn(&mut DeviceEntry),
    {
        let mut changes = Vec::new();
        {
            let mut state = self.lock();
            for id in ids {
                if let Some(entry) = state.find_mut(id) {
                    f(entry);
                    entry.id = (*id).to_string();
                    changes.push(DeviceChange::Updated((*id).to_string()));
                }
            }
        }
        let updated = changes.len();
        self.notify_all(changes);
        updated
    }

    /// Remove a device, moving the selection if it pointed at it.
    pub fn remove(&self, id: &str) -> Option<DeviceEntry> {
        let mut changes = Vec::new();
        let removed = {
            let mut state = self.lock();
            let index = state.devices.iter().position(|d| d.id == id)?;
            let removed = state.devices.remove(index);
            changes.push(DeviceChange::Removed(removed.id.clone()));
            if state.repair_selection() {
                changes.push(DeviceChange::Selected(state.selected.clone()));
            }
            removed
        };
        self.notify_all(changes);
        Some(removed)
    }

    /// Remove every listed device. Returns how many were removed.
    pub fn remove_many(&self, ids: &[&str]) -> usize {
        let mut changes = Vec::new();
        {
            let mut state = self.lock();
            state.devices.retain(|d| {
                let keep = !ids.contains(&d.id.as_str());
                if !keep {
                    changes.push(DeviceChange::Removed(d.id.clone()));
                }
                keep
            });
            if state.repair_selection() {
                changes.push(DeviceChange::Selected(state.selected.clone()));
            }
        }
        let removed = changes
            .iter()
            .filter(|c| matches!(c, DeviceChange::Removed(_)))
            .count();
        self.notify_all(changes);
        removed
    }

    /// Select a device, or clear the selection with `None`.
    /// Returns `false` (and keeps the selection) for an unknown id.
    pub fn select(&self, id: Option<&str>) -> bool {
        let changed = {
            let mut state = self.lock();
            if let Some(id) = id
                && !state.devices.iter().any(|d| d.id == id)
            {
                return false;
            }
            let next = id.map(str::to_string);
            std::mem::replace(&mut state.selected, next.clone()) != next
        };
        if changed {
            self.listeners
                .notify(&DeviceChange::Selected(id.map(str::to_string)));
        }
        true
    }

    /// Record a reading: stores it, stamps `last_seen` and marks a
    /// disconnected device as connected.
    pub fn record_reading(&self, id: &str, reading: TelemetryReading) -> bool {
        self.update(id, |entry| {
            entry.last_reading = Some(reading);
            entry.last_seen = Some(OffsetDateTime::now_utc());
            if !entry.quality.is_connected() {
                entry.quality = ConnectionQuality::Good;
            }
        })
    }

    /// Set link quality. No change is announced if the quality is unchanged.
    pub fn set_quality(&self, id: &str, quality: ConnectionQuality) -> bool {
        {
            let mut state = self.lock();
            let Some(entry) = state.find_mut(id) else {
                return false;
            };
            if entry.quality == quality {
                return true;
            }
            entry.quality = quality;
        }
        self.listeners.notify(&DeviceChange::Updated(id.to_string()));
        true
    }

    pub fn get(&self, id: &str) -> Option<DeviceEntry> {
        self.lock().devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    pub fn selected(&self) -> Option<DeviceEntry> {
        let state = self.lock();
        let id = state.selected.as_deref()?;
        state.devices.iter().find(|d| d.id == id).cloned()
    }

    /// All devices in insertion order.
    pub fn devices(&self) -> Vec<DeviceEntry> {
        self.lock().devices.clone()
    }

    pub fn online(&self) -> Vec<DeviceEntry> {
        self.filtered(DeviceEntry::is_online)
    }

    pub fn offline(&self) -> Vec<DeviceEntry> {
        self.filtered(|d| !d.is_online())
    }

    fn filtered(&self, keep: impl Fn(&DeviceEntry) -> bool) -> Vec<DeviceEntry> {
        self.lock().devices.iter().filter(|d| keep(d)).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soildash_types::DeviceStatus;
    use std::sync::Arc;

    fn reading(temp: f64) -> TelemetryReading {
        TelemetryReading::new(temp, 50.0, 50.0, DeviceStatus::Safe, OffsetDateTime::UNIX_EPOCH)
    }

    fn store_with(ids: &[&str]) -> DeviceStore {
        let store = DeviceStore::new();
        for id in ids {
            store.add(DeviceEntry::new(*id, format!("Sensor {}", id)));
        }
        store
    }

    #[test]
    fn test_first_device_is_selected() {
        let store = DeviceStore::new();
        assert!(store.selected().is_none());

        assert!(store.add(DeviceEntry::new("a", "Greenhouse").with_address("10.0.0.2")));
        assert!(store.add(DeviceEntry::new("b", "Garden")));
        assert_eq!(store.selected_id().as_deref(), Some("a"));
        assert_eq!(store.selected().unwrap().address.as_deref(), Some("10.0.0.2"));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_add_keeps_existing_entry() {
        let store = store_with(&["a"]);
        assert!(!store.add(DeviceEntry::new("a", "Other")));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().name, "Sensor a");
    }

    #[test]
    fn test_select() {
        let store = store_with(&["a", "b"]);
        assert!(store.select(Some("b")));
        assert_eq!(store.selected().unwrap().id, "b");

        assert!(!store.select(Some("missing")));
        assert_eq!(store.selected_id().as_deref(), Some("b"));

        assert!(store.select(None));
        assert!(store.selected().is_none());
    }

    #[test]
    fn test_remove_selected_moves_selection() {
        let store = store_with(&["a", "b", "c"]);
        store.select(Some("b"));

        let removed = store.remove("b").unwrap();
        assert_eq!(removed.id, "b");
        assert_eq!(store.selected_id().as_deref(), Some("a"));

        // Removing an unselected device leaves the selection alone.
        store.remove("c");
        assert_eq!(store.selected_id().as_deref(), Some("a"));

        store.remove("a");
        assert!(store.is_empty());
        assert!(store.selected_id().is_none());
        assert!(store.remove("a").is_none());
    }

    #[test]
    fn test_status_updates() {
        let store = store_with(&["a"]);
        let entry = store.get("a").unwrap();
        assert_eq!(entry.quality, ConnectionQuality::Disconnected);
        assert!(entry.last_seen.is_none());

        assert!(store.record_reading("a", reading(21.5)));
        let entry = store.get("a").unwrap();
        assert_eq!(entry.quality, ConnectionQuality::Good);
        assert_eq!(entry.last_reading.unwrap().temperature_c, 21.5);
        assert!(entry.last_seen.is_some());

        assert!(store.set_quality("a", ConnectionQuality::Excellent));
        store.record_reading("a", reading(22.0));
        assert_eq!(store.get("a").unwrap().quality, ConnectionQuality::Excellent);

        assert!(!store.record_reading("missing", reading(1.0)));
        assert!(!store.set_quality("missing", ConnectionQuality::Poor));
    }

    #[test]
    fn test_online_and_offline_views() {
        let store = store_with(&["a", "b", "c"]);
        store.set_quality("a", ConnectionQuality::Fair);
        store.record_reading("c", reading(20.0));

        let online: Vec<_> = store.online().into_iter().map(|d| d.id).collect();
        let offline: Vec<_> = store.offline().into_iter().map(|d| d.id).collect();
        assert_eq!(online, ["a", "c"]);
        assert_eq!(offline, ["b"]);
    }

    #[test]
    fn test_bulk_operations() {
        let store = store_with(&["a", "b", "c", "d"]);
        let renamed = store.update_many(&["a", "c", "missing"], |d| d.name.push_str(" (north)"));
        assert_eq!(renamed, 2);
        assert_eq!(store.get("c").unwrap().name, "Sensor c (north)");
        assert_eq!(store.get("b").unwrap().name, "Sensor b");

        assert_eq!(store.remove_many(&["a", "b", "missing"]), 2);
        let ids: Vec<_> = store.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["c", "d"]);
        assert_eq!(store.selected_id().as_deref(), Some("c"));
    }

    #[test]
    fn test_update_cannot_change_id() {
        let store = store_with(&["a"]);
        assert!(store.update("a", |d| d.id = "z".to_string()));
        assert!(store.get("a").is_some());
        assert!(store.get("z").is_none());
    }

    #[test]
    fn test_listeners_see_changes() {
        let store = DeviceStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = store.subscribe(move |change| s.lock().unwrap().push(change.clone()));

        store.add(DeviceEntry::new("a", "A"));
        store.set_quality("a", ConnectionQuality::Good);
        store.set_quality("a", ConnectionQuality::Good);
        store.remove("a");

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                DeviceChange::Added("a".into()),
                DeviceChange::Selected(Some("a".into())),
                DeviceChange::Updated("a".into()),
                DeviceChange::Removed("a".into()),
                DeviceChange::Selected(None),
            ]
        );
    }
}
