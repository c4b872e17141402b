//! User settings and their persistence.
//!
//! Settings are stored as JSON under the key [`SETTINGS_KEY`] in a
//! [`KeyValueStore`]. Loading merges whatever was stored over
//! [`Settings::default`] key by key, so older or partial files keep working
//! and a single mistyped value only resets that value. The
//! on-disk field names match those written by the web dashboard
//! (`deviceIp`, `pollingInterval`, `useFahrenheit`, ...).
//!
//! [`SettingsManager`] is the single writer. Failures to persist are logged
//! and never propagated from [`SettingsManager::update`] and friends; use
//! [`SettingsManager::save`] when the caller needs to know.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use soildash_types::TelemetryReading;

use crate::client::Endpoint;
use crate::events::{Listeners, Subscription};
use crate::format::TemperatureUnit;
use crate::thresholds::AlertThresholds;

/// Key holding the serialized [`Settings`].
pub const SETTINGS_KEY: &str = "soildash_settings";

/// Key holding persisted history.
pub const HISTORY_KEY: &str = "soildash_history";

/// Default device address (the device's own access point).
pub const DEFAULT_DEVICE_IP: &str = "192.168.4.1";

/// Default proxy base URL.
pub const DEFAULT_PROXY_URL: &str = "http://localhost:3000";

/// Errors from settings persistence.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    /// Reading or writing a settings file failed.
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stored JSON could not be (de)serialized.
    #[error("Invalid settings data: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No platform configuration directory is available.
    #[error("Could not determine a configuration directory")]
    NoConfigDir,

    /// A value is out of range.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Result type for settings operations.
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// Dashboard settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Device host or `host:port`.
    pub device_ip: String,
    /// Polling interval in milliseconds.
    #[serde(rename = "pollingInterval")]
    pub polling_interval_ms: u64,
    /// Display unit, stored as the dashboard's `useFahrenheit` flag.
    #[serde(rename = "useFahrenheit", with = "fahrenheit_flag")]
    pub temperature_unit: TemperatureUnit,
    pub dark_mode: bool,
    pub use_proxy: bool,
    pub proxy_url: String,
    pub demo_mode: bool,
    pub thresholds: AlertThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_ip: DEFAULT_DEVICE_IP.to_string(),
            polling_interval_ms: 5000,
            temperature_unit: TemperatureUnit::Celsius,
            dark_mode: false,
            use_proxy: true,
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            demo_mode: true,
            thresholds: AlertThresholds::default(),
        }
    }
}

impl Settings {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Where to fetch telemetry from, given `use_proxy`.
    pub fn endpoint(&self) -> Endpoint {
        if self.use_proxy {
            Endpoint::proxy(self.proxy_url.clone())
        } else {
            Endpoint::direct(self.device_ip.clone())
        }
    }

    /// Check values a user could have mistyped.
    pub fn validate(&self) -> SettingsResult<()> {
        if self.device_ip.trim().is_empty() {
            return Err(SettingsError::Invalid("device address is empty".to_string()));
        }
        if self.polling_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "polling interval must be greater than zero".to_string(),
            ));
        }
        if self.use_proxy
            && !(self.proxy_url.starts_with("http://") || self.proxy_url.starts_with("https://"))
        {
            return Err(SettingsError::Invalid(format!(
                "proxy URL '{}' must start with http:// or https://",
                self.proxy_url
            )));
        }
        self.thresholds.validate().map_err(SettingsError::Invalid)
    }
}

mod fahrenheit_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::format::TemperatureUnit;

    pub fn serialize<S: Serializer>(unit: &TemperatureUnit, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(*unit == TemperatureUnit::Fahrenheit)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TemperatureUnit, D::Error> {
        Ok(if bool::deserialize(deserializer)? {
            TemperatureUnit::Fahrenheit
        } else {
            TemperatureUnit::Celsius
        })
    }
}

/// String key-value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> SettingsResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> SettingsResult<()>;
    fn remove(&self, key: &str) -> SettingsResult<()>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform configuration directory (`<config>/soildash`).
    pub fn default_location() -> SettingsResult<Self> {
        dirs::config_dir()
            .map(|dir| Self::new(dir.join("soildash")))
            .ok_or(SettingsError::NoConfigDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> SettingsResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SettingsError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        fs::create_dir_all(&self.dir).map_err(|source| SettingsError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        fs::write(&path, value).map_err(|source| SettingsError::Io { path, source })
    }

    fn remove(&self, key: &str) -> SettingsResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SettingsError::Io { path, source }),
        }
    }
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> SettingsResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SettingsResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SettingsResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Shallow merge of stored top-level keys over [`Settings::default`].
///
/// A key whose value does not fit its field is skipped with a warning and the
/// default kept, so one bad entry does not discard the rest.
fn merge_over_defaults(stored: serde_json::Value) -> SettingsResult<Settings> {
    let serde_json::Value::Object(stored) = stored else {
        return Err(SettingsError::Invalid(
            "stored settings are not a JSON object".to_string(),
        ));
    };

    let mut merged = serde_json::to_value(Settings::default())?;
    for (key, value) in stored {
        let mut candidate = merged.clone();
        if let Some(fields) = candidate.as_object_mut() {
            fields.insert(key.clone(), value);
        }
        match Settings::deserialize(&candidate) {
            Ok(_) => merged = candidate,
            Err(e) => warn!("Ignoring stored setting '{}': {}", key, e),
        }
    }
    Ok(serde_json::from_value(merged)?)
}

/// Loads, updates and persists [`Settings`].
pub struct SettingsManager<S: KeyValueStore> {
    store: S,
    settings: Settings,
    listeners: Listeners<Settings>,
}

impl<S: KeyValueStore> std::fmt::Debug for SettingsManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsManager")
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S: KeyValueStore> SettingsManager<S> {
    /// Load settings from `store`, falling back to defaults on any error.
    pub fn load(store: S) -> Self {
        let settings = match Self::read(&store) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No stored settings, using defaults");
                Settings::default()
            }
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        };
        Self {
            store,
            settings,
            listeners: Listeners::new(),
        }
    }

    fn read(store: &S) -> SettingsResult<Option<Settings>> {
        match store.get(SETTINGS_KEY)? {
            Some(json) => Ok(Some(merge_over_defaults(serde_json::from_str(&json)?)?)),
            None => Ok(None),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Called with the new settings after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Persist the current settings.
    pub fn save(&self) -> SettingsResult<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        self.store.set(SETTINGS_KEY, &json)
    }

    fn commit(&mut self) {
        if let Err(e) = self.save() {
            warn!("Failed to save settings: {}", e);
        }
        self.listeners.notify(&self.settings);
    }

    /// Modify settings in place and persist them.
    pub fn update<F>(&mut self, f: F) -> &Settings
    where
        F: FnOnce(&mut Settings),
    {
        f(&mut self.settings);
        self.commit();
        &self.settings
    }

    /// Replace the alert thresholds and persist.
    pub fn update_thresholds(&mut self, thresholds: AlertThresholds) -> &Settings {
        self.update(|s| s.thresholds = thresholds)
    }

    /// Restore defaults and persist them.
    pub fn reset(&mut self) -> &Settings {
        self.update(|s| *s = Settings::default())
    }

    /// Remove stored settings and history; in-memory settings revert to defaults.
    pub fn clear_all(&mut self) {
        for key in [SETTINGS_KEY, HISTORY_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
        self.settings = Settings::default();
        self.listeners.notify(&self.settings);
    }

    /// Persist readings under [`HISTORY_KEY`]. Failures are logged.
    pub fn save_history(&self, readings: &[TelemetryReading]) {
        let result = serde_json::to_string(readings)
            .map_err(SettingsError::from)
            .and_then(|json| self.store.set(HISTORY_KEY, &json));
        if let Err(e) = result {
            warn!("Failed to save history: {}", e);
        }
    }

    /// Load persisted readings; empty on absence or error.
    pub fn load_history(&self) -> Vec<TelemetryReading> {
        let result = self.store.get(HISTORY_KEY).and_then(|json| match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        });
        result.unwrap_or_else(|e| {
            warn!("Failed to load history: {}", e);
            Vec::new()
        })
    }
}
