//! Wiring of one telemetry source to the stores.
//!
//! A [`Monitor`] owns a [`Poller`] and routes its results:
//! each reading goes to the [`RealtimeStore`] and through the
//! [`AlertEvaluator`] into the [`AlertStore`]; failures mark the link as
//! disconnected and raise a connection-lost alert. The source's entry in a
//! [`DeviceStore`] follows the same readings and link changes. Everything is
//! also broadcast on one [`EventDispatcher`].

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::alerts::{AlertEvaluator, AlertStore};
use crate::client::TelemetryClient;
use crate::devices::{DeviceEntry, DeviceStore};
use crate::error::Result;
use crate::events::{EventDispatcher, EventReceiver, Subscription, TelemetryEvent};
use crate::health::{ConnectionHealth, HealthOptions};
use crate::mock::MockSource;
use crate::poller::{Poller, PollerConfig};
use crate::realtime::{ConnectionQuality, RealtimeChange, RealtimeStore};
use crate::settings::Settings;
use crate::thresholds::AlertThresholds;
use crate::traits::TelemetrySource;

/// A polled source together with its realtime and alert stores.
pub struct Monitor {
    poller: Poller,
    alerts: Arc<AlertStore>,
    realtime: Arc<RealtimeStore>,
    devices: Arc<DeviceStore>,
    thresholds: Arc<Mutex<AlertThresholds>>,
    dispatcher: EventDispatcher,
    health_cancel: CancellationToken,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        config: PollerConfig,
        thresholds: AlertThresholds,
    ) -> Self {
        Self::with_devices(source, config, thresholds, Arc::new(DeviceStore::new()))
    }

    /// Like [`Monitor::new`], registering the source in a shared device store.
    pub fn with_devices(
        source: Arc<dyn TelemetrySource>,
        config: PollerConfig,
        thresholds: AlertThresholds,
        devices: Arc<DeviceStore>,
    ) -> Self {
        let alerts = Arc::new(AlertStore::new());
        let realtime = Arc::new(RealtimeStore::new());
        let thresholds = Arc::new(Mutex::new(thresholds));
        let dispatcher = EventDispatcher::default();
        let evaluator = AlertEvaluator::new();

        let device_id = source.device_id().to_string();
        let device_name = source.device_name().to_string();
        devices.add(DeviceEntry::new(device_id.clone(), device_name.clone()));

        let on_data = {
            let alerts = Arc::clone(&alerts);
            let realtime = Arc::clone(&realtime);
            let devices = Arc::clone(&devices);
            let thresholds = Arc::clone(&thresholds);
            let dispatcher = dispatcher.clone();
            let evaluator = evaluator.clone();
            let device_id = device_id.clone();
            let device_name = device_name.clone();
            move |reading: &soildash_types::TelemetryReading| {
                if !realtime.connection_quality().is_connected() {
                    realtime.set_connection(ConnectionQuality::Good);
                }
                realtime.add_reading(*reading);
                devices.record_reading(&device_id, *reading);

                let current = *thresholds.lock().unwrap_or_else(PoisonError::into_inner);
                for alert in evaluator.evaluate(&device_id, &device_name, reading, &current, &alerts) {
                    dispatcher.send(TelemetryEvent::Alert { alert });
                }
            }
        };

        let on_error = {
            let alerts = Arc::clone(&alerts);
            let realtime = Arc::clone(&realtime);
            let dispatcher = dispatcher.clone();
            let device_id = device_id.clone();
            let device_name = device_name.clone();
            move |error: &crate::error::Error| {
                realtime.set_connection(ConnectionQuality::Disconnected);
                if let Some(alert) =
                    evaluator.connection_lost(&device_id, &device_name, &error.to_string(), &alerts)
                {
                    dispatcher.send(TelemetryEvent::Alert { alert });
                }
            }
        };

        let poller = Poller::builder(source)
            .config(config)
            .dispatcher(dispatcher.clone())
            .on_data(on_data)
            .on_error(on_error)
            .build();

        let connection_events = {
            let dispatcher = dispatcher.clone();
            let devices = Arc::clone(&devices);
            realtime.subscribe(move |change| {
                if let RealtimeChange::Connection { quality, .. } = change {
                    devices.set_quality(&device_id, *quality);
                    dispatcher.send(TelemetryEvent::ConnectionChanged {
                        device_id: device_id.clone(),
                        quality: *quality,
                    });
                }
            })
        };

        Self {
            poller,
            alerts,
            realtime,
            devices,
            thresholds,
            dispatcher,
            health_cancel: CancellationToken::new(),
            _subscriptions: vec![connection_events],
        }
    }

    /// Build a monitor from user settings: the mock source in demo mode,
    /// otherwise an HTTP client for the configured endpoint.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let source: Arc<dyn TelemetrySource> = if settings.demo_mode {
            Arc::new(MockSource::default())
        } else {
            Arc::new(TelemetryClient::new(settings.endpoint())?)
        };
        let config = PollerConfig::new().interval(settings.polling_interval());
        info!("Monitoring {}", source.device_id());
        Ok(Self::new(source, config, settings.thresholds))
    }

    pub fn start(&self) {
        self.poller.start();
    }

    pub fn disable(&self) {
        self.poller.disable();
    }

    pub fn enable(&self) {
        self.poller.enable();
    }

    /// Stop polling and any health checks.
    pub fn stop(&self) {
        self.health_cancel.cancel();
        self.poller.stop();
        self.realtime.set_connection(ConnectionQuality::Disconnected);
    }

    /// Probe `client` periodically and mirror its quality into the realtime store.
    pub fn spawn_health(&mut self, client: TelemetryClient, options: HealthOptions) -> JoinHandle<()> {
        let health = ConnectionHealth::shared(options);
        let realtime = Arc::clone(&self.realtime);
        let sub = health.subscribe(move |quality| realtime.set_connection(*quality));
        self._subscriptions.push(sub);
        health.spawn(client, self.health_cancel.child_token())
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    pub fn realtime(&self) -> &Arc<RealtimeStore> {
        &self.realtime
    }

    pub fn devices(&self) -> &Arc<DeviceStore> {
        &self.devices
    }

    pub fn thresholds(&self) -> AlertThresholds {
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace thresholds; applies from the next reading.
    pub fn set_thresholds(&self, thresholds: AlertThresholds) {
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner) = thresholds;
    }

    /// Receive all events of this monitor.
    pub fn events(&self) -> EventReceiver {
        self.dispatcher.subscribe()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.health_cancel.cancel();
    }
}
