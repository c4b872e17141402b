//! Change notification for stores and pollers.
//!
//! Two mechanisms are provided:
//!
//! - [`Listeners`]: synchronous observer lists used by the alert and realtime
//!   stores. Listeners run on the mutating thread right after the change is
//!   committed, outside the store's lock.
//! - [`EventDispatcher`]: a tokio broadcast channel of [`TelemetryEvent`]s for
//!   async consumers such as the terminal front-end.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use soildash_types::TelemetryReading;

use crate::alerts::Alert;
use crate::poller::PollerState;
use crate::realtime::ConnectionQuality;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// A list of synchronous listeners for values of type `T`.
pub struct Listeners<T> {
    inner: Arc<Mutex<ListenerSet<T>>>,
}

impl<T: 'static> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ListenerSet {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Listeners<T> {
    /// Create an empty listener list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = set.next_id;
            set.next_id += 1;
            set.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerSet<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade()
                    && let Ok(mut set) = inner.lock()
                {
                    set.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Call every listener with `value`.
    ///
    /// The list is snapshotted first, so listeners may subscribe or
    /// unsubscribe while being notified.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Listener<T>> = {
            let set = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            set.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(value);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .map(|set| set.entries.len())
            .unwrap_or_default()
    }

    /// Whether no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`Listeners::subscribe`].
///
/// Dropping the handle unsubscribes; call [`Subscription::detach`] to keep the
/// listener for the lifetime of the store.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Subscription {
    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the listener registered without holding the handle.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Events broadcast by pollers and the monitor.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum TelemetryEvent {
    /// A new reading was accepted into history.
    Reading {
        device_id: String,
        reading: TelemetryReading,
    },
    /// A fetch failed after all retries.
    Error {
        device_id: String,
        error: String,
        guidance: String,
    },
    /// The poller moved to a new state.
    StateChanged {
        device_id: String,
        state: PollerState,
    },
    /// An alert was raised.
    Alert { alert: Alert },
    /// Connection quality changed.
    ConnectionChanged {
        device_id: String,
        quality: ConnectionQuality,
    },
}

/// Sender for telemetry events.
pub type EventSender = broadcast::Sender<TelemetryEvent>;

/// Receiver for telemetry events.
pub type EventReceiver = broadcast::Receiver<TelemetryEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: TelemetryEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_calls_all_listeners() {
        let listeners: Listeners<u32> = Listeners::new();
        let total = Arc::new(AtomicUsize::new(0));

        let t1 = Arc::clone(&total);
        let _a = listeners.subscribe(move |v| {
            t1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let t2 = Arc::clone(&total);
        let _b = listeners.subscribe(move |v| {
            t2.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });

        listeners.notify(&2);
        assert_eq!(total.load(Ordering::SeqCst), 22);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_unsubscribe_and_drop() {
        let listeners: Listeners<()> = Listeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let sub = listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        listeners.notify(&());
        sub.unsubscribe();
        listeners.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        {
            let _scoped = listeners.subscribe(|_| {});
            assert_eq!(listeners.len(), 1);
        }
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_detach_keeps_listener() {
        let listeners: Listeners<()> = Listeners::new();
        listeners.subscribe(|_| {}).detach();
        assert_eq!(listeners.len(), 1);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_notify() {
        let listeners: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = Arc::clone(&slot);
        let sub = listeners.subscribe(move |_| {
            if let Some(sub) = slot_clone.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        listeners.notify(&());
        assert!(listeners.is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_broadcasts() {
        let dispatcher = EventDispatcher::default();
        let mut rx = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 1);

        dispatcher.send(TelemetryEvent::StateChanged {
            device_id: "demo".to_string(),
            state: PollerState::Fetching,
        });

        match rx.recv().await.unwrap() {
            TelemetryEvent::StateChanged { state, .. } => assert_eq!(state, PollerState::Fetching),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = TelemetryEvent::Error {
            device_id: "192.168.4.1".to_string(),
            error: "HTTP 502".to_string(),
            guidance: "check".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
    }
}
