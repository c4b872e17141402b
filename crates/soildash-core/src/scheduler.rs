//! Cancellable one-shot timers for debouncing and throttling.
//!
//! [`Scheduler::schedule`] runs a closure after a delay, replacing whatever
//! was pending, so repeated calls debounce. [`Throttle`] runs at most once
//! per interval and defers the latest call to the end of the window.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Holds at most one pending delayed call.
#[derive(Debug, Default)]
pub struct Scheduler {
    pending: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` after `delay`, cancelling any call still pending.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().replace(token.clone()) {
            trace!("Replacing pending scheduled call");
            previous.cancel();
        }

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = sleep(delay) => {
                    // Mark done so is_pending turns false before f runs.
                    token.cancel();
                    f();
                }
            }
        });
    }

    /// Drop the pending call, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().take() {
            token.cancel();
        }
    }

    /// Whether a call is waiting to run.
    pub fn is_pending(&self) -> bool {
        self.lock().as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

type Deferred = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ThrottleState {
    /// When `f` last actually ran.
    last_run: Option<Instant>,
    /// Latest call made inside the window, run when the window ends.
    deferred: Option<Deferred>,
}

impl ThrottleState {
    fn take_deferred(&mut self) -> Option<Deferred> {
        let f = self.deferred.take()?;
        self.last_run = Some(Instant::now());
        Some(f)
    }
}

/// Runs at most one call per `interval`; a call inside the window is
/// deferred to the window's end, replacing any earlier deferred call.
///
/// The window is measured from the last call that actually ran, so a steady
/// stream of calls still runs once per interval.
pub struct Throttle {
    interval: Duration,
    state: Arc<Mutex<ThrottleState>>,
    scheduler: Scheduler,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle")
            .field("interval", &self.interval)
            .field("pending", &self.scheduler.is_pending())
            .finish()
    }
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Arc::new(Mutex::new(ThrottleState::default())),
            scheduler: Scheduler::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` now if the window has elapsed, otherwise defer it.
    ///
    /// Returns `true` if `f` ran immediately.
    pub fn call<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let now = Instant::now();
        let mut state = self.lock();
        let wait = state
            .last_run
            .map(|at| self.interval.saturating_sub(now.duration_since(at)))
            .unwrap_or(Duration::ZERO);

        if wait.is_zero() {
            state.last_run = Some(now);
            state.deferred = None;
            drop(state);
            self.scheduler.cancel();
            f();
            return true;
        }

        let already_pending = state.deferred.replace(Box::new(f)).is_some();
        drop(state);
        if !already_pending {
            let shared = Arc::clone(&self.state);
            self.scheduler.schedule(
                move || {
                    let deferred = shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take_deferred();
                    if let Some(f) = deferred {
                        f();
                    }
                },
                wait,
            );
        }
        false
    }

    /// Drop any deferred call.
    pub fn cancel(&self) {
        self.lock().deferred = None;
        self.scheduler.cancel();
    }
}
