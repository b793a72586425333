//! Debounced persistence of canvas changes.
//!
//! The canvas reports a change on nearly every pointer move. [`SaveController`]
//! buffers the latest payload and persists it once the stream of changes has
//! been quiet for the configured delay, or immediately on [`SaveController::flush`]
//! when the user navigates away.

use crate::storage::{BoxFuture, StorageResult};

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Quiet period before a canvas change is persisted.
pub const SCENE_SAVE_DELAY: Duration = Duration::from_millis(1000);

/// Quiet period before a name edit is persisted.
pub const NAME_SAVE_DELAY: Duration = Duration::from_millis(600);

/// Pure debouncer: holds the latest payload and a single deadline.
///
/// Time is passed in by the caller, no clock is read here.
#[derive(Debug)]
pub struct Debouncer<P> {
    delay: Duration,
    pending: Option<P>,
    deadline: Option<Instant>,
}

impl<P> Debouncer<P> {
    /// Create an idle debouncer.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            deadline: None,
        }
    }

    /// Get the quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the buffered payload and restart the delay from `now`.
    pub fn schedule(&mut self, payload: P, now: Instant) {
        self.pending = Some(payload);
        self.deadline = Some(now + self.delay);
    }

    /// Whether a payload is waiting for its deadline.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the payload is due, if one is pending.
    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Take the payload if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<P> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Cancel the deadline and take the payload regardless of time.
    pub fn flush(&mut self) -> Option<P> {
        self.deadline = None;
        self.pending.take()
    }

    /// Drop the payload without delivering it.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending = None;
    }
}

/// Destination of a debounced payload.
pub trait Persist<P> {
    fn persist(&self, payload: P) -> BoxFuture<'_, StorageResult<()>>;
}

/// Debouncer bound to a persistence target, with best-effort error handling.
///
/// Persist failures are logged and dropped. They are never returned to the
/// caller and never retried.
pub struct SaveController<P> {
    label: &'static str,
    debouncer: Debouncer<P>,
    disposed: bool,
}

impl<P> SaveController<P> {
    /// Create a controller. `label` names it in log output.
    pub fn new(label: &'static str, delay: Duration) -> Self {
        Self {
            label,
            debouncer: Debouncer::new(delay),
            disposed: false,
        }
    }

    /// Buffer `payload`, superseding any earlier one.
    pub fn schedule(&mut self, payload: P, now: Instant) {
        if self.disposed {
            log::debug!("{}: ignoring change after teardown", self.label);
            return;
        }
        self.debouncer.schedule(payload, now);
    }

    /// Whether a change is buffered and not yet persisted.
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Whether [`SaveController::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.debouncer.time_until_due(now)
    }

    /// Persist the buffered payload if its delay has elapsed.
    /// Returns true if the target was invoked.
    pub async fn tick<T: Persist<P> + ?Sized>(&mut self, target: &T, now: Instant) -> bool {
        if self.disposed {
            return false;
        }
        match self.debouncer.take_due(now) {
            Some(payload) => {
                self.run(target, payload).await;
                true
            }
            None => false,
        }
    }

    /// Persist the buffered payload now. A no-op when nothing is buffered.
    /// Returns true if the target was invoked.
    pub async fn flush<T: Persist<P> + ?Sized>(&mut self, target: &T) -> bool {
        if self.disposed {
            return false;
        }
        match self.debouncer.flush() {
            Some(payload) => {
                self.run(target, payload).await;
                true
            }
            None => false,
        }
    }

    /// Tear down: cancel the pending deadline and refuse further work.
    pub fn dispose(&mut self) {
        if self.debouncer.is_pending() {
            log::debug!("{}: dropping unsaved change on teardown", self.label);
        }
        self.debouncer.cancel();
        self.disposed = true;
    }

    async fn run<T: Persist<P> + ?Sized>(&self, target: &T, payload: P) {
        if let Err(e) = target.persist(payload).await {
            log::warn!("{} failed: {}", self.label, e);
        }
    }
}
