//! Orchestration Handle
//!
//! Returned by `start`. Observers are attached here during the registration
//! phase; releasing the handle (dropping it or calling [`Handle::launch`])
//! ends that phase and lets the readiness gate run.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::monitoring::Timeline;
use crate::observers::gate::Gate;
use crate::observers::registry::Observers;
use crate::observers::{EventName, FlowEvent};

/// Registration handle for one orchestration.
///
/// # Example
///
/// ```rust,no_run
/// use stepflow::{sequence, Step};
///
/// let handle = sequence(vec![Step::new(0, |_, next| next.ok(vec![]))])
///     .start()
///     .expect("steps are valid");
///
/// handle
///     .on_error(|err, _resume| eprintln!("failed: {}", err))
///     .on_done(|values| println!("done: {:?}", values));
///
/// // Dropping the handle starts the orchestration.
/// drop(handle);
/// ```
///
/// If `error` has no observer when the readiness check fails, the gate
/// thread panics. After a plain drop nobody joins that thread; use
/// [`Handle::launch`] and join it to observe the failure.
pub struct Handle<E: FlowEvent> {
    observers: Arc<Observers<E>>,
    timeline: Timeline,
    gate: Gate,
}

impl<E: FlowEvent> Handle<E> {
    pub(crate) fn new(observers: Arc<Observers<E>>, timeline: Timeline, gate: Gate) -> Self {
        Self {
            observers,
            timeline,
            gate,
        }
    }

    /// Attaches an observer for `name`.
    ///
    /// The first observer attached for a terminal event replaces the
    /// convenience handler for that event.
    pub fn on<F>(&self, name: EventName, listener: F) -> &Self
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        self.observers.attach(name, Arc::new(listener));
        self
    }

    /// Label used in error messages.
    pub fn flow(&self) -> String {
        self.observers.lock().flow().to_string()
    }

    /// Returns true while the convenience handler still serves `name`.
    pub fn is_convenience_active(&self, name: EventName) -> bool {
        self.observers.lock().is_convenience_active(name)
    }

    pub fn listener_count(&self, name: EventName) -> usize {
        self.observers.lock().listener_count(name)
    }

    /// Timeline of this orchestration. Remains usable after the handle is
    /// released.
    pub fn timeline(&self) -> Timeline {
        self.timeline.clone()
    }

    /// Releases the handle and returns the gate thread.
    ///
    /// Joining yields `Err` if the readiness check failed with nobody
    /// observing `error`. A handle that is merely dropped detaches that
    /// thread: the panic is printed but the process keeps running, so
    /// callers that need the failure surfaced should `launch().join()`.
    pub fn launch(self) -> JoinHandle<()> {
        self.gate.release()
    }
}

impl<E: FlowEvent> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.observers.lock();
        f.debug_struct("Handle")
            .field("flow", &registry.flow())
            .field("terminal", &registry.terminal())
            .finish_non_exhaustive()
    }
}
