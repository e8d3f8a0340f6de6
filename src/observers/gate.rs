//! Readiness Gate
//!
//! Orchestrations start in two phases. The entry point returns a handle and
//! the caller attaches observers to it. Once the handle is released the gate
//! thread checks that every terminal event has an observer and only then
//! lets the engine drive its steps.
//!
//! A failed check is reported once, as [`MissingListenersError`] on the
//! `error` event. If `error` is unobserved too, the gate thread panics:
//! nobody could otherwise learn about the mistake.

use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{error, warn};

use crate::error::MissingListenersError;

use super::registry::{FlowEvent, Observers};

/// Pending readiness check for one orchestration.
///
/// Dropping the gate releases it.
#[derive(Debug)]
pub(crate) struct Gate {
    arm: Sender<()>,
    driver: JoinHandle<()>,
}

impl Gate {
    /// Spawns the gate thread. `drive` runs on it if the check passes.
    pub fn spawn<E, F>(observers: Arc<Observers<E>>, drive: F) -> Self
    where
        E: FlowEvent,
        F: FnOnce() + Send + 'static,
    {
        let (arm, armed) = channel::<()>();

        let driver = thread::spawn(move || {
            // Nothing is ever sent; the receive ends when the sender drops.
            let _ = armed.recv();

            if let Err(missing) = check(&observers) {
                warn!("{}: {:?}", missing, missing.details);
                if !observers.emit(E::failure(missing.clone().into())) {
                    error!("{}: no \"error\" listener to report to", missing.flow);
                    panic!("{}: {}", missing, missing.details.join(", "));
                }
                return;
            }

            drive();
        });

        Self { arm, driver }
    }

    /// Releases the gate and returns its thread.
    pub fn release(self) -> JoinHandle<()> {
        let Self { arm, driver } = self;
        drop(arm);
        driver
    }
}

/// Verifies that every terminal event has at least one observer.
pub(crate) fn check<E: FlowEvent>(observers: &Observers<E>) -> Result<(), MissingListenersError> {
    let registry = observers.lock();
    let missing = registry.missing();
    if missing.is_empty() {
        return Ok(());
    }

    Err(MissingListenersError {
        flow: registry.flow().to_string(),
        details: missing
            .iter()
            .map(|name| format!("no \"{}\" listener", name))
            .collect(),
    })
}
