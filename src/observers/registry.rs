//! Observer Registry
//!
//! Every orchestration delivers events through one registry. Per event name
//! the registry holds a [`Sink`]: either the convenience handler passed at
//! construction, or the subscribers the consumer attached by name.
//!
//! The convenience handler is a fallback. Attaching the first real observer
//! for an event detaches the convenience handler from that event only, so a
//! single event is never delivered through both paths.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::monitoring::{EventType, Timeline};

/// Names of the events an orchestration can emit.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EventName {
    Each,
    Error,
    Done,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Each => "each",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered by an orchestration.
pub trait FlowEvent: Clone + Send + 'static {
    /// Event this payload is delivered under.
    fn name(&self) -> EventName;

    /// Builds an `error` payload that offers no resume or stop token.
    fn failure(error: FlowError) -> Self;
}

/// An attached observer.
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Delivery path for one event name.
pub(crate) enum Sink<E> {
    Convenience,
    Subscribers(Vec<Listener<E>>),
}

/// Listener bookkeeping for one orchestration.
pub(crate) struct Registry<E> {
    flow: String,
    terminal: &'static [EventName],
    convenience: Option<Listener<E>>,
    sinks: HashMap<EventName, Sink<E>>,
}

impl<E> Registry<E> {
    /// Creates a registry, installing `convenience` on every terminal event.
    pub fn new(
        flow: impl Into<String>,
        terminal: &'static [EventName],
        convenience: Option<Listener<E>>,
    ) -> Self {
        let mut sinks = HashMap::new();
        if convenience.is_some() {
            for name in terminal {
                sinks.insert(*name, Sink::Convenience);
            }
        }

        Self {
            flow: flow.into(),
            terminal,
            convenience,
            sinks,
        }
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn terminal(&self) -> &'static [EventName] {
        self.terminal
    }

    /// Adds a consumer observer for `name`.
    ///
    /// If the convenience handler still serves `name`, it is detached from
    /// that name first.
    pub fn attach(&mut self, name: EventName, listener: Listener<E>) {
        match self.sinks.get_mut(&name) {
            Some(Sink::Subscribers(listeners)) => listeners.push(listener),
            Some(Sink::Convenience) => {
                debug!(
                    "{}: convenience handler detached from \"{}\"",
                    self.flow, name
                );
                self.sinks.insert(name, Sink::Subscribers(vec![listener]));
            }
            None => {
                self.sinks.insert(name, Sink::Subscribers(vec![listener]));
            }
        }
        debug!("{}: observer attached to \"{}\"", self.flow, name);
    }

    pub fn is_convenience_active(&self, name: EventName) -> bool {
        matches!(self.sinks.get(&name), Some(Sink::Convenience))
    }

    /// Number of observers that would receive `name`, counting an active
    /// convenience handler as one.
    pub fn listener_count(&self, name: EventName) -> usize {
        match self.sinks.get(&name) {
            Some(Sink::Convenience) => 1,
            Some(Sink::Subscribers(listeners)) => listeners.len(),
            None => 0,
        }
    }

    /// Terminal events nobody observes, in terminal order.
    pub fn missing(&self) -> Vec<EventName> {
        self.terminal
            .iter()
            .copied()
            .filter(|name| self.listener_count(*name) == 0)
            .collect()
    }

    /// Snapshot of the observers for `name`.
    pub fn listeners(&self, name: EventName) -> Vec<Listener<E>> {
        match self.sinks.get(&name) {
            Some(Sink::Convenience) => self.convenience.iter().cloned().collect(),
            Some(Sink::Subscribers(listeners)) => listeners.clone(),
            None => Vec::new(),
        }
    }

    /// Removes every observer, convenience or not, from `names`.
    pub fn detach_all(&mut self, names: &[EventName]) {
        for name in names {
            self.sinks.remove(name);
        }
        debug!("{}: all observers detached from {:?}", self.flow, names);
    }
}

/// Thread-safe registry shared by an orchestration, its handle and its tokens.
///
/// Observers are always invoked after the lock is released, so they may
/// attach, resume or stop re-entrantly.
pub(crate) struct Observers<E> {
    registry: Mutex<Registry<E>>,
    timeline: Timeline,
}

impl<E: FlowEvent> Observers<E> {
    pub fn new(registry: Registry<E>, timeline: Timeline) -> Self {
        Self {
            registry: Mutex::new(registry),
            timeline,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, name: EventName, listener: Listener<E>) {
        self.lock().attach(name, listener);
    }

    pub fn detach_all(&self, names: &[EventName]) {
        self.lock().detach_all(names);
    }

    pub fn has_listeners(&self, name: EventName) -> bool {
        self.lock().listener_count(name) > 0
    }

    /// Delivers `event` to every current observer of its name.
    ///
    /// Returns `false` when nobody received it.
    pub fn emit(&self, event: E) -> bool {
        let name = event.name();
        let listeners = self.lock().listeners(name);
        if listeners.is_empty() {
            return false;
        }

        self.timeline.add_event(EventType::Emitted(name));
        for listener in listeners {
            listener(event.clone());
        }
        true
    }
}
