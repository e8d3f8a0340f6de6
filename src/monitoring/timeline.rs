//! Orchestration Timeline
//!
//! Records step starts, completions and event deliveries for one
//! orchestration, for diagnostics and for asserting delivery traces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::observers::EventName;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step at this index was invoked
    Started(usize),
    /// Step at this index reported success
    Completed(usize),
    /// Step at this index reported an error
    Failed(usize),
    /// Event was delivered to at least one observer
    Emitted(EventName),
    /// Step at this index completed after the orchestration was stopped
    Suppressed(usize),
}

/// A single entry in the timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub event_type: EventType,
    pub timestamp: Instant,
}

#[derive(Debug)]
struct Record {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

/// Shared, append-only record of one orchestration.
///
/// Clones observe the same record.
#[derive(Debug, Clone)]
pub struct Timeline {
    record: Arc<Mutex<Record>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Timeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            record: Arc::new(Mutex::new(Record {
                events: Vec::new(),
                start_time: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_event(&self, event_type: EventType) {
        self.lock().events.push(TimelineEvent {
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns a copy of all recorded events.
    pub fn events(&self) -> Vec<TimelineEvent> {
        self.lock().events.clone()
    }

    /// Names of delivered events, in delivery order.
    pub fn emitted(&self) -> Vec<EventName> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e.event_type {
                EventType::Emitted(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Returns the total elapsed time since the orchestration was created.
    pub fn elapsed(&self) -> Duration {
        self.lock().start_time.elapsed()
    }

    /// Time between each step's (latest) start and its completion.
    ///
    /// Steps that never reported are absent.
    pub fn durations(&self) -> HashMap<usize, Duration> {
        let record = self.lock();
        let mut starts: HashMap<usize, Instant> = HashMap::new();
        let mut durations = HashMap::new();

        for event in &record.events {
            match event.event_type {
                EventType::Started(index) => {
                    starts.insert(index, event.timestamp);
                }
                EventType::Completed(index)
                | EventType::Failed(index)
                | EventType::Suppressed(index) => {
                    if let Some(start) = starts.get(&index) {
                        durations.insert(index, event.timestamp.duration_since(*start));
                    }
                }
                EventType::Emitted(_) => {}
            }
        }

        durations
    }
}
