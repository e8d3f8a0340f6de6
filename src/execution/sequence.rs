//! Sequential Engine
//!
//! Runs steps strictly one at a time. Each step receives the values the
//! previous step produced ("carried" values) plus a continuation.
//!
//! A failing step suspends the sequence and emits `error` with a [`Resume`]
//! token. Invoking the token re-enters the sequence at the following step;
//! never invoking it leaves the sequence suspended for good. A failure in
//! the last step emits `error` without a token, since nothing is left to
//! resume into.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Running ──► Done
//!             │  ▲
//!        error│  │resume
//!             ▼  │
//!          Suspended
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use crate::error::{FlowError, MisuseError, ValidationError};
use crate::monitoring::{EventType, Timeline};
use crate::observers::gate::Gate;
use crate::observers::registry::{Observers, Registry};
use crate::observers::{EventName, FlowEvent, Listener};
use crate::steps::model::Completion;
use crate::steps::{validate, Next, Step, Values};

use super::handle::Handle;
use super::token::OneShot;

/// Default label for sequential orchestrations.
const LABEL: &str = "Sequence";

/// Events a sequence cannot start without observers for.
const TERMINAL: &[EventName] = &[EventName::Error, EventName::Done];

/// Payload delivered by a sequence.
#[derive(Debug, Clone)]
pub enum SequenceEvent {
    /// A step failed, or the readiness check did. `resume` is present when
    /// further steps remain.
    Error {
        error: FlowError,
        resume: Option<Resume>,
    },
    /// Every step succeeded; `values` are the last step's results.
    Done { values: Values },
}

impl FlowEvent for SequenceEvent {
    fn name(&self) -> EventName {
        match self {
            Self::Error { .. } => EventName::Error,
            Self::Done { .. } => EventName::Done,
        }
    }

    fn failure(error: FlowError) -> Self {
        Self::Error {
            error,
            resume: None,
        }
    }
}

/// Starts configuring a sequential orchestration over `steps`.
pub fn sequence(steps: Vec<Step>) -> Sequence {
    Sequence {
        name: LABEL.to_string(),
        steps,
        args: Vec::new(),
        callback: None,
    }
}

/// Configuration for a sequential orchestration.
pub struct Sequence {
    name: String,
    steps: Vec<Step>,
    args: Values,
    callback: Option<Listener<SequenceEvent>>,
}

impl Sequence {
    /// Sets the label used in error messages and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the leading values passed to the first step.
    ///
    /// Every step must declare at least this many leading values. A later
    /// step that declares more values than its predecessor produced is not
    /// invoked; the run ends with [`FlowError::InsufficientArgs`].
    pub fn with_args(mut self, args: Values) -> Self {
        self.args = args;
        self
    }

    /// Sets a convenience handler serving both `error` and `done`.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(SequenceEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Validates the steps and returns the registration handle.
    ///
    /// No step runs before the handle is released.
    pub fn start(self) -> Result<Handle<SequenceEvent>, ValidationError> {
        validate(&self.name, &self.steps, self.args.len())?;

        let timeline = Timeline::new();
        let observers = Arc::new(Observers::new(
            Registry::new(self.name.clone(), TERMINAL, self.callback),
            timeline.clone(),
        ));

        let run = Arc::new(SequenceRun {
            flow: self.name,
            steps: self.steps,
            state: Mutex::new(SequenceState {
                phase: Phase::Idle,
                carried: self.args,
                driving: false,
                pending: None,
            }),
            observers: Arc::clone(&observers),
            timeline: timeline.clone(),
        });

        let gate = Gate::spawn(Arc::clone(&observers), move || run.begin());
        Ok(Handle::new(observers, timeline, gate))
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("args", &self.args)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Handle<SequenceEvent> {
    /// Observes step failures and readiness errors.
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(FlowError, Option<Resume>) + Send + Sync + 'static,
    {
        self.on(EventName::Error, move |event| {
            if let SequenceEvent::Error { error, resume } = event {
                listener(error, resume);
            }
        })
    }

    /// Observes successful completion of the whole sequence.
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn(Values) + Send + Sync + 'static,
    {
        self.on(EventName::Done, move |event| {
            if let SequenceEvent::Done { values } = event {
                listener(values);
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Suspended,
    Done,
}

struct SequenceState {
    phase: Phase,
    carried: Values,
    /// Set while some thread is inside [`SequenceRun::drive`].
    driving: bool,
    /// Step queued by a continuation settled during a drive.
    pending: Option<(usize, Values)>,
}

struct SequenceRun {
    flow: String,
    steps: Vec<Step>,
    state: Mutex<SequenceState>,
    observers: Arc<Observers<SequenceEvent>>,
    timeline: Timeline,
}

impl SequenceRun {
    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut SequenceState, phase: Phase) {
        debug!("{}: {:?} -> {:?}", self.flow, state.phase, phase);
        state.phase = phase;
    }

    /// Runs after the readiness check passed.
    fn begin(self: Arc<Self>) {
        if self.steps.is_empty() {
            info!("{}: no steps, done", self.flow);
            let mut state = self.lock();
            self.transition(&mut state, Phase::Done);
            drop(state);

            self.observers.emit(SequenceEvent::Done { values: Vec::new() });
            return;
        }

        info!("{}: starting {} steps", self.flow, self.steps.len());
        let args = self.lock().carried.clone();
        self.drive(0, args);
    }

    /// Invokes step `index` and every step that follows from it.
    ///
    /// Only one thread drives at a time. A continuation settled while a
    /// drive is in progress queues its step in `pending` and returns, so
    /// synchronous steps run in a loop instead of nesting on the stack.
    fn drive(self: &Arc<Self>, index: usize, args: Values) {
        {
            let mut state = self.lock();
            if state.phase == Phase::Done {
                warn!("{}: run is over, step {} not invoked", self.flow, index);
                return;
            }
            if state.driving {
                state.pending = Some((index, args));
                return;
            }
            state.driving = true;
        }

        let mut next = Some((index, args));
        while let Some((index, args)) = next {
            self.invoke(index, args);

            let mut state = self.lock();
            next = state.pending.take();
            if next.is_none() {
                state.driving = false;
            }
        }
    }

    fn invoke(self: &Arc<Self>, index: usize, args: Values) {
        let step = &self.steps[index];

        let mut state = self.lock();
        if args.len() < step.arity() {
            self.transition(&mut state, Phase::Done);
            drop(state);

            warn!(
                "{}: step {} declares {} values but {} were carried, stopping",
                self.flow,
                index,
                step.arity(),
                args.len()
            );
            self.timeline.add_event(EventType::Failed(index));
            self.observers.emit(SequenceEvent::Error {
                error: FlowError::InsufficientArgs {
                    flow: self.flow.clone(),
                    index,
                    declared: step.arity(),
                    received: args.len(),
                },
                resume: None,
            });
            return;
        }
        self.transition(&mut state, Phase::Running);
        drop(state);

        debug!(
            "{}: invoking step {} ({}) with {} values",
            self.flow,
            index,
            step.name().unwrap_or("unnamed"),
            args.len()
        );
        self.timeline.add_event(EventType::Started(index));

        let run = Arc::clone(self);
        step.invoke(args, Next::new(move |completion| run.settle(index, completion)));
    }

    fn settle(self: &Arc<Self>, index: usize, completion: Completion) {
        let next_index = index + 1;
        let remaining = next_index < self.steps.len();

        let Some(error) = completion.error else {
            self.timeline.add_event(EventType::Completed(index));
            let values = completion.values;

            let mut state = self.lock();
            state.carried = values.clone();
            if remaining {
                drop(state);
                self.drive(next_index, values);
                return;
            }
            self.transition(&mut state, Phase::Done);
            drop(state);

            info!("{}: all {} steps completed", self.flow, self.steps.len());
            self.observers.emit(SequenceEvent::Done { values });
            return;
        };

        self.timeline.add_event(EventType::Failed(index));
        debug!("{}: step {} failed: {}", self.flow, index, error);

        let mut state = self.lock();
        let resume = if remaining {
            self.transition(&mut state, Phase::Suspended);
            let fallback = if completion.values.is_empty() {
                state.carried.clone()
            } else {
                completion.values
            };
            Some(Resume {
                run: Arc::clone(self),
                index: next_index,
                fallback,
                token: OneShot::new(),
            })
        } else {
            self.transition(&mut state, Phase::Done);
            None
        };
        drop(state);

        self.observers.emit(SequenceEvent::Error {
            error: error.into(),
            resume,
        });
    }
}

/// Re-entry token offered when a step fails and further steps remain.
///
/// Clones share one-shot state: the first successful call consumes every
/// clone.
#[derive(Clone)]
pub struct Resume {
    run: Arc<SequenceRun>,
    index: usize,
    fallback: Values,
    token: OneShot,
}

impl Resume {
    /// Continues with the next step.
    ///
    /// The step receives the values the failed step attached to its error,
    /// or, if it attached none, the results of the last successful step.
    pub fn resume(&self) -> Result<(), MisuseError> {
        self.resume_with(Vec::new())
    }

    /// Continues with the next step, passing `values` instead.
    ///
    /// Non-empty `values` also replace the carried values, so a later
    /// plain resume falls back to them. Empty `values` behaves like
    /// [`Resume::resume`].
    pub fn resume_with(&self, values: Values) -> Result<(), MisuseError> {
        if !self.token.consume() {
            return Err(MisuseError::ResumeConsumed {
                flow: self.run.flow.clone(),
            });
        }

        let args = if values.is_empty() {
            self.fallback.clone()
        } else {
            self.run.lock().carried = values.clone();
            values
        };
        debug!("{}: resuming at step {}", self.run.flow, self.index);
        self.run.drive(self.index, args);
        Ok(())
    }

    /// Index of the step a resume would invoke.
    pub fn next_index(&self) -> usize {
        self.index
    }

    /// Values the next step receives on a plain [`Resume::resume`].
    pub fn carried(&self) -> &Values {
        &self.fallback
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("flow", &self.run.flow)
            .field("index", &self.index)
            .field("token", &self.token.state())
            .finish()
    }
}
