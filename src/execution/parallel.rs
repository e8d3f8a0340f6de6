//! Parallel Engine
//!
//! Invokes every step at once with the same leading values and reports each
//! completion as it arrives. Completions are counted, not ordered: the n-th
//! completion may come from any step.
//!
//! Every completion but the last carries a [`Stop`] token. Stopping detaches
//! all observers; steps still in flight run to completion unobserved.
//!
//! Completions are delivered one at a time, in the order they were counted.
//! A stop issued from another thread waits for the delivery in progress,
//! so once it returns nothing further reaches an observer.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use log::{debug, info, warn};

use crate::error::{FlowError, MisuseError, ValidationError};
use crate::monitoring::{EventType, Timeline};
use crate::observers::gate::Gate;
use crate::observers::registry::{Observers, Registry};
use crate::observers::{EventName, FlowEvent, Listener};
use crate::steps::model::Completion;
use crate::steps::{validate, Next, Step, Values};

use super::handle::Handle;

/// Default label for parallel orchestrations.
const LABEL: &str = "Parallel";

/// Events a parallel run cannot start without observers for.
const TERMINAL: &[EventName] = &[EventName::Each, EventName::Error];

/// Events silenced by a stop.
const STOPPABLE: &[EventName] = &[EventName::Each, EventName::Error, EventName::Done];

/// Payload delivered by a parallel run.
#[derive(Debug, Clone)]
pub enum ParallelEvent {
    /// A step succeeded. `stop` is absent on the final completion.
    Each { stop: Option<Stop>, values: Values },
    /// A step failed, or the readiness check did. `stop` is absent on the
    /// final completion.
    Error {
        error: FlowError,
        stop: Option<Stop>,
    },
    /// Every step has completed.
    Done,
}

impl FlowEvent for ParallelEvent {
    fn name(&self) -> EventName {
        match self {
            Self::Each { .. } => EventName::Each,
            Self::Error { .. } => EventName::Error,
            Self::Done => EventName::Done,
        }
    }

    fn failure(error: FlowError) -> Self {
        Self::Error { error, stop: None }
    }
}

/// Starts configuring a parallel orchestration over `steps`.
pub fn parallel(steps: Vec<Step>) -> Parallel {
    Parallel {
        name: LABEL.to_string(),
        steps,
        args: Vec::new(),
        callback: None,
    }
}

/// Configuration for a parallel orchestration.
pub struct Parallel {
    name: String,
    steps: Vec<Step>,
    args: Values,
    callback: Option<Listener<ParallelEvent>>,
}

impl Parallel {
    /// Sets the label used in error messages and logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the leading values passed to every step.
    pub fn with_args(mut self, args: Values) -> Self {
        self.args = args;
        self
    }

    /// Sets a convenience handler serving both `each` and `error`.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ParallelEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Validates the steps and returns the registration handle.
    ///
    /// No step runs before the handle is released.
    pub fn start(self) -> Result<Handle<ParallelEvent>, ValidationError> {
        validate(&self.name, &self.steps, self.args.len())?;

        let timeline = Timeline::new();
        let observers = Arc::new(Observers::new(
            Registry::new(self.name.clone(), TERMINAL, self.callback),
            timeline.clone(),
        ));

        let run = Arc::new(ParallelRun {
            flow: self.name,
            steps: self.steps,
            args: self.args,
            state: Mutex::new(ParallelState {
                completed: 0,
                stopped: false,
                delivering: None,
            }),
            delivery: Mutex::new(()),
            observers: Arc::clone(&observers),
            timeline: timeline.clone(),
        });

        let gate = Gate::spawn(Arc::clone(&observers), move || run.begin());
        Ok(Handle::new(observers, timeline, gate))
    }
}

impl fmt::Debug for Parallel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parallel")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("args", &self.args)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl Handle<ParallelEvent> {
    /// Observes successful completions.
    pub fn on_each<F>(&self, listener: F) -> &Self
    where
        F: Fn(Option<Stop>, Values) + Send + Sync + 'static,
    {
        self.on(EventName::Each, move |event| {
            if let ParallelEvent::Each { stop, values } = event {
                listener(stop, values);
            }
        })
    }

    /// Observes failed completions and readiness errors.
    pub fn on_error<F>(&self, listener: F) -> &Self
    where
        F: Fn(FlowError, Option<Stop>) + Send + Sync + 'static,
    {
        self.on(EventName::Error, move |event| {
            if let ParallelEvent::Error { error, stop } = event {
                listener(error, stop);
            }
        })
    }

    /// Observes the end of the run.
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventName::Done, move |event| {
            if let ParallelEvent::Done = event {
                listener();
            }
        })
    }
}

struct ParallelState {
    completed: usize,
    stopped: bool,
    /// Thread currently holding the delivery turn.
    delivering: Option<ThreadId>,
}

struct ParallelRun {
    flow: String,
    steps: Vec<Step>,
    args: Values,
    state: Mutex<ParallelState>,
    /// Held from counting a completion until its events are delivered.
    /// Lock order: `delivery`, then `state`, then the registry.
    delivery: Mutex<()>,
    observers: Arc<Observers<ParallelEvent>>,
    timeline: Timeline,
}

impl ParallelRun {
    fn lock(&self) -> MutexGuard<'_, ParallelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the delivery turn, unless this thread already holds it
    /// (an observer stopping the run from inside its own notification).
    fn turn(&self) -> Option<MutexGuard<'_, ()>> {
        if self.lock().delivering == Some(thread::current().id()) {
            return None;
        }
        Some(self.delivery.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Runs after the readiness check passed.
    fn begin(self: Arc<Self>) {
        if self.steps.is_empty() {
            info!("{}: no steps, done", self.flow);
            if self.observers.has_listeners(EventName::Each) {
                self.observers.emit(ParallelEvent::Each {
                    stop: None,
                    values: Vec::new(),
                });
            }
            self.observers.emit(ParallelEvent::Done);
            return;
        }

        info!(
            "{}: starting {} steps with {} values",
            self.flow,
            self.steps.len(),
            self.args.len()
        );
        for (index, step) in self.steps.iter().enumerate() {
            debug!(
                "{}: invoking step {} ({})",
                self.flow,
                index,
                step.name().unwrap_or("unnamed")
            );
            self.timeline.add_event(EventType::Started(index));

            let run = Arc::clone(&self);
            step.invoke(
                self.args.clone(),
                Next::new(move |completion| run.settle(index, completion)),
            );
        }
    }

    fn settle(self: &Arc<Self>, index: usize, completion: Completion) {
        let turn = self.turn();
        let (completed, stopped) = {
            let mut state = self.lock();
            state.completed += 1;
            state.delivering = Some(thread::current().id());
            (state.completed, state.stopped)
        };
        let total = self.steps.len();
        let last = completed == total;

        if stopped {
            self.timeline.add_event(EventType::Suppressed(index));
            match completion.error {
                Some(error) => warn!(
                    "{}: step {} failed after stop, not reported: {}",
                    self.flow, index, error
                ),
                None => debug!("{}: step {} completed after stop", self.flow, index),
            }
            if turn.is_some() {
                self.lock().delivering = None;
            }
            return;
        }

        let stop = if last {
            None
        } else {
            Some(Stop {
                run: Arc::clone(self),
            })
        };

        match completion.error {
            Some(error) => {
                self.timeline.add_event(EventType::Failed(index));
                debug!(
                    "{}: step {} failed ({}/{}): {}",
                    self.flow, index, completed, total, error
                );
                self.observers.emit(ParallelEvent::Error {
                    error: error.into(),
                    stop,
                });
            }
            None => {
                self.timeline.add_event(EventType::Completed(index));
                debug!(
                    "{}: step {} completed ({}/{})",
                    self.flow, index, completed, total
                );
                self.observers.emit(ParallelEvent::Each {
                    stop,
                    values: completion.values,
                });
            }
        }

        if last {
            info!("{}: all {} steps completed", self.flow, total);
            self.observers.emit(ParallelEvent::Done);
        }

        if turn.is_some() {
            self.lock().delivering = None;
        }
    }
}

/// Detaches every observer of a parallel run.
///
/// All tokens of one run share its stopped flag: after the first successful
/// stop, every further stop fails.
#[derive(Clone)]
pub struct Stop {
    run: Arc<ParallelRun>,
}

impl Stop {
    /// Silences `each`, `error` and `done` for the rest of the run.
    ///
    /// Steps already in flight are not interrupted. Called from outside an
    /// observer, this waits until the notification being delivered, if any,
    /// has finished.
    pub fn stop(&self) -> Result<(), MisuseError> {
        let _turn = self.run.turn();
        let mut state = self.run.lock();
        if state.stopped {
            return Err(MisuseError::AlreadyStopped {
                flow: self.run.flow.clone(),
            });
        }
        state.stopped = true;
        self.run.observers.detach_all(STOPPABLE);
        let completed = state.completed;
        drop(state);

        info!(
            "{}: stopped after {} of {} completions",
            self.run.flow,
            completed,
            self.run.steps.len()
        );
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.run.lock().stopped
    }
}

impl fmt::Debug for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stop")
            .field("flow", &self.run.flow)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::thread;
    use std::time::Duration;

    use crate::error::StepError;

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn succeed(label: &'static str) -> Step {
        Step::new(0, move |args, next| {
            next.ok(vec![json!(format!("{} called with {:?}", label, args))]);
        })
    }

    /// Completes on its own thread once `release` receives a message.
    fn gated(result: Result<Values, StepError>) -> (Step, Sender<()>) {
        let (release, wait) = channel::<()>();
        let wait = Arc::new(Mutex::new(Some(wait)));
        let step = Step::new(0, move |_, next| {
            let wait: Option<Receiver<()>> = wait.lock().unwrap().take();
            let result = result.clone();
            thread::spawn(move || {
                if let Some(wait) = wait {
                    let _ = wait.recv();
                }
                next.complete(result);
            });
        });
        (step, release)
    }

    #[test]
    fn test_all_succeed_with_callback() {
        init_logging();
        let (tx, rx) = channel();

        let handle = parallel(vec![succeed("s0"), succeed("s1"), succeed("s2")])
            .with_callback(move |event| tx.send(event).unwrap())
            .start()
            .unwrap();
        let timeline = handle.timeline();
        drop(handle);

        let mut stops = Vec::new();
        let mut values = Vec::new();
        for _ in 0..3 {
            match rx.recv_timeout(WAIT).unwrap() {
                ParallelEvent::Each { stop, values: v } => {
                    stops.push(stop.is_some());
                    values.extend(v);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        assert_eq!(stops, vec![true, true, false]);
        assert_eq!(
            values,
            vec![
                json!("s0 called with []"),
                json!("s1 called with []"),
                json!("s2 called with []"),
            ]
        );
        assert!(rx.recv_timeout(QUIET).is_err());

        thread::sleep(Duration::from_millis(20));
        assert_eq!(
            timeline.emitted(),
            vec![EventName::Each, EventName::Each, EventName::Each]
        );
    }

    #[test]
    fn test_all_succeed_with_events_then_done() {
        init_logging();
        let (tx, rx) = channel();
        let each_tx = tx.clone();

        parallel(vec![succeed("s0"), succeed("s1"), succeed("s2")])
            .start()
            .unwrap()
            .on_each(move |stop, values| {
                each_tx
                    .send(format!("each {} {}", stop.is_some(), values[0]))
                    .unwrap()
            })
            .on_error(|error, _| panic!("unexpected error: {}", error))
            .on_done(move || tx.send("done".to_string()).unwrap());

        let trace: Vec<String> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            trace,
            vec![
                r#"each true "s0 called with []""#,
                r#"each true "s1 called with []""#,
                r#"each false "s2 called with []""#,
                "done",
            ]
        );
    }

    #[test]
    fn test_error_offers_stop_except_on_last_completion() {
        init_logging();
        let (tx, rx) = channel();
        let each_tx = tx.clone();
        let error_tx = tx.clone();

        let flow = vec![
            succeed("s0"),
            Step::new(0, |_, next| next.fail("BOOM!")),
            succeed("s2"),
            Step::new(0, |_, next| next.fail("BOOM!")),
        ];

        parallel(flow)
            .start()
            .unwrap()
            .on_each(move |stop, _| each_tx.send(format!("each {}", stop.is_some())).unwrap())
            .on_error(move |error, stop| {
                error_tx
                    .send(format!("error {} {}", error, stop.is_some()))
                    .unwrap()
            })
            .on_done(move || tx.send("done".to_string()).unwrap());

        let trace: Vec<String> = (0..5).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(
            trace,
            vec![
                "each true",
                "error BOOM! true",
                "each true",
                "error BOOM! false",
                "done",
            ]
        );
    }

    #[test]
    fn test_stop_detaches_everything() {
        init_logging();
        let (slow_a, release_a) = gated(Ok(vec![json!("a")]));
        let (slow_b, release_b) = gated(Err(StepError::new("late")));
        let fast = Step::new(0, |_, next| next.fail("BOOM!"));

        let delivered = Arc::new(AtomicUsize::new(0));
        let (stopped_tx, stopped_rx) = channel();

        let each_count = Arc::clone(&delivered);
        let done_count = Arc::clone(&delivered);
        let handle = parallel(vec![slow_a, fast, slow_b]).start().unwrap();
        handle
            .on_each(move |_, _| {
                each_count.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_, stop| {
                let stop = stop.expect("not the last completion");
                stop.stop().unwrap();
                stopped_tx.send(stop).unwrap();
            })
            .on_done(move || {
                done_count.fetch_add(1, Ordering::SeqCst);
            });
        let timeline = handle.timeline();
        drop(handle);

        let stop = stopped_rx.recv_timeout(WAIT).unwrap();
        assert!(stop.is_stopped());

        release_a.send(()).unwrap();
        release_b.send(()).unwrap();
        thread::sleep(QUIET);

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
        assert_eq!(timeline.emitted(), vec![EventName::Error]);
        let suppressed = timeline
            .events()
            .iter()
            .filter(|e| matches!(e.event_type, EventType::Suppressed(_)))
            .count();
        assert_eq!(suppressed, 2);
    }

    #[test]
    fn test_stop_twice_is_misuse() {
        init_logging();
        let (slow, release) = gated(Ok(vec![]));
        let (tx, rx) = channel();

        parallel(vec![succeed("s0"), slow])
            .with_name("Fan")
            .with_callback(move |event| {
                if let ParallelEvent::Each { stop: Some(stop), .. } = event {
                    tx.send(stop).unwrap();
                }
            })
            .start()
            .unwrap();

        let stop = rx.recv_timeout(WAIT).unwrap();
        let copy = stop.clone();
        assert!(stop.stop().is_ok());
        assert_eq!(
            copy.stop(),
            Err(MisuseError::AlreadyStopped {
                flow: "Fan".to_string()
            })
        );
        release.send(()).unwrap();
    }

    #[test]
    fn test_zero_steps_each_then_done() {
        init_logging();
        let (tx, rx) = channel();
        let each_tx = tx.clone();

        parallel(Vec::new())
            .start()
            .unwrap()
            .on_each(move |stop, values| {
                assert!(stop.is_none());
                assert!(values.is_empty());
                each_tx.send("each").unwrap();
            })
            .on_error(|error, _| panic!("unexpected error: {}", error))
            .on_done(move || tx.send("done").unwrap());

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "each");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "done");
    }

    #[test]
    fn test_zero_steps_with_callback() {
        init_logging();
        let (tx, rx) = channel();

        parallel(Vec::new())
            .with_callback(move |event| tx.send(event).unwrap())
            .start()
            .unwrap();

        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            ParallelEvent::Each { stop: None, .. }
        ));
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_steps_share_leading_args() {
        init_logging();
        let (tx, rx) = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let flow: Vec<Step> = (0..3)
            .map(|_| {
                let seen = Arc::clone(&seen);
                Step::new(2, move |args, next| {
                    seen.lock().unwrap().push(args.clone());
                    next.ok(vec![]);
                })
            })
            .collect();

        parallel(flow)
            .with_args(vec![json!("a"), json!(2)])
            .start()
            .unwrap()
            .on_each(|_, _| {})
            .on_error(|_, _| {})
            .on_done(move || tx.send(()).unwrap());

        rx.recv_timeout(WAIT).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|args| *args == vec![json!("a"), json!(2)]));
    }

    #[test]
    fn test_completion_count_out_of_order() {
        init_logging();
        let (first, release_first) = gated(Ok(vec![json!(0)]));
        let (second, release_second) = gated(Ok(vec![json!(1)]));
        let (tx, rx) = channel();

        parallel(vec![first, second])
            .with_callback(move |event| {
                if let ParallelEvent::Each { stop, values } = event {
                    tx.send((values, stop.is_some())).unwrap();
                }
            })
            .start()
            .unwrap();

        release_second.send(()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (vec![json!(1)], true));
        release_first.send(()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (vec![json!(0)], false));
    }

    #[test]
    fn test_missing_each_listener() {
        init_logging();
        let (tx, rx) = channel();

        parallel(vec![succeed("s0")])
            .start()
            .unwrap()
            .on_error(move |error, stop| tx.send((error, stop.is_none())).unwrap());

        let (error, no_stop) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(error.to_string(), "Parallel: required listeners not found");
        assert_eq!(error.details(), [r#"no "each" listener"#.to_string()]);
        assert!(no_stop);
    }

    #[test]
    fn test_no_listeners_escapes() {
        let handle = parallel(vec![succeed("s0")]).start().unwrap();
        assert!(handle.launch().join().is_err());
    }

    #[test]
    fn test_arity_error() {
        let err = parallel(vec![succeed("s0")])
            .with_args(vec![json!(1)])
            .start()
            .unwrap_err();
        assert_eq!(err.index(), Some(0));
        assert!(err.to_string().starts_with("Parallel: function at index 0"));
    }

    /// Completes on a fresh thread as soon as it is invoked.
    fn threaded(ordinal: usize) -> Step {
        Step::new(0, move |_, next| {
            thread::spawn(move || next.ok(vec![json!(ordinal)]));
        })
    }

    #[test]
    fn test_done_follows_every_each_across_threads() {
        init_logging();
        let trace = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = channel();
        let on_each = Arc::clone(&trace);
        let on_done = Arc::clone(&trace);

        parallel((0..32).map(threaded).collect())
            .start()
            .unwrap()
            .on_each(move |_, _| on_each.lock().unwrap().push("each"))
            .on_error(|error, _| panic!("unexpected error: {}", error))
            .on_done(move || {
                on_done.lock().unwrap().push("done");
                tx.send(()).unwrap();
            });

        rx.recv_timeout(WAIT).unwrap();
        thread::sleep(QUIET);
        let trace = trace.lock().unwrap();
        assert_eq!(trace.len(), 33);
        assert_eq!(trace.last(), Some(&"done"));
        assert!(trace[..32].iter().all(|event| *event == "each"));
    }

    #[test]
    fn test_stop_from_another_thread_silences_pending_completions() {
        init_logging();
        let (slow, release) = gated(Ok(vec![]));
        let mut flow: Vec<Step> = (0..31).map(threaded).collect();
        flow.push(slow);

        let delivered = Arc::new(AtomicUsize::new(0));
        let (stop_tx, stop_rx) = channel();
        let stop_tx = Mutex::new(Some(stop_tx));
        let (done_tx, done_rx) = channel();
        let each_count = Arc::clone(&delivered);
        let error_count = Arc::clone(&delivered);

        parallel(flow)
            .start()
            .unwrap()
            .on_each(move |stop, _| {
                each_count.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = stop_tx.lock().unwrap().take() {
                    tx.send(stop).unwrap();
                }
            })
            .on_error(move |_, _| {
                error_count.fetch_add(1, Ordering::SeqCst);
            })
            .on_done(move || done_tx.send(()).unwrap());

        let stop = stop_rx
            .recv_timeout(WAIT)
            .unwrap()
            .expect("slow step is still pending");
        stop.stop().unwrap();
        let at_stop = delivered.load(Ordering::SeqCst);

        release.send(()).unwrap();
        thread::sleep(QUIET);

        assert_eq!(delivered.load(Ordering::SeqCst), at_stop);
        assert!(done_rx.recv_timeout(QUIET).is_err());
    }
}
