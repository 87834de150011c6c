//! Run queue and progress controller.
//!
//! A [`ProgressController`] executes registered [`ProgressStep`]s strictly in
//! registration order on one execution thread. It never runs steps in
//! parallel: the resolution steps of one batch all wait on the same worker,
//! whose results are matched to requests by position.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use crate::error::{Error, Result};

/// Handle for cooperative cancellation.
///
/// Clones share one flag; an abort through any clone is visible to all.
///
/// # Example
///
/// ```
/// use bindscope_core::execute::AbortHandle;
///
/// let handle = AbortHandle::new();
/// let other = handle.clone();
/// assert!(!handle.is_aborted());
///
/// other.abort();
/// assert!(handle.is_aborted());
/// ```
#[derive(Clone, Default, Debug)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Clear the flag before reusing the handle for a new batch.
    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }
}

/// How a step's `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    /// The step observed a user cancellation.
    Cancelled,
}

/// One unit of work for a [`ProgressController`].
pub trait ProgressStep: Send + Sync {
    /// Text shown while the step runs.
    fn label(&self) -> &str;

    /// Execute the step. Called once, from the controller's execution
    /// thread; may block.
    fn run(&self) -> StepStatus;

    /// Best-effort abort of in-flight work. May be called from any thread,
    /// also for steps that never ran.
    fn cancel(&self);

    /// Finalize. Called exactly once per step by the controller after the
    /// step ran or was skipped; must tolerate repeated calls.
    fn complete(&self);

    fn is_done(&self) -> bool;
}

/// Observes controller progress. Called from the execution thread.
pub trait ProgressObserver: Send + Sync {
    fn on_started(&self, _label: &str, _steps: usize) {}

    fn on_step_started(&self, index: usize, label: &str);

    fn on_step_completed(&self, index: usize, label: &str);

    /// The step was cancelled while running or skipped after a cancellation.
    fn on_step_cancelled(&self, index: usize, label: &str);

    /// The step panicked. Later steps still run.
    fn on_step_failed(&self, _index: usize, _label: &str) {}

    fn on_finished(&self, _outcome: &ProgressOutcome) {}
}

/// Logs progress through `tracing`.
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_started(&self, label: &str, steps: usize) {
        tracing::debug!("{}: {} step(s)", label, steps);
    }

    fn on_step_started(&self, index: usize, label: &str) {
        tracing::debug!("step {} started: {}", index, label);
    }

    fn on_step_completed(&self, index: usize, label: &str) {
        tracing::debug!("step {} completed: {}", index, label);
    }

    fn on_step_cancelled(&self, index: usize, label: &str) {
        tracing::debug!("step {} cancelled: {}", index, label);
    }

    fn on_step_failed(&self, index: usize, label: &str) {
        tracing::warn!("step {} failed: {}", index, label);
    }

    fn on_finished(&self, outcome: &ProgressOutcome) {
        tracing::debug!(
            "progress finished: {} completed, {} cancelled, {} failed",
            outcome.completed(),
            outcome.cancelled_steps(),
            outcome.failed_steps()
        );
    }
}

/// Per-step state as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Cancelled,
    /// The step panicked.
    Failed,
}

/// Final state of a controller run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressOutcome {
    pub steps: Vec<StepState>,
    pub cancelled: bool,
}

impl ProgressOutcome {
    pub fn completed(&self) -> usize {
        self.steps.iter().filter(|s| **s == StepState::Completed).count()
    }

    pub fn cancelled_steps(&self) -> usize {
        self.steps.iter().filter(|s| **s == StepState::Cancelled).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| **s == StepState::Failed).count()
    }
}

type Callback = Box<dyn FnOnce(&ProgressOutcome) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registering,
    Running,
    Finished,
}

struct ControllerState {
    phase: Phase,
    steps: Vec<Arc<dyn ProgressStep>>,
    states: Vec<StepState>,
    current: Option<usize>,
    observers: Vec<Arc<dyn ProgressObserver>>,
    callbacks: Vec<Callback>,
}

impl ControllerState {
    fn outcome(&self, cancelled: bool) -> ProgressOutcome {
        ProgressOutcome {
            steps: self.states.clone(),
            cancelled,
        }
    }
}

struct Inner {
    state: Mutex<ControllerState>,
    cond: Condvar,
    abort: AbortHandle,
}

fn lock(inner: &Inner) -> MutexGuard<'_, ControllerState> {
    inner.state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sequential step executor with cooperative cancellation.
///
/// Cheap to clone; clones control the same run.
#[derive(Clone)]
pub struct ProgressController {
    inner: Arc<Inner>,
}

impl Default for ProgressController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ControllerState {
                    phase: Phase::Registering,
                    steps: Vec::new(),
                    states: Vec::new(),
                    current: None,
                    observers: Vec::new(),
                    callbacks: Vec::new(),
                }),
                cond: Condvar::new(),
                abort: AbortHandle::new(),
            }),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        lock(&self.inner).observers.push(observer);
    }

    /// Register a step. Fails once `go` was called.
    pub fn step(&self, step: Arc<dyn ProgressStep>) -> Result<usize> {
        let mut state = lock(&self.inner);
        if state.phase != Phase::Registering {
            return Err(Error::IllegalState(format!(
                "cannot add step {:?} after the controller started",
                step.label()
            )));
        }
        state.steps.push(step);
        state.states.push(StepState::Pending);
        Ok(state.steps.len() - 1)
    }

    /// Execute all steps in order on a new execution thread.
    ///
    /// With `background_automatically == false` the calling thread blocks
    /// until every step finished or was cancelled.
    pub fn go(&self, label: &str, background_automatically: bool) -> Result<()> {
        {
            let mut state = lock(&self.inner);
            if state.phase != Phase::Registering {
                return Err(Error::IllegalState("controller already started".to_string()));
            }
            state.phase = Phase::Running;
        }

        let inner = self.inner.clone();
        let label = label.to_string();
        let spawned = thread::Builder::new()
            .name("bindscope-progress".to_string())
            .spawn(move || execute(&inner, &label));

        if let Err(e) = spawned {
            // Nothing ran; finish as cancelled so waiters do not hang.
            self.inner.abort.abort();
            execute_none(&self.inner);
            return Err(Error::Io(e));
        }

        if !background_automatically {
            self.wait_for();
        }
        Ok(())
    }

    /// True once any step observed a cancellation or `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.abort.is_aborted()
    }

    /// Cancel the running step and skip the rest.
    pub fn cancel(&self) {
        self.inner.abort.abort();
        let running = {
            let state = lock(&self.inner);
            state.current.map(|index| state.steps[index].clone())
        };
        if let Some(step) = running {
            step.cancel();
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.inner.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.inner).phase == Phase::Finished
    }

    /// Block until all steps finished. Returns immediately if the controller
    /// was never started.
    pub fn wait_for(&self) -> ProgressOutcome {
        let mut state = lock(&self.inner);
        while state.phase == Phase::Running {
            state = self
                .inner
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.outcome(self.is_cancelled())
    }

    /// Run `callback` once all steps finished. If they already have, it runs
    /// immediately on the calling thread.
    pub fn execute_after(&self, callback: impl FnOnce(&ProgressOutcome) + Send + 'static) {
        let outcome = {
            let mut state = lock(&self.inner);
            if state.phase != Phase::Finished {
                state.callbacks.push(Box::new(callback));
                return;
            }
            state.outcome(self.is_cancelled())
        };
        callback(&outcome);
    }
}

fn execute(inner: &Inner, label: &str) {
    let (steps, observers) = {
        let state = lock(inner);
        (state.steps.clone(), state.observers.clone())
    };
    for observer in &observers {
        observer.on_started(label, steps.len());
    }

    for (index, step) in steps.iter().enumerate() {
        if inner.abort.is_aborted() {
            step.cancel();
            lock(inner).states[index] = StepState::Cancelled;
            for observer in &observers {
                observer.on_step_cancelled(index, step.label());
            }
            continue;
        }

        {
            let mut state = lock(inner);
            state.current = Some(index);
            state.states[index] = StepState::Running;
        }
        for observer in &observers {
            observer.on_step_started(index, step.label());
        }

        // A panic fails only this step; it is not a cancellation.
        let ended = match catch_unwind(AssertUnwindSafe(|| step.run())) {
            Ok(StepStatus::Completed) => StepState::Completed,
            Ok(StepStatus::Cancelled) => {
                inner.abort.abort();
                StepState::Cancelled
            }
            Err(_) => {
                tracing::warn!("step {:?} panicked", step.label());
                StepState::Failed
            }
        };
        {
            let mut state = lock(inner);
            state.current = None;
            state.states[index] = ended;
        }
        for observer in &observers {
            match ended {
                StepState::Cancelled => observer.on_step_cancelled(index, step.label()),
                StepState::Failed => observer.on_step_failed(index, step.label()),
                _ => observer.on_step_completed(index, step.label()),
            }
        }
    }

    for step in &steps {
        step.complete();
    }
    finish(inner, &observers);
}

/// Finish a run whose execution thread never started.
fn execute_none(inner: &Inner) {
    let (steps, observers) = {
        let mut state = lock(inner);
        state.states.fill(StepState::Cancelled);
        (state.steps.clone(), state.observers.clone())
    };
    for step in &steps {
        step.cancel();
        step.complete();
    }
    finish(inner, &observers);
}

fn finish(inner: &Inner, observers: &[Arc<dyn ProgressObserver>]) {
    let outcome = lock(inner).outcome(inner.abort.is_aborted());
    for observer in observers {
        observer.on_finished(&outcome);
    }

    // Callbacks run before waiters wake; ones registered meanwhile run too.
    loop {
        let callbacks = {
            let mut state = lock(inner);
            if state.callbacks.is_empty() {
                state.phase = Phase::Finished;
                break;
            }
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(&outcome);
        }
    }
    inner.cond.notify_all();
}
