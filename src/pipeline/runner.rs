//! Task runner — executes one capability call off the control thread.
//!
//! ```text
//! control thread                         worker thread (one per task)
//! ──────────────                         ────────────────────────────
//! start(stage, capability, ..) ──spawn──▶ capability(&TaskContext)
//!                                           │  ctx.progress(..)  ─┐
//!                                           │  ctx.checkpoint()?  │ RunnerEvent
//!                                           ▼                     │ (unbounded
//!                                         Done(outcome) ──────────┤  channel)
//! pump() / run_until_idle()  ◀────────────────────────────────────┘
//!   ├─ on_progress(&ProgressEvent)   zero or more, emission order
//!   └─ on_done(TaskOutcome)          exactly once
//! ```
//!
//! Workers never see the [`PipelineStore`](super::PipelineStore); all state
//! changes happen in the callbacks, which only ever run on the thread that
//! calls [`TaskRunner::pump`].
//!
//! Cancellation is cooperative.  [`TaskRunner::cancel`] raises the task's
//! [`CancelToken`]; the capability notices at its next checkpoint.  The
//! runner never kills a worker.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::artifact::{Artifact, ProgressEvent, Stage};
use super::error::{PipelineError, StageFailure};

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a handle and its worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Task identity and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to one in-flight capability invocation.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    stage: Stage,
    token: CancelToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Clone of the task's flag, for raising cancellation from another
    /// thread (a signal handler, say).
    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// Terminal outcome of a task.  Exactly one is delivered per handle.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success(Artifact),
    Failure(StageFailure),
    Cancelled,
}

/// Early exit from a capability: either the cancel flag was observed or the
/// capability failed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskError {
    Cancelled,
    Failed(StageFailure),
}

impl From<StageFailure> for TaskError {
    fn from(failure: StageFailure) -> Self {
        TaskError::Failed(failure)
    }
}

pub type TaskResult = Result<Artifact, TaskError>;

// ---------------------------------------------------------------------------
// TaskContext  (worker side)
// ---------------------------------------------------------------------------

enum RunnerEvent {
    Progress(TaskId, ProgressEvent),
    Done(TaskId, TaskOutcome),
}

/// What a capability sees while running on its worker.
pub struct TaskContext {
    id: TaskId,
    stage: Stage,
    token: CancelToken,
    tx: mpsc::UnboundedSender<RunnerEvent>,
}

impl TaskContext {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(TaskError::Cancelled)` once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.token.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Forward a progress report to the control thread.
    pub fn progress(&self, percent: Option<f32>, message: impl Into<String>) {
        let event = ProgressEvent::new(self.stage, percent, message);
        // The receiver only disappears when the runner is dropped; progress
        // for an abandoned task is irrelevant.
        let _ = self.tx.send(RunnerEvent::Progress(self.id, event));
    }
}

// ---------------------------------------------------------------------------
// TaskRunner  (control side)
// ---------------------------------------------------------------------------

pub type ProgressCallback = Box<dyn FnMut(&ProgressEvent)>;
pub type DoneCallback = Box<dyn FnOnce(TaskOutcome) -> Result<(), PipelineError>>;

struct ActiveTask {
    handle: TaskHandle,
    on_progress: ProgressCallback,
    on_done: DoneCallback,
}

/// Runs capabilities on worker threads, at most one per stage.
pub struct TaskRunner {
    next_id: u64,
    active: HashMap<TaskId, ActiveTask>,
    tx: mpsc::UnboundedSender<RunnerEvent>,
    rx: mpsc::UnboundedReceiver<RunnerEvent>,
}

impl TaskRunner {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            next_id: 1,
            active: HashMap::new(),
            tx,
            rx,
        }
    }

    /// Run `capability` for `stage` on a fresh worker thread.
    ///
    /// Fails with [`PipelineError::AlreadyRunning`] while another task for
    /// the same stage is active; the running task is left untouched.
    pub fn start<F>(
        &mut self,
        stage: Stage,
        capability: F,
        on_progress: ProgressCallback,
        on_done: DoneCallback,
    ) -> Result<TaskHandle, PipelineError>
    where
        F: FnOnce(&TaskContext) -> TaskResult + Send + 'static,
    {
        if self.is_running(stage) {
            return Err(PipelineError::AlreadyRunning(stage));
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;

        let handle = TaskHandle {
            id,
            stage,
            token: CancelToken::new(),
        };
        let ctx = TaskContext {
            id,
            stage,
            token: handle.token.clone(),
            tx: self.tx.clone(),
        };

        std::thread::Builder::new()
            .name(format!("{stage}-worker-{}", id.0))
            .spawn(move || run_worker(ctx, capability))
            .map_err(|source| PipelineError::Spawn { stage, source })?;

        log::debug!(target: stage.log_target(), "runner: started task {id}");
        self.active.insert(
            id,
            ActiveTask {
                handle: handle.clone(),
                on_progress,
                on_done,
            },
        );
        Ok(handle)
    }

    /// Request cooperative cancellation.  Returns `false` (and does nothing)
    /// when the task has already delivered its outcome.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        match self.active.get(&handle.id) {
            Some(task) => {
                task.handle.token.cancel();
                log::info!(target: handle.stage.log_target(), "runner: cancel requested for task {}", handle.id);
                true
            }
            None => false,
        }
    }

    /// Cancel whatever task is active for `stage`.
    pub fn cancel_stage(&self, stage: Stage) -> bool {
        match self.active_handle(stage) {
            Some(handle) => self.cancel(handle),
            None => false,
        }
    }

    pub fn is_running(&self, stage: Stage) -> bool {
        self.active_handle(stage).is_some()
    }

    pub fn active_handle(&self, stage: Stage) -> Option<&TaskHandle> {
        self.active
            .values()
            .map(|task| &task.handle)
            .find(|handle| handle.stage == stage)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Deliver every queued event without blocking.  Returns how many
    /// events were dispatched.
    pub fn pump(&mut self) -> Result<usize, PipelineError> {
        let mut delivered = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.dispatch(event)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Block until at least one event is available, then deliver all
    /// queued events.  Returns immediately when nothing is active.
    ///
    /// Must not be called from inside an async runtime.
    pub fn wait(&mut self) -> Result<usize, PipelineError> {
        if self.active.is_empty() {
            return self.pump();
        }
        match self.rx.blocking_recv() {
            Some(event) => {
                self.dispatch(event)?;
                Ok(1 + self.pump()?)
            }
            None => Ok(0),
        }
    }

    /// Deliver events until no task is active.
    pub fn run_until_idle(&mut self) -> Result<(), PipelineError> {
        while !self.active.is_empty() {
            self.wait()?;
        }
        Ok(())
    }

    /// Events sent by workers but not yet delivered.
    #[cfg(test)]
    fn queued(&self) -> usize {
        self.rx.len()
    }

    fn dispatch(&mut self, event: RunnerEvent) -> Result<(), PipelineError> {
        match event {
            RunnerEvent::Progress(id, progress) => {
                if let Some(task) = self.active.get_mut(&id) {
                    (task.on_progress)(&progress);
                }
                Ok(())
            }
            RunnerEvent::Done(id, outcome) => match self.active.remove(&id) {
                Some(task) => {
                    log::debug!(
                        target: task.handle.stage.log_target(),
                        "runner: task {id} finished ({})",
                        outcome_label(&outcome)
                    );
                    (task.on_done)(outcome)
                }
                None => Ok(()),
            },
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn outcome_label(outcome: &TaskOutcome) -> &'static str {
    match outcome {
        TaskOutcome::Success(_) => "success",
        TaskOutcome::Failure(_) => "failure",
        TaskOutcome::Cancelled => "cancelled",
    }
}

/// Worker body: run the capability, fold panics and late cancellation into
/// a single terminal outcome, send it.
fn run_worker<F>(ctx: TaskContext, capability: F)
where
    F: FnOnce(&TaskContext) -> TaskResult,
{
    let result = panic::catch_unwind(AssertUnwindSafe(|| capability(&ctx)));

    let outcome = match result {
        // A success computed after cancel was requested is not delivered.
        Ok(Ok(_)) if ctx.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Ok(artifact)) => TaskOutcome::Success(artifact),
        Ok(Err(TaskError::Cancelled)) => TaskOutcome::Cancelled,
        Ok(Err(TaskError::Failed(failure))) => TaskOutcome::Failure(failure),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            TaskOutcome::Failure(StageFailure::internal(detail))
        }
    };

    let _ = ctx.tx.send(RunnerEvent::Done(ctx.id, outcome));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use crate::pipeline::error::{FailureKind, FetchErrorKind};

    fn audio() -> Artifact {
        Artifact::AudioFile {
            path: "/tmp/a.mp3".into(),
            source_url: None,
        }
    }

    type Outcomes = Rc<RefCell<Vec<TaskOutcome>>>;

    fn recorder() -> (Outcomes, DoneCallback) {
        let outcomes: Outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        let on_done: DoneCallback = Box::new(move |o| {
            sink.borrow_mut().push(o);
            Ok(())
        });
        (outcomes, on_done)
    }

    fn no_progress() -> ProgressCallback {
        Box::new(|_| {})
    }

    #[test]
    fn success_is_delivered_once_on_control_thread() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();
        let control = std::thread::current().id();
        let seen_on = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&seen_on);

        runner
            .start(
                Stage::Fetch,
                |_| Ok(audio()),
                no_progress(),
                Box::new(move |o| {
                    *seen.borrow_mut() = Some(std::thread::current().id());
                    on_done(o)
                }),
            )
            .unwrap();
        runner.run_until_idle().unwrap();

        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Success(audio())]);
        assert_eq!(*seen_on.borrow(), Some(control));
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn progress_arrives_in_emission_order_before_done() {
        let mut runner = TaskRunner::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let progress_log = Rc::clone(&log);
        let done_log = Rc::clone(&log);

        runner
            .start(
                Stage::Transcribe,
                |ctx| {
                    for i in 0..5 {
                        ctx.progress(Some(i as f32 * 20.0), format!("step {i}"));
                    }
                    Ok(audio())
                },
                Box::new(move |p| progress_log.borrow_mut().push(p.message.clone())),
                Box::new(move |_| {
                    done_log.borrow_mut().push("done".into());
                    Ok(())
                }),
            )
            .unwrap();
        runner.run_until_idle().unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["step 0", "step 1", "step 2", "step 3", "step 4", "done"]
        );
    }

    #[test]
    fn second_start_for_running_stage_is_rejected() {
        let mut runner = TaskRunner::new();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let (outcomes, on_done) = recorder();

        runner
            .start(
                Stage::Fetch,
                move |_| {
                    release_rx.recv().ok();
                    Ok(audio())
                },
                no_progress(),
                on_done,
            )
            .unwrap();

        let (_, second_done) = recorder();
        let err = runner
            .start(Stage::Fetch, |_| Ok(audio()), no_progress(), second_done)
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning(Stage::Fetch)));
        assert!(runner.is_running(Stage::Fetch));

        release_tx.send(()).unwrap();
        runner.run_until_idle().unwrap();
        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Success(audio())]);
    }

    #[test]
    fn different_stages_run_concurrently() {
        let mut runner = TaskRunner::new();
        let (a, done_a) = recorder();
        let (b, done_b) = recorder();

        runner
            .start(Stage::Fetch, |_| Ok(audio()), no_progress(), done_a)
            .unwrap();
        runner
            .start(Stage::Summarize, |_| Ok(audio()), no_progress(), done_b)
            .unwrap();
        runner.run_until_idle().unwrap();

        assert_eq!(a.borrow().len(), 1);
        assert_eq!(b.borrow().len(), 1);
    }

    #[test]
    fn cancel_yields_cancelled_never_success() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();

        let handle = runner
            .start(
                Stage::Transcribe,
                |ctx| loop {
                    ctx.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(5));
                },
                no_progress(),
                on_done,
            )
            .unwrap();

        assert!(runner.cancel(&handle));
        runner.run_until_idle().unwrap();
        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Cancelled]);
    }

    #[test]
    fn success_after_cancel_request_becomes_cancelled() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();
        let (go_tx, go_rx) = std_mpsc::channel::<()>();

        // Capability ignores the flag entirely.
        let handle = runner
            .start(
                Stage::Fetch,
                move |_| {
                    go_rx.recv().ok();
                    Ok(audio())
                },
                no_progress(),
                on_done,
            )
            .unwrap();

        runner.cancel(&handle);
        go_tx.send(()).unwrap();
        runner.run_until_idle().unwrap();
        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Cancelled]);
    }

    #[test]
    fn cancel_after_outcome_is_sent_keeps_the_success() {
        use crate::pipeline::{PipelineStore, Readiness};

        let mut runner = TaskRunner::new();
        let store = PipelineStore::shared();
        store.mark_running(Stage::Fetch).unwrap();

        let outcomes: Outcomes = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcomes);
        let writer = Rc::clone(&store);
        let handle = runner
            .start(
                Stage::Fetch,
                |_| Ok(audio()),
                no_progress(),
                Box::new(move |o: TaskOutcome| {
                    if let TaskOutcome::Success(artifact) = &o {
                        writer.set(Stage::Fetch, artifact.clone())?;
                    }
                    sink.borrow_mut().push(o);
                    Ok(())
                }),
            )
            .unwrap();

        // Hold delivery until the worker's outcome is in the queue.
        let mut spins = 0;
        while runner.queued() == 0 {
            spins += 1;
            assert!(spins < 1_000, "worker never reported");
            std::thread::sleep(Duration::from_millis(2));
        }

        // Still active from the control thread's view, so cancel is accepted.
        assert!(runner.cancel(&handle));
        assert!(handle.is_cancel_requested());
        runner.pump().unwrap();

        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Success(audio())]);
        assert_eq!(store.get(Stage::Fetch), Some(audio()));
        assert_eq!(store.readiness(Stage::Fetch), Readiness::Ready);
        assert_eq!(runner.active_count(), 0);
    }

    #[test]
    fn cancelling_a_finished_task_is_a_noop() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();
        let handle = runner
            .start(Stage::Fetch, |_| Ok(audio()), no_progress(), on_done)
            .unwrap();
        runner.run_until_idle().unwrap();

        assert!(!runner.cancel(&handle));
        assert_eq!(outcomes.borrow().len(), 1);
    }

    #[test]
    fn failure_is_forwarded_verbatim() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();
        let failure = StageFailure::new(
            FailureKind::Fetch(FetchErrorKind::NetworkError),
            "connection reset",
        );
        let expected = failure.clone();

        runner
            .start(
                Stage::Fetch,
                move |_| Err(failure.into()),
                no_progress(),
                on_done,
            )
            .unwrap();
        runner.run_until_idle().unwrap();
        assert_eq!(*outcomes.borrow(), vec![TaskOutcome::Failure(expected)]);
    }

    #[test]
    fn panicking_capability_becomes_internal_failure() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();

        runner
            .start(
                Stage::Summarize,
                |_| panic!("provider exploded"),
                no_progress(),
                on_done,
            )
            .unwrap();
        runner.run_until_idle().unwrap();

        let outcomes = outcomes.borrow();
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            TaskOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Internal);
                assert!(f.detail.contains("provider exploded"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!runner.is_running(Stage::Summarize));
    }

    #[test]
    fn done_callback_error_propagates_from_pump() {
        let mut runner = TaskRunner::new();
        runner
            .start(
                Stage::Fetch,
                |_| Ok(audio()),
                no_progress(),
                Box::new(|_| Err(PipelineError::ReentrantMutation(Stage::Fetch))),
            )
            .unwrap();

        let err = runner.run_until_idle().unwrap_err();
        assert!(matches!(err, PipelineError::ReentrantMutation(Stage::Fetch)));
    }

    #[test]
    fn stage_can_restart_after_outcome_is_consumed() {
        let mut runner = TaskRunner::new();
        let (outcomes, on_done) = recorder();
        runner
            .start(Stage::Fetch, |_| Ok(audio()), no_progress(), on_done)
            .unwrap();
        runner.run_until_idle().unwrap();

        let (again, on_done) = recorder();
        let second = runner
            .start(Stage::Fetch, |_| Ok(audio()), no_progress(), on_done)
            .unwrap();
        assert!(second.id() > TaskId(1));
        runner.run_until_idle().unwrap();
        assert_eq!(outcomes.borrow().len(), 1);
        assert_eq!(again.borrow().len(), 1);
    }
}
