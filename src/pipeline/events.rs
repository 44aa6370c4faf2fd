//! Observer surface: what the pipeline tells its caller, and the shared
//! plumbing every stage controller uses to settle a task's outcome.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use super::artifact::{Artifact, ProgressEvent, Stage};
use super::error::{PipelineError, StageFailure};
use super::runner::{DoneCallback, ProgressCallback, TaskOutcome};
use super::state::SharedStore;

/// Notification delivered to the observer on the control thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress(ProgressEvent),
    /// A stage's input field was (re)filled.  `source` is the upstream stage
    /// for auto-fill, `None` for manual input.
    InputFilled { stage: Stage, source: Option<Stage> },
    Completed { stage: Stage, artifact: Artifact },
    Failed { stage: Stage, failure: StageFailure },
    Cancelled { stage: Stage },
}

pub type Observer = Box<dyn FnMut(&PipelineEvent)>;

/// Single observer slot shared by the controllers and store subscriptions.
#[derive(Clone, Default)]
pub(crate) struct EventSink(Rc<RefCell<Option<Observer>>>);

impl EventSink {
    pub fn set(&self, observer: Observer) {
        *self.0.borrow_mut() = Some(observer);
    }

    pub fn emit(&self, event: PipelineEvent) {
        match self.0.try_borrow_mut() {
            Ok(mut slot) => {
                if let Some(observer) = slot.as_mut() {
                    observer(&event);
                }
            }
            Err(_) => log::warn!("observer re-entered; dropped {event:?}"),
        }
    }
}

/// Most recent failure per stage.
#[derive(Clone, Default)]
pub(crate) struct FailureLog(Rc<RefCell<[Option<StageFailure>; 3]>>);

impl FailureLog {
    pub fn record(&self, stage: Stage, failure: StageFailure) {
        self.0.borrow_mut()[stage.index()] = Some(failure);
    }

    pub fn last(&self, stage: Stage) -> Option<StageFailure> {
        self.0.borrow()[stage.index()].clone()
    }
}

/// What every controller shares: the store, the observer and the failure
/// log.  Builds the runner callbacks that apply an outcome to the store.
#[derive(Clone)]
pub(crate) struct StageContext {
    pub store: SharedStore,
    pub events: EventSink,
    pub failures: FailureLog,
}

impl StageContext {
    pub fn progress_callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Box::new(move |progress: &ProgressEvent| {
            log::debug!(
                target: progress.stage.log_target(),
                "{} ({})",
                progress.message,
                progress
                    .percent
                    .map_or_else(|| "…".to_string(), |p| format!("{p:.0}%"))
            );
            events.emit(PipelineEvent::Progress(progress.clone()));
        })
    }

    /// Success writes the artifact (which notifies subscribers), failure
    /// flags the stage and records the failure, cancel settles the flag.
    /// Other stages are never touched.
    pub fn done_callback(&self, stage: Stage) -> DoneCallback {
        let ctx = self.clone();
        Box::new(move |outcome: TaskOutcome| -> Result<(), PipelineError> {
            match outcome {
                TaskOutcome::Success(artifact) => {
                    log::info!(target: stage.log_target(), "{stage} completed");
                    ctx.store.set(stage, artifact.clone())?;
                    ctx.events.emit(PipelineEvent::Completed { stage, artifact });
                }
                TaskOutcome::Failure(failure) => {
                    log::error!(target: stage.log_target(), "{stage} failed: {failure}");
                    ctx.store.mark_failed(stage)?;
                    ctx.failures.record(stage, failure.clone());
                    ctx.events.emit(PipelineEvent::Failed { stage, failure });
                }
                TaskOutcome::Cancelled => {
                    log::info!(target: stage.log_target(), "{stage} cancelled");
                    ctx.store.settle(stage)?;
                    ctx.events.emit(PipelineEvent::Cancelled { stage });
                }
            }
            Ok(())
        })
    }
}
