//! Transcribe stage controller: ready `AudioFile` → `Transcript`.
//!
//! The input path is filled from Fetch's `Ready` notifications.  Filling is
//! advisory; nothing starts until [`TranscribeController::start`] is called.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use super::artifact::{Artifact, Stage};
use super::error::{FailureKind, PipelineError, StageFailure, TranscribeErrorKind};
use super::events::{PipelineEvent, StageContext};
use super::runner::{TaskError, TaskHandle, TaskRunner};
use crate::config::CapabilityFlags;
use crate::stt::{ModelSize, SttError, Transcriber, TranscriptionResult};

pub(crate) struct TranscribeController {
    ctx: StageContext,
    transcriber: Arc<dyn Transcriber>,
    input: Rc<RefCell<Option<PathBuf>>>,
}

impl TranscribeController {
    pub fn new(ctx: StageContext, transcriber: Arc<dyn Transcriber>) -> Result<Self, PipelineError> {
        let input = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&input);
        let events = ctx.events.clone();
        ctx.store.subscribe(
            Stage::Fetch,
            Box::new(move |artifact: &Artifact| {
                if let Some(path) = artifact.audio_path() {
                    log::debug!(target: Stage::Transcribe.log_target(), "input: {}", path.display());
                    *slot.borrow_mut() = Some(path.to_path_buf());
                    events.emit(PipelineEvent::InputFilled {
                        stage: Stage::Transcribe,
                        source: Some(Stage::Fetch),
                    });
                }
                Ok(())
            }),
        )?;

        Ok(Self {
            ctx,
            transcriber,
            input,
        })
    }

    pub fn input(&self) -> Option<PathBuf> {
        self.input.borrow().clone()
    }

    pub fn start(
        &self,
        runner: &mut TaskRunner,
        caps: CapabilityFlags,
        model: ModelSize,
    ) -> Result<TaskHandle, PipelineError> {
        if runner.is_running(Stage::Transcribe) {
            return Err(PipelineError::AlreadyRunning(Stage::Transcribe));
        }
        let not_ready = PipelineError::NotReady {
            stage: Stage::Transcribe,
            upstream: Stage::Fetch,
        };
        let path = self.input().ok_or(not_ready)?;
        if !caps.transcribe_available {
            return Err(PipelineError::CapabilityUnavailable(Stage::Transcribe));
        }

        self.ctx.store.mark_running(Stage::Transcribe)?;
        log::info!(
            target: Stage::Transcribe.log_target(),
            "Transcribing {} with {model} model",
            path.display()
        );

        let transcriber = Arc::clone(&self.transcriber);
        let started = runner.start(
            Stage::Transcribe,
            move |task| {
                let mut progress = |percent: Option<f32>, message: &str| task.progress(percent, message);
                match transcriber.transcribe(&path, model, &mut progress, task.token()) {
                    Ok(result) => {
                        log_segments(&result);
                        Ok(Artifact::Transcript {
                            text: result.text,
                            source_audio_path: path,
                            language: result.language,
                        })
                    }
                    Err(SttError::Cancelled) => Err(TaskError::Cancelled),
                    Err(e) => Err(StageFailure::new(
                        FailureKind::Transcribe(classify_stt_error(&e)),
                        e.to_string(),
                    )
                    .into()),
                }
            },
            self.ctx.progress_callback(),
            self.ctx.done_callback(Stage::Transcribe),
        );

        if started.is_err() {
            self.ctx.store.settle(Stage::Transcribe)?;
        }
        started
    }
}

fn log_segments(result: &TranscriptionResult) {
    let target = Stage::Transcribe.log_target();
    log::debug!(
        target: target,
        "{} segments in {} ms",
        result.segments.len(),
        result.duration_ms
    );
    for seg in &result.segments {
        log::trace!(
            target: target,
            "[{:>8} → {:>8}] {}",
            seg.start_ms,
            seg.end_ms,
            seg.text.trim()
        );
    }
}

pub fn classify_stt_error(error: &SttError) -> TranscribeErrorKind {
    match error {
        SttError::ModelNotFound(_) | SttError::ContextInit(_) => {
            TranscribeErrorKind::ModelNotAvailable
        }
        SttError::InputNotFound(_) | SttError::Decode(_) => TranscribeErrorKind::CorruptInput,
        SttError::Transcription(_) | SttError::Cancelled => TranscribeErrorKind::Unknown,
    }
}
