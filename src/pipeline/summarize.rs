//! Summarize stage controller: text + provider + credential → `Summary`.
//!
//! The input text is filled from Transcribe's `Ready` notifications or set
//! by hand.  The chunked run is async; its worker thread drives it with
//! [`Handle::block_on`] on the caller's tokio runtime.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::runtime::Handle;

use super::artifact::{Artifact, Stage};
use super::error::{FailureKind, PipelineError, StageFailure, SummarizeErrorKind};
use super::events::{PipelineEvent, StageContext};
use super::runner::{TaskError, TaskHandle, TaskRunner};
use crate::config::ProviderKind;
use crate::llm::{ChunkedSummarizer, ProviderRegistry, SummarizeError};

pub(crate) struct SummarizeController {
    ctx: StageContext,
    providers: ProviderRegistry,
    chunk_words: usize,
    runtime: Handle,
    input: Rc<RefCell<Option<String>>>,
}

impl SummarizeController {
    pub fn new(
        ctx: StageContext,
        providers: ProviderRegistry,
        chunk_words: usize,
        runtime: Handle,
    ) -> Result<Self, PipelineError> {
        let input = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&input);
        let events = ctx.events.clone();
        ctx.store.subscribe(
            Stage::Transcribe,
            Box::new(move |artifact: &Artifact| {
                if let Some(text) = artifact.text() {
                    *slot.borrow_mut() = Some(text.to_string());
                    events.emit(PipelineEvent::InputFilled {
                        stage: Stage::Summarize,
                        source: Some(Stage::Transcribe),
                    });
                }
                Ok(())
            }),
        )?;

        Ok(Self {
            ctx,
            providers,
            chunk_words,
            runtime,
            input,
        })
    }

    pub fn input(&self) -> Option<String> {
        self.input.borrow().clone()
    }

    /// Replace the input text by hand.
    pub fn set_input(&self, text: impl Into<String>) {
        *self.input.borrow_mut() = Some(text.into());
        self.ctx.events.emit(PipelineEvent::InputFilled {
            stage: Stage::Summarize,
            source: None,
        });
    }

    pub fn start(
        &self,
        runner: &mut TaskRunner,
        provider: ProviderKind,
    ) -> Result<TaskHandle, PipelineError> {
        if runner.is_running(Stage::Summarize) {
            return Err(PipelineError::AlreadyRunning(Stage::Summarize));
        }
        let text = self
            .input()
            .filter(|t| !t.trim().is_empty())
            .ok_or(PipelineError::EmptyInput(Stage::Summarize))?;
        let credential = self
            .ctx
            .store
            .get_credential(provider)
            .filter(|c| !c.is_blank())
            .ok_or(PipelineError::MissingCredential(provider))?;
        let adapter = self
            .providers
            .get(provider)
            .ok_or(PipelineError::CapabilityUnavailable(Stage::Summarize))?;

        self.ctx.store.mark_running(Stage::Summarize)?;
        log::info!(target: Stage::Summarize.log_target(), "Summarizing with {provider}");

        let engine = ChunkedSummarizer::new(adapter).with_chunk_words(self.chunk_words);
        let runtime = self.runtime.clone();
        let started = runner.start(
            Stage::Summarize,
            move |task| {
                let mut progress = |percent: Option<f32>, message: &str| task.progress(percent, message);
                let run = runtime.block_on(engine.summarize(
                    &text,
                    &credential,
                    &mut progress,
                    task.token(),
                ));
                match run {
                    Ok(run) => Ok(Artifact::Summary {
                        text: run.text,
                        source_transcript_length: run.input_words,
                        provider,
                    }),
                    Err(failure) if failure.is_cancelled() => Err(TaskError::Cancelled),
                    Err(failure) => Err(StageFailure::new(
                        FailureKind::Summarize(classify_summarize_error(&failure.error)),
                        failure.to_string(),
                    )
                    .with_chunk_index(failure.chunk_index)
                    .into()),
                }
            },
            self.ctx.progress_callback(),
            self.ctx.done_callback(Stage::Summarize),
        );

        if started.is_err() {
            self.ctx.store.settle(Stage::Summarize)?;
        }
        started
    }
}

pub fn classify_summarize_error(error: &SummarizeError) -> SummarizeErrorKind {
    match error {
        SummarizeError::Auth { .. } => SummarizeErrorKind::AuthError,
        SummarizeError::RateLimited { .. } => SummarizeErrorKind::RateLimited,
        SummarizeError::QuotaExceeded { .. } => SummarizeErrorKind::QuotaExceeded,
        SummarizeError::Network { .. } => SummarizeErrorKind::NetworkError,
        SummarizeError::Unavailable { .. } => SummarizeErrorKind::ProviderUnavailable,
        SummarizeError::Http { .. }
        | SummarizeError::Parse { .. }
        | SummarizeError::EmptyResponse(_)
        | SummarizeError::NotRegistered(_)
        | SummarizeError::Cancelled => SummarizeErrorKind::Unknown,
    }
}
