//! The three-stage pipeline as one control-thread object.
//!
//! [`Pipeline`] owns the store, the task runner and one controller per
//! stage.  Every method must be called from the thread that built it (the
//! type is `!Send`).  Outcomes are applied while [`Pipeline::pump`],
//! [`Pipeline::wait`] or [`Pipeline::run_until_idle`] runs.
//!
//! ```text
//! start_fetch ──▶ AudioFile ──auto-fill──▶ start_transcribe ──▶ Transcript
//!                                                                   │
//!                 set_summary_input ──▶ (input) ◀──auto-fill────────┘
//!                                          │
//!                                   start_summarize ──▶ Summary
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;

use super::artifact::{Artifact, Readiness, Stage};
use super::error::{PipelineError, StageFailure};
use super::events::{EventSink, FailureLog, Observer, StageContext};
use super::fetch::FetchController;
use super::runner::{TaskHandle, TaskRunner};
use super::state::{PipelineStore, SharedStore, StateSnapshot};
use super::summarize::SummarizeController;
use super::transcribe::TranscribeController;
use crate::config::{AppConfig, AppPaths, PipelineSettings, ProviderKind};
use crate::fetch::{AudioFetcher, YtDlpFetcher};
use crate::llm::{Credential, ProviderRegistry, DEFAULT_CHUNK_WORDS};
use crate::stt::{ModelPaths, TranscribeParams, Transcriber, WhisperTranscriber};

/// The capability adapters a pipeline runs.
pub struct Capabilities {
    pub fetcher: Arc<dyn AudioFetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub providers: ProviderRegistry,
    /// Word threshold above which summarize input is chunked.
    pub chunk_words: usize,
}

impl Capabilities {
    /// yt-dlp, Whisper and every built-in summary provider, configured
    /// from `config`.
    pub fn from_config(config: &AppConfig, paths: &AppPaths) -> Self {
        Self {
            fetcher: Arc::new(YtDlpFetcher::new(config.fetch.clone())),
            transcriber: Arc::new(WhisperTranscriber::new(
                ModelPaths::from_app_paths(paths),
                TranscribeParams::from_config(&config.stt),
                config.stt.ffmpeg_program.clone(),
            )),
            providers: ProviderRegistry::from_config(&config.summarize),
            chunk_words: config.summarize.chunk_words,
        }
    }

    pub fn new(
        fetcher: Arc<dyn AudioFetcher>,
        transcriber: Arc<dyn Transcriber>,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            fetcher,
            transcriber,
            providers,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }
}

pub struct Pipeline {
    store: SharedStore,
    runner: TaskRunner,
    settings: Box<dyn PipelineSettings>,
    events: EventSink,
    failures: FailureLog,
    fetch: FetchController,
    transcribe: TranscribeController,
    summarize: SummarizeController,
}

impl Pipeline {
    /// `runtime` drives the async summary providers; it must outlive the
    /// pipeline and must not be the runtime of the calling thread.
    pub fn new(
        capabilities: Capabilities,
        settings: Box<dyn PipelineSettings>,
        runtime: Handle,
    ) -> Result<Self, PipelineError> {
        let store = PipelineStore::shared();
        let events = EventSink::default();
        let failures = FailureLog::default();
        let ctx = StageContext {
            store: store.clone(),
            events: events.clone(),
            failures: failures.clone(),
        };

        let fetch = FetchController::new(ctx.clone(), capabilities.fetcher);
        let transcribe = TranscribeController::new(ctx.clone(), capabilities.transcriber)?;
        let summarize = SummarizeController::new(
            ctx,
            capabilities.providers,
            capabilities.chunk_words,
            runtime,
        )?;

        Ok(Self {
            store,
            runner: TaskRunner::new(),
            settings,
            events,
            failures,
            fetch,
            transcribe,
            summarize,
        })
    }

    /// Replace the observer that receives [`PipelineEvent`](super::PipelineEvent)s.
    pub fn set_observer(&self, observer: Observer) {
        self.events.set(observer);
    }

    // -----------------------------------------------------------------------
    // Stage entry points
    // -----------------------------------------------------------------------

    /// Download `url` into `dest`, creating the directory when missing.
    pub fn start_fetch(&mut self, url: &str, dest: &Path) -> Result<TaskHandle, PipelineError> {
        let caps = self.settings.capabilities();
        self.fetch.start(&mut self.runner, caps, url, dest)
    }

    /// Use a local file as the Fetch stage's artifact instead of
    /// downloading.  Notifies Transcribe like a finished download.
    pub fn select_audio_file(&mut self, path: &Path) -> Result<(), PipelineError> {
        if self.runner.is_running(Stage::Fetch) {
            return Err(PipelineError::AlreadyRunning(Stage::Fetch));
        }
        if !path.is_file() {
            return Err(PipelineError::MissingAudio(path.to_path_buf()));
        }
        log::info!(target: Stage::Fetch.log_target(), "Selected local file {}", path.display());
        self.store.set(
            Stage::Fetch,
            Artifact::AudioFile {
                path: path.to_path_buf(),
                source_url: None,
            },
        )
    }

    /// Transcribe the audio file last delivered by Fetch, with the model
    /// size currently selected in settings.
    pub fn start_transcribe(&mut self) -> Result<TaskHandle, PipelineError> {
        let caps = self.settings.capabilities();
        let model = self.settings.model_size();
        self.transcribe.start(&mut self.runner, caps, model)
    }

    /// Overwrite the summarize input, e.g. with text typed by the user.
    pub fn set_summary_input(&mut self, text: impl Into<String>) {
        self.summarize.set_input(text);
    }

    /// Summarize the current input with the provider selected in settings.
    pub fn start_summarize(&mut self) -> Result<TaskHandle, PipelineError> {
        let provider = self.settings.provider();
        self.summarize.start(&mut self.runner, provider)
    }

    /// Request cancellation of whatever `stage` is running.  `false` when
    /// nothing is.
    pub fn cancel(&self, stage: Stage) -> bool {
        self.runner.cancel_stage(stage)
    }

    // -----------------------------------------------------------------------
    // Event delivery
    // -----------------------------------------------------------------------

    pub fn pump(&mut self) -> Result<usize, PipelineError> {
        self.runner.pump()
    }

    pub fn wait(&mut self) -> Result<usize, PipelineError> {
        self.runner.wait()
    }

    pub fn run_until_idle(&mut self) -> Result<(), PipelineError> {
        self.runner.run_until_idle()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn is_running(&self, stage: Stage) -> bool {
        self.runner.is_running(stage)
    }

    pub fn active_handle(&self, stage: Stage) -> Option<TaskHandle> {
        self.runner.active_handle(stage).cloned()
    }

    pub fn is_idle(&self) -> bool {
        self.runner.active_count() == 0
    }

    pub fn readiness(&self, stage: Stage) -> Readiness {
        self.store.readiness(stage)
    }

    pub fn artifact(&self, stage: Stage) -> Option<Artifact> {
        self.store.get(stage)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.store.snapshot()
    }

    /// Most recent failure reported by `stage`, kept until the next one.
    pub fn last_failure(&self, stage: Stage) -> Option<StageFailure> {
        self.failures.last(stage)
    }

    pub fn transcribe_input(&self) -> Option<PathBuf> {
        self.transcribe.input()
    }

    pub fn summary_input(&self) -> Option<String> {
        self.summarize.input()
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Credentials
    // -----------------------------------------------------------------------

    pub fn set_credential(
        &self,
        provider: ProviderKind,
        credential: Credential,
    ) -> Result<(), PipelineError> {
        self.store.set_credential(provider, credential)
    }

    pub fn clear_credentials(&self) {
        self.store.clear_credentials();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
