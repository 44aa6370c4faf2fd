//! Three-stage media pipeline: Fetch → Transcribe → Summarize.
//!
//! # Architecture
//!
//! ```text
//!                         control thread (owns everything below)
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │ Pipeline                                                              │
//! │   ├─ PipelineStore   artifacts · readiness · credentials · listeners  │
//! │   ├─ FetchController ──┐                                              │
//! │   ├─ TranscribeController ── start() ─▶ TaskRunner ──spawn──▶ worker  │
//! │   └─ SummarizeController ┘                 ▲                    │     │
//! │                                            └── pump()/wait() ◀──┘     │
//! │                                                 progress · outcome    │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Workers only run capabilities ([`AudioFetcher`](crate::fetch::AudioFetcher),
//! [`Transcriber`](crate::stt::Transcriber),
//! [`SummaryProvider`](crate::llm::SummaryProvider)); every state change is
//! applied on the control thread when the outcome is pumped.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use video_synthesis::config::{AppConfig, AppPaths, ConfigSettings, ProviderKind};
//! use video_synthesis::llm::Credential;
//! use video_synthesis::pipeline::{Capabilities, Pipeline};
//!
//! # fn main() -> anyhow::Result<()> {
//! let runtime = tokio::runtime::Runtime::new()?;
//! let (config, paths) = (AppConfig::load()?, AppPaths::new());
//!
//! let mut pipeline = Pipeline::new(
//!     Capabilities::from_config(&config, &paths),
//!     Box::new(ConfigSettings::new(config.clone(), paths.clone())),
//!     runtime.handle().clone(),
//! )?;
//! pipeline.set_credential(ProviderKind::Claude, Credential::new("sk-ant-..."))?;
//!
//! pipeline.start_fetch("https://www.youtube.com/watch?v=...", &paths.downloads_dir)?;
//! pipeline.run_until_idle()?;
//! pipeline.start_transcribe()?;
//! pipeline.run_until_idle()?;
//! pipeline.start_summarize()?;
//! pipeline.run_until_idle()?;
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod fetch;
pub mod runner;
pub mod state;
pub mod summarize;
pub mod transcribe;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use artifact::{Artifact, ProgressEvent, Readiness, Stage};
pub use coordinator::{Capabilities, Pipeline};
pub use error::{
    FailureKind, FetchErrorKind, PipelineError, StageFailure, SummarizeErrorKind,
    TranscribeErrorKind,
};
pub use events::{Observer, PipelineEvent};
pub use fetch::{classify_fetch_error, validate_url};
pub use runner::{
    CancelToken, DoneCallback, ProgressCallback, TaskContext, TaskError, TaskHandle, TaskId,
    TaskOutcome, TaskResult, TaskRunner,
};
pub use state::{Listener, PipelineStore, SharedStore, StageSnapshot, StateSnapshot};
pub use summarize::classify_summarize_error;
pub use transcribe::classify_stt_error;
