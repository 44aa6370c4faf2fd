//! Pipeline error taxonomy.
//!
//! Two families live here:
//!
//! * [`PipelineError`] — returned synchronously by the control-thread API.
//!   `AlreadyRunning` and `ReentrantMutation` are caller bugs and must be
//!   propagated, never swallowed.
//! * [`StageFailure`] — the payload of a `Failure` outcome delivered through
//!   the task runner.  Each stage classifies its capability errors into its
//!   own kind enum.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use super::artifact::Stage;
use crate::config::ProviderKind;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    /// `start` was called for a stage that already has a task in flight.
    #[error("{0} stage already has a task in flight")]
    AlreadyRunning(Stage),

    /// A state mutation was attempted from inside a subscriber notification.
    #[error("re-entrant mutation of {0} state during subscriber notification")]
    ReentrantMutation(Stage),

    /// The stage's strict upstream dependency has no ready artifact.
    #[error("{stage} requires a ready {upstream} artifact")]
    NotReady { stage: Stage, upstream: Stage },

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no input text for the {0} stage")]
    EmptyInput(Stage),

    #[error("no credential set for {0}")]
    MissingCredential(ProviderKind),

    /// The settings collaborator reports the stage's runtime as missing.
    #[error("{0} runtime is not installed")]
    CapabilityUnavailable(Stage),

    #[error("destination directory {path} is unavailable: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audio file {0} does not exist")]
    MissingAudio(PathBuf),

    #[error("failed to spawn {stage} worker thread: {source}")]
    Spawn {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// `true` for errors that indicate a bug in the caller rather than a
    /// runtime condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::AlreadyRunning(_) | PipelineError::ReentrantMutation(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Per-stage failure kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FetchErrorKind {
    NetworkError,
    RestrictedContent,
    InvalidUrl,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TranscribeErrorKind {
    ModelNotAvailable,
    CorruptInput,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SummarizeErrorKind {
    AuthError,
    RateLimited,
    QuotaExceeded,
    NetworkError,
    ProviderUnavailable,
    Unknown,
}

/// Classified reason for a `Failure` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "kind", rename_all = "lowercase")]
pub enum FailureKind {
    Fetch(FetchErrorKind),
    Transcribe(TranscribeErrorKind),
    Summarize(SummarizeErrorKind),
    /// The capability panicked on its worker.
    Internal,
}

// ---------------------------------------------------------------------------
// StageFailure
// ---------------------------------------------------------------------------

/// Terminal failure of one task: classified kind plus the raw detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub detail: String,
    /// Index of the chunk whose summarize call failed, for chunked runs.
    pub chunk_index: Option<usize>,
}

impl StageFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            chunk_index: None,
        }
    }

    pub fn with_chunk_index(mut self, index: Option<usize>) -> Self {
        self.chunk_index = index;
        self
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, detail)
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)?;
        if let Some(index) = self.chunk_index {
            write!(f, " (chunk {index})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
