//! Stage identifiers, readiness flags and the values that move between
//! stages.
//!
//! [`Artifact`]s are plain values: the store hands out clones and a new
//! stage run replaces the previous artifact wholesale.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ProviderKind;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One of the three pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Transcribe,
    Summarize,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Transcribe, Stage::Summarize];

    /// The stage whose `Ready` artifact this stage strictly requires.
    ///
    /// Summarize has no strict dependency: its text may be typed in.
    pub fn upstream(self) -> Option<Stage> {
        match self {
            Stage::Transcribe => Some(Stage::Fetch),
            Stage::Fetch | Stage::Summarize => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transcribe => "transcribe",
            Stage::Summarize => "summarize",
        }
    }

    /// `log` target for records emitted on behalf of this stage.
    pub fn log_target(self) -> &'static str {
        match self {
            Stage::Fetch => "video_synthesis::fetch",
            Stage::Transcribe => "video_synthesis::transcribe",
            Stage::Summarize => "video_synthesis::summarize",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Stage::Fetch => 0,
            Stage::Transcribe => 1,
            Stage::Summarize => 2,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// Per-stage readiness flag.
///
/// ```text
/// Pending ──start──▶ Running ──success──▶ Ready
///                            ──failure──▶ Failed
///                            ──cancel───▶ Ready (earlier artifact) | Pending
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    #[default]
    Pending,
    Running,
    Ready,
    Failed,
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// The output of one stage run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// Local audio file, either downloaded (`source_url` set) or picked by
    /// the user (`source_url == None`).
    AudioFile {
        path: PathBuf,
        source_url: Option<String>,
    },
    /// Full transcript of an audio file.
    Transcript {
        text: String,
        source_audio_path: PathBuf,
        /// Detected (or configured) ISO-639-1 language code.
        language: String,
    },
    /// Final summary text.
    Summary {
        text: String,
        /// Word count of the text that was summarized.
        source_transcript_length: usize,
        provider: ProviderKind,
    },
}

impl Artifact {
    /// The stage that produces this kind of artifact.
    pub fn stage(&self) -> Stage {
        match self {
            Artifact::AudioFile { .. } => Stage::Fetch,
            Artifact::Transcript { .. } => Stage::Transcribe,
            Artifact::Summary { .. } => Stage::Summarize,
        }
    }

    /// The local file path, for `AudioFile` artifacts.
    pub fn audio_path(&self) -> Option<&Path> {
        match self {
            Artifact::AudioFile { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The text payload, for `Transcript` and `Summary` artifacts.
    pub fn text(&self) -> Option<&str> {
        match self {
            Artifact::Transcript { text, .. } | Artifact::Summary { text, .. } => Some(text),
            Artifact::AudioFile { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// Transient progress report forwarded from a worker to the control thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    /// 0–100, or `None` when the capability cannot tell.
    pub percent: Option<f32>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, percent: Option<f32>, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.map(|p| p.clamp(0.0, 100.0)),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.percent.is_none()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
