//! Transcription parameters and result types.
//!
//! [`TranscribeParams`] carries everything that controls a Whisper run apart
//! from the model size, which the pipeline supplies per call.
//! [`TranscriptionResult`] is what every [`Transcriber`](super::Transcriber)
//! returns.

use crate::config::SttConfig;

/// Samples per second expected by Whisper.
pub const SAMPLE_RATE: usize = 16_000;

// ---------------------------------------------------------------------------
// SamplingStrategy
// ---------------------------------------------------------------------------

/// Owned mirror of `whisper_rs::SamplingStrategy`.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingStrategy {
    Greedy { best_of: i32 },
    BeamSearch { beam_size: i32, patience: f32 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Greedy { best_of: 1 }
    }
}

// ---------------------------------------------------------------------------
// TranscribeParams
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TranscribeParams {
    /// ISO-639-1 code, or `"auto"` to detect from the first window.
    pub language: String,
    pub strategy: SamplingStrategy,
    pub n_threads: i32,
    /// Seconds of audio per inference window.  Cancellation is observed
    /// between windows.
    pub window_secs: u32,
}

impl Default for TranscribeParams {
    fn default() -> Self {
        Self {
            language: "auto".into(),
            strategy: SamplingStrategy::default(),
            n_threads: optimal_threads(),
            window_secs: 30,
        }
    }
}

impl TranscribeParams {
    pub fn from_config(cfg: &SttConfig) -> Self {
        Self {
            language: cfg.language.clone(),
            strategy: SamplingStrategy::default(),
            n_threads: cfg.n_threads.unwrap_or_else(optimal_threads),
            window_secs: cfg.window_secs.max(1),
        }
    }

    /// `None` when Whisper should detect the language itself.
    pub fn fixed_language(&self) -> Option<&str> {
        match self.language.trim() {
            "" | "auto" => None,
            lang => Some(lang),
        }
    }

    pub fn window_samples(&self) -> usize {
        self.window_secs.max(1) as usize * SAMPLE_RATE
    }
}

/// Threads handed to Whisper: available parallelism, capped at 8.
pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Full transcript, trimmed.
    pub text: String,
    /// Detected or configured ISO-639-1 language code.
    pub language: String,
    pub segments: Vec<Segment>,
    /// Wall-clock inference time.
    pub duration_ms: u128,
}

/// A time-aligned piece of the transcript.  Times are relative to the start
/// of the whole file, not the inference window.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}
