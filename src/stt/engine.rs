//! Transcribe capability: the [`Transcriber`] trait and its Whisper
//! implementation.
//!
//! [`WhisperTranscriber`] decodes the input with ffmpeg, then feeds Whisper
//! one window of `window_secs` seconds at a time.  The cancel flag is
//! checked before every window, so cancel latency is bounded by the time
//! one window takes to infer.
//!
//! [`MockTranscriber`] (available under `#[cfg(test)]`) returns a
//! pre-configured result without loading any model file.

use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use whisper_rs::{FullParams, WhisperContext, WhisperContextParameters, WhisperState};

use super::decode::decode_to_pcm;
use super::model::{ModelPaths, ModelSize};
use super::transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult, SAMPLE_RATE};
use crate::pipeline::CancelToken;

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// The GGML model file for the selected size is not on disk.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Whisper context initialisation failed: {0}")]
    ContextInit(String),

    #[error("Audio file not found: {0}")]
    InputNotFound(String),

    /// ffmpeg could not decode the input.
    #[error("Could not decode audio: {0}")]
    Decode(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Transcription cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Transcriber trait
// ---------------------------------------------------------------------------

/// Progress sink handed to a transcriber: `(percent, message)`.
pub type TranscribeProgress<'a> = &'a mut dyn FnMut(Option<f32>, &str);

/// Object-safe, thread-safe speech-to-text capability.
///
/// Implementations must poll `cancel` at least once per window of audio and
/// return [`SttError::Cancelled`] once it is raised.
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        path: &Path,
        model: ModelSize,
        progress: TranscribeProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult, SttError>;
}

const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Transcriber>) {}
};

/// Trailing windows shorter than this (0.5 s) are dropped unless they are
/// the only audio; Whisper tends to hallucinate on near-silent slivers.
const MIN_WINDOW_SAMPLES: usize = SAMPLE_RATE / 2;

// ---------------------------------------------------------------------------
// WhisperTranscriber
// ---------------------------------------------------------------------------

/// Production transcriber backed by `whisper_rs`.
///
/// The most recently used model stays loaded; switching size reloads.
pub struct WhisperTranscriber {
    models: ModelPaths,
    params: TranscribeParams,
    ffmpeg: String,
    loaded: Mutex<Option<(ModelSize, Arc<WhisperContext>)>>,
}

// SAFETY: whisper-rs declares WhisperContext Send + Sync; the weights are
// read-only after loading and every call creates its own WhisperState.
unsafe impl Send for WhisperTranscriber {}
unsafe impl Sync for WhisperTranscriber {}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("models_dir", &self.models.models_dir)
            .field("params", &self.params)
            .field("ffmpeg", &self.ffmpeg)
            .finish_non_exhaustive()
    }
}

impl WhisperTranscriber {
    pub fn new(models: ModelPaths, params: TranscribeParams, ffmpeg: impl Into<String>) -> Self {
        Self {
            models,
            params,
            ffmpeg: ffmpeg.into(),
            loaded: Mutex::new(None),
        }
    }

    fn context(&self, size: ModelSize) -> Result<Arc<WhisperContext>, SttError> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| SttError::ContextInit("model cache poisoned".into()))?;

        if let Some((cached, ctx)) = loaded.as_ref() {
            if *cached == size {
                return Ok(Arc::clone(ctx));
            }
        }

        let path = self.models.model_path(size.info());
        if !path.exists() {
            return Err(SttError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path.to_str().ok_or_else(|| {
            SttError::ModelNotFound(format!(
                "model path contains non-UTF-8 characters: {}",
                path.display()
            ))
        })?;

        log::info!(target: "video_synthesis::transcribe", "Loading Whisper model: {}", path.display());
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| SttError::ContextInit(e.to_string()))?;
        let ctx = Arc::new(ctx);
        *loaded = Some((size, Arc::clone(&ctx)));
        Ok(ctx)
    }

    fn full_params<'a>(&self, language: Option<&'a str>) -> FullParams<'a, 'a> {
        use whisper_rs::SamplingStrategy as WS;
        let strategy = match self.params.strategy {
            SamplingStrategy::Greedy { best_of } => WS::Greedy { best_of },
            SamplingStrategy::BeamSearch { beam_size, patience } => {
                WS::BeamSearch { beam_size, patience }
            }
        };

        let mut fp = FullParams::new(strategy);
        fp.set_language(language);
        fp.set_n_threads(self.params.n_threads);
        fp.set_print_progress(false);
        fp.set_print_realtime(false);
        fp.set_print_special(false);
        fp.set_print_timestamps(false);
        fp
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(
        &self,
        path: &Path,
        model: ModelSize,
        progress: TranscribeProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult, SttError> {
        progress(Some(10.0), "Loading Whisper model...");
        let ctx = self.context(model)?;
        check(cancel)?;

        let audio = decode_to_pcm(&self.ffmpeg, path, cancel)?;
        check(cancel)?;

        progress(Some(30.0), &format!("Transcribing with {model} model..."));
        let mut state = ctx
            .create_state()
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        let windows = split_windows(&audio, self.params.window_samples());
        let total = windows.len();
        let total_secs = audio.len() / SAMPLE_RATE;
        let wall_start = std::time::Instant::now();

        let mut language: Option<String> = self.params.fixed_language().map(str::to_owned);
        let mut text = String::new();
        let mut segments = Vec::new();
        let mut offset_samples = 0usize;

        for (i, window) in windows.iter().enumerate() {
            check(cancel)?;

            // Pin the language detected on the first window for the rest.
            let fp = self.full_params(language.as_deref());
            state
                .full(fp, window)
                .map_err(|e| SttError::Transcription(e.to_string()))?;

            if language.is_none() {
                language = detected_language(&state);
            }

            let offset_ms = (offset_samples * 1000 / SAMPLE_RATE) as u64;
            collect_segments(&state, offset_ms, &mut text, &mut segments)?;
            offset_samples += window.len();

            let done_secs = offset_samples / SAMPLE_RATE;
            let percent = 30.0 + 70.0 * (i + 1) as f32 / total as f32;
            progress(
                Some(percent),
                &format!("Transcribed {done_secs}s of {total_secs}s"),
            );
        }

        let language = language.unwrap_or_else(|| "unknown".into());
        log::info!(
            target: "video_synthesis::transcribe",
            "Transcription successful. Length: {} characters, language: {language}",
            text.trim().chars().count()
        );

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            language,
            segments,
            duration_ms: wall_start.elapsed().as_millis(),
        })
    }
}

fn check(cancel: &CancelToken) -> Result<(), SttError> {
    if cancel.is_cancelled() {
        Err(SttError::Cancelled)
    } else {
        Ok(())
    }
}

/// Cut `audio` into windows of `window` samples.  A short trailing sliver is
/// dropped when it is not the only window.
fn split_windows(audio: &[f32], window: usize) -> Vec<&[f32]> {
    let mut windows: Vec<&[f32]> = audio.chunks(window.max(1)).collect();
    if windows.len() > 1 {
        if let Some(last) = windows.last() {
            if last.len() < MIN_WINDOW_SAMPLES {
                windows.pop();
            }
        }
    }
    windows
}

fn detected_language(state: &WhisperState) -> Option<String> {
    let id = state.full_lang_id_from_state().ok()?;
    whisper_rs::get_lang_str(id).map(str::to_owned)
}

fn collect_segments(
    state: &WhisperState,
    offset_ms: u64,
    text: &mut String,
    segments: &mut Vec<Segment>,
) -> Result<(), SttError> {
    let n = state
        .full_n_segments()
        .map_err(|e| SttError::Transcription(e.to_string()))?;

    for i in 0..n {
        let seg_text = state
            .full_get_segment_text(i)
            .map_err(|e| SttError::Transcription(format!("segment {i}: {e}")))?;
        // Centiseconds → milliseconds.
        let t0 = state.full_get_segment_t0(i).unwrap_or(0).max(0) as u64 * 10;
        let t1 = state.full_get_segment_t1(i).unwrap_or(0).max(0) as u64 * 10;

        text.push_str(&seg_text);
        segments.push(Segment {
            text: seg_text,
            start_ms: offset_ms + t0,
            end_ms: offset_ms + t1,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// MockTranscriber  (test-only)
// ---------------------------------------------------------------------------

/// Test double.  Records every call; optionally blocks until cancelled.
#[cfg(test)]
pub struct MockTranscriber {
    response: Result<TranscriptionResult, SttError>,
    hang_until_cancelled: bool,
    pub calls: Mutex<Vec<(std::path::PathBuf, ModelSize)>>,
}

#[cfg(test)]
impl MockTranscriber {
    pub fn ok(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            response: Ok(TranscriptionResult {
                text: text.into(),
                language: language.into(),
                segments: Vec::new(),
                duration_ms: 0,
            }),
            hang_until_cancelled: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn err(error: SttError) -> Self {
        Self {
            response: Err(error),
            hang_until_cancelled: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Loops, checking the cancel flag every few milliseconds, until
    /// cancelled.
    pub fn hanging() -> Self {
        Self {
            hang_until_cancelled: true,
            ..Self::ok("", "en")
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
impl Transcriber for MockTranscriber {
    fn transcribe(
        &self,
        path: &Path,
        model: ModelSize,
        progress: TranscribeProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<TranscriptionResult, SttError> {
        self.calls.lock().unwrap().push((path.to_path_buf(), model));
        progress(Some(50.0), "mock window");
        while self.hang_until_cancelled {
            check(cancel)?;
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        self.response.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
