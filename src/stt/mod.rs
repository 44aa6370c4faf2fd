//! Transcribe capability.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Transcriber (trait)                      │
//! │                                                          │
//! │   ┌─────────────┐    ┌────────────────────┐              │
//! │   │  ModelPaths │    │ WhisperTranscriber │              │
//! │   │ - resolve   │───▶│ - cached context   │              │
//! │   │ - exists?   │    │ - params           │              │
//! │   └─────────────┘    └─────────┬──────────┘              │
//! │                                │                         │
//! │                                ▼                         │
//! │        decode_to_pcm (ffmpeg) → windows → Whisper        │
//! │        cancel checked between windows                    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod decode;
pub mod engine;
pub mod model;
pub mod transcribe;

pub use decode::decode_to_pcm;
pub use engine::{SttError, TranscribeProgress, Transcriber, WhisperTranscriber};
pub use model::{DownloadError, DownloadProgress, ModelInfo, ModelPaths, ModelSize, WHISPER_MODELS};
pub use transcribe::{SamplingStrategy, Segment, TranscribeParams, TranscriptionResult};

#[cfg(test)]
pub use engine::MockTranscriber;
