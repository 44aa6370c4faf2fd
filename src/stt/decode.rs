//! Audio decoding: any container ffmpeg understands → 16 kHz mono f32 PCM.

use std::path::Path;

use super::engine::SttError;
use super::transcribe::SAMPLE_RATE;
use crate::pipeline::CancelToken;
use crate::process::{self, ProcessError};

/// ffmpeg arguments that write raw little-endian f32 samples to stdout.
fn ffmpeg_args(input: &Path) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-f".into(),
        "f32le".into(),
        "-acodec".into(),
        "pcm_f32le".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        SAMPLE_RATE.to_string(),
        "-".into(),
    ]
}

/// Decode `input` with `ffmpeg`.  Killed if `cancel` is raised.
pub fn decode_to_pcm(
    ffmpeg: &str,
    input: &Path,
    cancel: &CancelToken,
) -> Result<Vec<f32>, SttError> {
    if !input.is_file() {
        return Err(SttError::InputNotFound(input.display().to_string()));
    }

    let output = process::run_cancellable(ffmpeg, &ffmpeg_args(input), cancel).map_err(
        |e| match e {
            ProcessError::Cancelled => SttError::Cancelled,
            ProcessError::Failed { stderr, .. } => SttError::Decode(stderr),
            ProcessError::Missing(program) => {
                SttError::Transcription(format!("{program} is not installed"))
            }
            ProcessError::Io { program, source } => {
                SttError::Transcription(format!("{program}: {source}"))
            }
        },
    )?;

    let samples = pcm_from_le_bytes(&output.stdout);
    if samples.is_empty() {
        return Err(SttError::Decode(format!(
            "{} contains no audio stream",
            input.display()
        )));
    }
    Ok(samples)
}

/// Reinterpret f32le bytes; a trailing partial sample is dropped.
pub fn pcm_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
