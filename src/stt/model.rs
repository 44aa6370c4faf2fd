//! Whisper model registry, metadata and path resolution.
//!
//! [`WHISPER_MODELS`] lists the three sizes the settings layer can select.
//! [`ModelPaths`] resolves where a model's GGML file lives given an
//! [`crate::config::AppPaths`] instance, and installs missing files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::config::AppPaths;
use crate::pipeline::CancelToken;

const LOG_TARGET: &str = "video_synthesis::models";

// ---------------------------------------------------------------------------
// ModelSize
// ---------------------------------------------------------------------------

/// Capacity tier of a multilingual Whisper model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    /// ~142 MB file. Fast, good enough for clear speech.
    #[default]
    Base,
    /// ~1.5 GB file. Balanced.
    Medium,
    /// ~3.1 GB file (large-v3). Most accurate, slowest.
    Large,
}

impl ModelSize {
    pub const ALL: [ModelSize; 3] = [ModelSize::Base, ModelSize::Medium, ModelSize::Large];

    pub fn label(self) -> &'static str {
        match self {
            ModelSize::Base => "base",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }

    /// Registry entry for this size.
    pub fn info(self) -> &'static ModelInfo {
        match self {
            ModelSize::Base => &WHISPER_MODELS[0],
            ModelSize::Medium => &WHISPER_MODELS[1],
            ModelSize::Large => &WHISPER_MODELS[2],
        }
    }

    /// Parse a CLI-style label (`"base"`, `"medium"`, `"large"`, `"large-v3"`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "base" => Some(ModelSize::Base),
            "medium" => Some(ModelSize::Medium),
            "large" | "large-v3" => Some(ModelSize::Large),
            _ => None,
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ModelInfo
// ---------------------------------------------------------------------------

/// Static metadata for a single GGML model file.
#[derive(Debug)]
pub struct ModelInfo {
    pub size: ModelSize,
    pub display_name: &'static str,
    /// File name under the models directory.
    pub file_name: &'static str,
    pub file_size_mb: u64,
    pub source_url: &'static str,
}

/// Multilingual whisper.cpp models, indexed in [`ModelSize`] order.
pub const WHISPER_MODELS: &[ModelInfo] = &[
    ModelInfo {
        size: ModelSize::Base,
        display_name: "Whisper Base (fast)",
        file_name: "ggml-base.bin",
        file_size_mb: 142,
        source_url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin",
    },
    ModelInfo {
        size: ModelSize::Medium,
        display_name: "Whisper Medium (balanced)",
        file_name: "ggml-medium.bin",
        file_size_mb: 1_530,
        source_url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-medium.bin",
    },
    ModelInfo {
        size: ModelSize::Large,
        display_name: "Whisper Large-v3 (accurate)",
        file_name: "ggml-large-v3.bin",
        file_size_mb: 3_100,
        source_url: "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-large-v3.bin",
    },
];

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Model server returned HTTP {status}")]
    Http { status: u16 },

    #[error("Model download failed: {0}")]
    Network(String),

    /// The connection closed before `Content-Length` bytes arrived.
    #[error("Model download truncated: got {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("Cannot write model file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model download cancelled")]
    Cancelled,
}

/// Download progress sink: `(bytes received, total bytes if known)`.
pub type DownloadProgress<'a> = &'a mut dyn FnMut(u64, Option<u64>);

// ---------------------------------------------------------------------------
// ModelPaths
// ---------------------------------------------------------------------------

/// Resolves the on-disk location of model files.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub models_dir: PathBuf,
}

impl ModelPaths {
    pub fn from_app_paths(app_paths: &AppPaths) -> Self {
        Self {
            models_dir: app_paths.models_dir.clone(),
        }
    }

    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    pub fn model_path(&self, model: &ModelInfo) -> PathBuf {
        self.models_dir.join(model.file_name)
    }

    pub fn is_available(&self, model: &ModelInfo) -> bool {
        self.model_path(model).exists()
    }

    /// Where an in-progress download of `model` is written.
    pub fn partial_path(&self, model: &ModelInfo) -> PathBuf {
        self.models_dir.join(format!("{}.part", model.file_name))
    }

    /// Fetch `model` from its `source_url` into the models directory.
    ///
    /// The body is streamed into `<file>.part`, which is renamed into place
    /// only once complete.  On any error (cancellation included) the partial
    /// file is removed and an existing model file is left untouched.
    pub async fn download(
        &self,
        model: &ModelInfo,
        progress: DownloadProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, DownloadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        self.download_from(&client, model.source_url, model, progress, cancel)
            .await
    }

    pub(crate) async fn download_from(
        &self,
        client: &reqwest::Client,
        url: &str,
        model: &ModelInfo,
        progress: DownloadProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        tokio::fs::create_dir_all(&self.models_dir).await?;
        let dest = self.model_path(model);
        let part = self.partial_path(model);
        log::info!(target: LOG_TARGET, "Downloading {} from {url}", model.display_name);

        let mut response = client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
            });
        }
        let total = response.content_length();

        let mut file = tokio::fs::File::create(&part).await?;
        let mut received = 0u64;
        let streamed: Result<(), DownloadError> = async {
            while let Some(bytes) = response
                .chunk()
                .await
                .map_err(|e| DownloadError::Network(e.to_string()))?
            {
                if cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                file.write_all(&bytes).await?;
                received += bytes.len() as u64;
                progress(received, total);
            }
            file.flush().await?;
            match total {
                Some(expected) if received != expected => Err(DownloadError::Truncated {
                    received,
                    expected,
                }),
                _ => Ok(()),
            }
        }
        .await;
        drop(file);

        if let Err(e) = streamed {
            log::warn!(target: LOG_TARGET, "Download of {} stopped: {e}", model.file_name);
            remove_partial(&part).await;
            return Err(e);
        }

        tokio::fs::rename(&part, &dest).await?;
        log::info!(
            target: LOG_TARGET,
            "Installed {} ({received} bytes)",
            dest.display()
        );
        Ok(dest)
    }

    /// Model sizes whose files are present on disk.
    pub fn list_local_models(&self) -> Vec<&'static ModelInfo> {
        WHISPER_MODELS
            .iter()
            .filter(|m| self.is_available(m))
            .collect()
    }
}

async fn remove_partial(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!(target: LOG_TARGET, "Cannot remove {}: {e}", part.display());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
