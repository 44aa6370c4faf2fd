//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.
//! Every section is `#[serde(default)]`, so a hand-edited file that only sets
//! a few keys still loads.
//!
//! API credentials are deliberately absent: they live only in the in-memory
//! [`PipelineStore`](crate::pipeline::PipelineStore).

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::stt::ModelSize;

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Selects which remote language-model API produces summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Claude,
    /// OpenAI chat-completions API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini `generateContent` API.
    Gemini,
    /// DeepSeek (OpenAI-compatible chat-completions).
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl ProviderKind {
    /// All supported providers, in display order.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Claude,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
        ProviderKind::DeepSeek,
    ];

    /// Human-readable provider name.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "Claude",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::DeepSeek => "DeepSeek",
        }
    }

    /// Environment variable the CLI reads the API key from.
    pub fn env_var(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        Self::Claude
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// FetchConfig
// ---------------------------------------------------------------------------

/// Settings for the remote-audio download step (yt-dlp).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Name or path of the yt-dlp executable.
    pub program: String,
    /// Directory (or binary path) handed to yt-dlp's `--ffmpeg-location`.
    /// `None` lets yt-dlp search `PATH`.
    pub ffmpeg_location: Option<PathBuf>,
    /// Target audio codec for the extracted file.
    pub audio_format: String,
    /// Target audio bitrate passed to `--audio-quality`.
    pub audio_quality: String,
    /// Default destination directory.  `None` means `AppPaths::downloads_dir`.
    pub download_dir: Option<PathBuf>,
    /// Download only the single video when the URL points into a playlist.
    pub no_playlist: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".into(),
            ffmpeg_location: None,
            audio_format: "mp3".into(),
            audio_quality: "192K".into(),
            download_dir: None,
            no_playlist: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SttConfig
// ---------------------------------------------------------------------------

/// Settings for the Whisper transcription step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Which Whisper model to load.
    pub model_size: ModelSize,
    /// ISO-639-1 language code, or `"auto"` for Whisper's language detection.
    pub language: String,
    /// Name or path of the ffmpeg executable used to decode input audio.
    pub ffmpeg_program: String,
    /// Seconds of audio handed to Whisper per inference window.  Cancellation
    /// is checked between windows, so this bounds cancel latency.
    pub window_secs: u32,
    /// CPU threads for inference.  `None` picks a value from the host.
    pub n_threads: Option<i32>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model_size: ModelSize::default(),
            language: "auto".into(),
            ffmpeg_program: "ffmpeg".into(),
            window_secs: 30,
            n_threads: None,
        }
    }
}

// ---------------------------------------------------------------------------
// EndpointConfig / SummarizeConfig
// ---------------------------------------------------------------------------

/// Connection details for one summary provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the API, without a trailing slash.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
}

impl EndpointConfig {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

/// Settings for the summarization step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeConfig {
    /// Selected provider.
    pub provider: ProviderKind,
    /// Word threshold above which the input is chunked.
    pub chunk_words: usize,
    /// `max_tokens` requested from the provider per call.
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub claude: EndpointConfig,
    pub openai: EndpointConfig,
    pub gemini: EndpointConfig,
    pub deepseek: EndpointConfig,
}

impl SummarizeConfig {
    /// Endpoint settings for `kind`.
    pub fn endpoint(&self, kind: ProviderKind) -> &EndpointConfig {
        match kind {
            ProviderKind::Claude => &self.claude,
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::DeepSeek => &self.deepseek,
        }
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            chunk_words: 4_000,
            max_tokens: 4_000,
            timeout_secs: 120,
            claude: EndpointConfig::new("https://api.anthropic.com", "claude-sonnet-4-20250514"),
            openai: EndpointConfig::new("https://api.openai.com", "gpt-4o"),
            gemini: EndpointConfig::new(
                "https://generativelanguage.googleapis.com",
                "gemini-2.0-flash-exp",
            ),
            deepseek: EndpointConfig::new("https://api.deepseek.com", "deepseek-chat"),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use video_synthesis::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Download settings.
    pub fetch: FetchConfig,
    /// Transcription settings.
    pub stt: SttConfig,
    /// Summarization settings.
    pub summarize: SummarizeConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Destination directory for downloads: the configured one, else the
    /// platform data directory.
    pub fn download_dir(&self, paths: &AppPaths) -> PathBuf {
        self.fetch
            .download_dir
            .clone()
            .unwrap_or_else(|| paths.downloads_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
