//! Settings collaborator: installed-runtime flags plus the user's current
//! model-size and provider selection.
//!
//! The pipeline only talks to [`PipelineSettings`]; [`AppConfig`] implements
//! it by probing `PATH` for the external programs and checking that the
//! selected Whisper model file is on disk.

use serde::Serialize;

use super::{AppConfig, AppPaths, ProviderKind};
use crate::stt::{ModelPaths, ModelSize};

/// Which external runtimes are usable right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityFlags {
    /// yt-dlp is installed.
    pub fetch_available: bool,
    /// ffmpeg is installed and the selected Whisper model is downloaded.
    pub transcribe_available: bool,
}

impl CapabilityFlags {
    /// Every runtime present.  Handy for tests and for callers that bring
    /// their own capability adapters.
    pub const ALL: CapabilityFlags = CapabilityFlags {
        fetch_available: true,
        transcribe_available: true,
    };
}

/// Values the pipeline reads from the settings layer at stage start.
pub trait PipelineSettings {
    fn capabilities(&self) -> CapabilityFlags;
    fn model_size(&self) -> ModelSize;
    fn provider(&self) -> ProviderKind;
}

/// Returns `true` when `program` resolves to an executable.
pub fn command_exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// [`AppConfig`] bound to resolved [`AppPaths`].
#[derive(Debug, Clone)]
pub struct ConfigSettings {
    pub config: AppConfig,
    pub paths: AppPaths,
}

impl ConfigSettings {
    pub fn new(config: AppConfig, paths: AppPaths) -> Self {
        Self { config, paths }
    }
}

impl PipelineSettings for ConfigSettings {
    fn capabilities(&self) -> CapabilityFlags {
        let models = ModelPaths::from_app_paths(&self.paths);
        let model_present = models.is_available(self.config.stt.model_size.info());

        CapabilityFlags {
            fetch_available: command_exists(&self.config.fetch.program),
            transcribe_available: model_present
                && command_exists(&self.config.stt.ffmpeg_program),
        }
    }

    fn model_size(&self) -> ModelSize {
        self.config.stt.model_size
    }

    fn provider(&self) -> ProviderKind {
        self.config.summarize.provider
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_not_found() {
        assert!(!command_exists("definitely-not-a-real-program-7f3a"));
    }

    #[test]
    fn missing_model_disables_transcription() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = AppPaths::new();
        paths.models_dir = dir.path().to_path_buf();

        let settings = ConfigSettings::new(AppConfig::default(), paths);
        assert!(!settings.capabilities().transcribe_available);
    }

    #[test]
    fn missing_fetch_program_disables_fetch() {
        let mut config = AppConfig::default();
        config.fetch.program = "definitely-not-yt-dlp-7f3a".into();

        let settings = ConfigSettings::new(config, AppPaths::new());
        assert!(!settings.capabilities().fetch_available);
    }

    #[test]
    fn selections_come_from_config() {
        let mut config = AppConfig::default();
        config.stt.model_size = ModelSize::Medium;
        config.summarize.provider = ProviderKind::DeepSeek;

        let settings = ConfigSettings::new(config, AppPaths::new());
        assert_eq!(settings.model_size(), ModelSize::Medium);
        assert_eq!(settings.provider(), ProviderKind::DeepSeek);
    }
}
