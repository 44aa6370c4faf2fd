//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\video-synthesis\
//!   macOS:   ~/Library/Application Support/video-synthesis/
//!   Linux:   ~/.config/video-synthesis/
//!
//! Data dir (models, downloads, log file):
//!   Windows: %LOCALAPPDATA%\video-synthesis\
//!   macOS:   ~/Library/Application Support/video-synthesis/
//!   Linux:   ~/.local/share/video-synthesis/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory for downloaded GGML model files.
    pub models_dir: PathBuf,
    /// Default destination for fetched audio.
    pub downloads_dir: PathBuf,
    /// Log file used when the CLI runs with `--log-file`.
    pub log_file: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "video-synthesis";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            models_dir: data_dir.join("models"),
            downloads_dir: data_dir.join("downloads"),
            log_file: data_dir.join("app.log"),
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
