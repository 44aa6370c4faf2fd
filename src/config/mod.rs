//! Configuration module for VideoSynthesis.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for each stage,
//! `AppPaths` for cross-platform data directories, TOML persistence via
//! `AppConfig::load` / `AppConfig::save`, and the [`PipelineSettings`]
//! collaborator the pipeline consults when a stage starts.

pub mod capabilities;
pub mod paths;
pub mod settings;

pub use capabilities::{command_exists, CapabilityFlags, ConfigSettings, PipelineSettings};
pub use paths::AppPaths;
pub use settings::{
    AppConfig, EndpointConfig, FetchConfig, ProviderKind, SttConfig, SummarizeConfig,
};
