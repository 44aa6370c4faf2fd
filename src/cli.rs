//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use video_synthesis::config::ProviderKind;
use video_synthesis::stt::ModelSize;

#[derive(Debug, Parser)]
#[command(
    name = "video-synthesis",
    version,
    about = "Download a video's audio, transcribe it and summarize the transcript"
)]
pub struct Cli {
    /// Write log records to the application log file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run fetch → transcribe → summarize.
    Run(RunArgs),
    /// Show which runtimes are installed and where files live.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Write the default settings file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// List or install Whisper model files.
    Models {
        #[command(subcommand)]
        action: ModelsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    /// Show every model size and whether its file is installed.
    List,
    /// Download a model file into the models directory.
    Download {
        /// base, medium or large.
        #[arg(value_parser = parse_model)]
        size: ModelSize,
        /// Download even when the file is already present.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Video URLs to download, processed in order.
    #[arg(
        required_unless_present_any = ["audio", "text_file"],
        conflicts_with_all = ["audio", "text_file"]
    )]
    pub urls: Vec<String>,

    /// Transcribe local audio files instead of downloading.  Repeatable.
    #[arg(long, conflicts_with = "text_file")]
    pub audio: Vec<PathBuf>,

    /// Summarize the contents of a text file.
    #[arg(long)]
    pub text_file: Option<PathBuf>,

    /// Download directory (default: configured or platform data dir).
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Whisper model: base, medium or large.
    #[arg(long, value_parser = parse_model)]
    pub model: Option<ModelSize>,

    /// Summary provider: claude, openai, gemini or deepseek.
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,

    /// API key for the provider.  Falls back to the provider's environment
    /// variable.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Stop after transcription.
    #[arg(long)]
    pub no_summary: bool,

    /// Print events and the final state as JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// Where one item of a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    Url(String),
    Audio(PathBuf),
    Text(PathBuf),
}

impl RunInput {
    pub fn label(&self) -> String {
        match self {
            RunInput::Url(url) => url.clone(),
            RunInput::Audio(path) | RunInput::Text(path) => path.display().to_string(),
        }
    }
}

impl RunArgs {
    /// Items to process, in command-line order.
    pub fn inputs(&self) -> Vec<RunInput> {
        let urls = self.urls.iter().cloned().map(RunInput::Url);
        let audio = self.audio.iter().cloned().map(RunInput::Audio);
        let text = self.text_file.iter().cloned().map(RunInput::Text);
        urls.chain(audio).chain(text).collect()
    }
}

fn parse_model(s: &str) -> Result<ModelSize, String> {
    ModelSize::from_label(s).ok_or_else(|| format!("unknown model size {s:?} (base, medium, large)"))
}

fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    let wanted = s.trim().to_ascii_lowercase();
    ProviderKind::ALL
        .into_iter()
        .find(|p| p.label().to_ascii_lowercase() == wanted)
        .ok_or_else(|| format!("unknown provider {s:?} (claude, openai, gemini, deepseek)"))
}
