//! Application entry point — VideoSynthesis CLI.
//!
//! # Run sequence
//!
//! 1. Parse arguments and initialise logging.
//! 2. Load [`AppConfig`] from disk (default on first run) and apply overrides.
//! 3. Build a multi-thread tokio runtime for the summary providers.  It is
//!    never entered on this thread; the pipeline blocks here while pumping.
//! 4. Build the [`Pipeline`], load the API key into its store, install the
//!    observer and the Ctrl+C handler.
//! 5. Drive every item through the stages in turn, then print a per-item
//!    status summary.

mod cli;

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use thiserror::Error;

use cli::{Cli, Command, ModelsCommand, RunArgs, RunInput};
use video_synthesis::config::{AppConfig, AppPaths, ConfigSettings, PipelineSettings};
use video_synthesis::llm::Credential;
use video_synthesis::pipeline::{
    Artifact, CancelToken, Capabilities, Pipeline, PipelineEvent, Stage, TaskHandle,
};
use video_synthesis::stt::{ModelPaths, ModelSize, WHISPER_MODELS};

/// Token of the stage currently running, for the Ctrl+C handler.
type CurrentTask = Arc<Mutex<Option<CancelToken>>>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::new();
    init_logging(cli.log_file, &paths)?;

    match cli.command {
        Command::Run(args) => run(args, paths),
        Command::Status { json } => status(&paths, json),
        Command::InitConfig { force } => init_config(&paths, force),
        Command::Models { action } => models(&paths, action),
    }
}

fn init_logging(to_file: bool, paths: &AppPaths) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if to_file {
        if let Some(parent) = paths.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log_file)
            .with_context(|| format!("cannot open log file {}", paths.log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn load_config() -> AppConfig {
    AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Terminal event seen for a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Completed,
    Failed,
    Cancelled,
}

type LastSettled = Rc<RefCell<Option<(Stage, Settled)>>>;

#[derive(Debug, Error)]
#[error("{0} cancelled")]
struct StageCancelled(Stage);

#[derive(Debug)]
enum ItemStatus {
    Done,
    Failed(String),
    Cancelled,
    Skipped,
}

impl ItemStatus {
    fn label(&self) -> &'static str {
        match self {
            ItemStatus::Done => "ok",
            ItemStatus::Failed(_) => "failed",
            ItemStatus::Cancelled => "cancelled",
            ItemStatus::Skipped => "skipped",
        }
    }
}

/// One pipeline shared by every item of a run.
struct Batch {
    pipeline: Pipeline,
    current: CurrentTask,
    settled: LastSettled,
    dest: PathBuf,
    no_summary: bool,
}

fn run(args: RunArgs, paths: AppPaths) -> Result<()> {
    let inputs = args.inputs();
    if inputs.is_empty() {
        bail!("nothing to do: give URLs, --audio or --text-file");
    }

    let mut config = load_config();
    if let Some(model) = args.model {
        config.stt.model_size = model;
    }
    if let Some(provider) = args.provider {
        config.summarize.provider = provider;
    }
    let provider = config.summarize.provider;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let mut pipeline = Pipeline::new(
        Capabilities::from_config(&config, &paths),
        Box::new(ConfigSettings::new(config.clone(), paths.clone())),
        runtime.handle().clone(),
    )?;

    let key = args
        .api_key
        .clone()
        .or_else(|| std::env::var(provider.env_var()).ok());
    if let Some(key) = key {
        pipeline.set_credential(provider, Credential::new(key))?;
    }

    let json_output = args.json;
    let settled: LastSettled = Rc::new(RefCell::new(None));
    {
        let settled = Rc::clone(&settled);
        pipeline.set_observer(Box::new(move |event| {
            if let Some(outcome) = terminal(event) {
                *settled.borrow_mut() = Some(outcome);
            }
            report(event, json_output);
        }));
    }

    let current: CurrentTask = Arc::new(Mutex::new(None));
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let current = Arc::clone(&current);
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            if let Ok(slot) = current.lock() {
                if let Some(token) = slot.as_ref() {
                    eprintln!("Cancelling...");
                    token.cancel();
                }
            }
        })
        .context("failed to install Ctrl+C handler")?;
    }

    let mut batch = Batch {
        pipeline,
        current,
        settled,
        dest: args.dest.clone().unwrap_or_else(|| config.download_dir(&paths)),
        no_summary: args.no_summary,
    };

    let total = inputs.len();
    let mut statuses = Vec::with_capacity(total);
    for (i, input) in inputs.iter().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            statuses.push(ItemStatus::Skipped);
            continue;
        }
        if total > 1 {
            log::info!("Item {}/{total}: {}", i + 1, input.label());
        }

        let status = match batch.run_item(input) {
            Ok(stage) => {
                print_result(&batch.pipeline, input, stage, total > 1, json_output)?;
                ItemStatus::Done
            }
            Err(e) if e.downcast_ref::<StageCancelled>().is_some() => ItemStatus::Cancelled,
            Err(e) => {
                log::error!("{}: {e:#}", input.label());
                ItemStatus::Failed(format!("{e:#}"))
            }
        };
        if json_output && !matches!(status, ItemStatus::Done) {
            print_item_json(input, &status, None)?;
        }
        statuses.push(status);
    }

    batch.pipeline.clear_credentials();
    finish(&inputs, &statuses, json_output)
}

impl Batch {
    /// Drive one item to its last stage.
    fn run_item(&mut self, input: &RunInput) -> Result<Stage> {
        match input {
            RunInput::Url(url) => {
                let handle = self.pipeline.start_fetch(url, &self.dest)?;
                self.drive(handle)?;
                self.transcribe_and_summarize()
            }
            RunInput::Audio(path) => {
                self.pipeline.select_audio_file(path)?;
                self.transcribe_and_summarize()
            }
            RunInput::Text(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                self.pipeline.set_summary_input(text);
                let handle = self.pipeline.start_summarize()?;
                self.drive(handle)?;
                Ok(Stage::Summarize)
            }
        }
    }

    fn transcribe_and_summarize(&mut self) -> Result<Stage> {
        let handle = self.pipeline.start_transcribe()?;
        self.drive(handle)?;
        if self.no_summary {
            return Ok(Stage::Transcribe);
        }

        let handle = self.pipeline.start_summarize()?;
        self.drive(handle)?;
        Ok(Stage::Summarize)
    }

    /// Pump until `handle`'s stage settles; the terminal event decides the
    /// result, so a run that finishes despite Ctrl+C still counts.
    fn drive(&mut self, handle: TaskHandle) -> Result<()> {
        let stage = handle.stage();
        self.settled.borrow_mut().take();
        set_current(&self.current, Some(handle.cancel_token()));
        let result = self.pipeline.run_until_idle();
        set_current(&self.current, None);
        result?;

        let settled = *self.settled.borrow();
        match settled {
            Some((s, Settled::Completed)) if s == stage => Ok(()),
            Some((s, Settled::Failed)) if s == stage => match self.pipeline.last_failure(stage) {
                Some(failure) => bail!("{stage} failed: {failure}"),
                None => bail!("{stage} failed"),
            },
            _ => Err(StageCancelled(stage).into()),
        }
    }
}

fn terminal(event: &PipelineEvent) -> Option<(Stage, Settled)> {
    match event {
        PipelineEvent::Completed { stage, .. } => Some((*stage, Settled::Completed)),
        PipelineEvent::Failed { stage, .. } => Some((*stage, Settled::Failed)),
        PipelineEvent::Cancelled { stage } => Some((*stage, Settled::Cancelled)),
        PipelineEvent::Progress(_) | PipelineEvent::InputFilled { .. } => None,
    }
}

fn set_current(current: &CurrentTask, token: Option<CancelToken>) {
    if let Ok(mut slot) = current.lock() {
        *slot = token;
    }
}

fn print_result(
    pipeline: &Pipeline,
    input: &RunInput,
    stage: Stage,
    with_heading: bool,
    json_output: bool,
) -> Result<()> {
    if json_output {
        return print_item_json(input, &ItemStatus::Done, Some(pipeline));
    }
    if let Some(text) = pipeline.artifact(stage).as_ref().and_then(Artifact::text) {
        if with_heading {
            println!("==> {} <==", input.label());
        }
        println!("{text}");
        if with_heading {
            println!();
        }
    }
    Ok(())
}

fn print_item_json(input: &RunInput, status: &ItemStatus, pipeline: Option<&Pipeline>) -> Result<()> {
    let mut value = json!({ "item": input.label(), "status": status.label() });
    if let ItemStatus::Failed(reason) = status {
        value["error"] = json!(reason);
    }
    if let Some(pipeline) = pipeline {
        value["snapshot"] = serde_json::to_value(pipeline.snapshot())?;
    }
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

/// Print the per-item summary; error when any item did not complete.
fn finish(inputs: &[RunInput], statuses: &[ItemStatus], json_output: bool) -> Result<()> {
    if json_output {
        for (input, status) in inputs.iter().zip(statuses) {
            if matches!(status, ItemStatus::Skipped) {
                print_item_json(input, status, None)?;
            }
        }
    } else if inputs.len() > 1 {
        eprintln!("Summary:");
        for (input, status) in inputs.iter().zip(statuses) {
            match status {
                ItemStatus::Failed(reason) => {
                    eprintln!("  {:<9} {} ({reason})", status.label(), input.label())
                }
                _ => eprintln!("  {:<9} {}", status.label(), input.label()),
            }
        }
    }

    let incomplete = incomplete_count(statuses);
    match (incomplete, statuses.len()) {
        (0, _) => Ok(()),
        (1, 1) => match &statuses[0] {
            ItemStatus::Failed(reason) => bail!("{reason}"),
            other => bail!("{}", other.label()),
        },
        (n, total) => bail!("{n} of {total} items did not complete"),
    }
}

fn incomplete_count(statuses: &[ItemStatus]) -> usize {
    statuses
        .iter()
        .filter(|s| !matches!(s, ItemStatus::Done))
        .count()
}

fn report(event: &PipelineEvent, json_output: bool) {
    if json_output {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => log::warn!("cannot encode event: {e}"),
        }
        return;
    }

    match event {
        PipelineEvent::Progress(p) => match p.percent {
            Some(percent) => eprintln!("[{}] {percent:>5.1}% {}", p.stage, p.message),
            None => eprintln!("[{}]        {}", p.stage, p.message),
        },
        PipelineEvent::Completed { stage, artifact } => match artifact {
            Artifact::AudioFile { path, .. } => eprintln!("[{stage}] saved {}", path.display()),
            Artifact::Transcript { language, text, .. } => eprintln!(
                "[{stage}] {} words, language {language}",
                text.split_whitespace().count()
            ),
            Artifact::Summary { provider, .. } => eprintln!("[{stage}] done ({provider})"),
        },
        PipelineEvent::Failed { stage, failure } => eprintln!("[{stage}] failed: {failure}"),
        PipelineEvent::Cancelled { stage } => eprintln!("[{stage}] cancelled"),
        PipelineEvent::InputFilled { .. } => {}
    }
}

// ---------------------------------------------------------------------------
// models
// ---------------------------------------------------------------------------

fn models(paths: &AppPaths, action: ModelsCommand) -> Result<()> {
    let model_paths = ModelPaths::from_app_paths(paths);
    match action {
        ModelsCommand::List => {
            let local = model_paths.list_local_models();
            for info in WHISPER_MODELS {
                let location = if local.iter().any(|m| m.size == info.size) {
                    model_paths.model_path(info).display().to_string()
                } else {
                    "not installed".to_string()
                };
                println!(
                    "{:<7} {:<28} {:>6} MB  {location}",
                    info.size, info.display_name, info.file_size_mb
                );
            }
            Ok(())
        }
        ModelsCommand::Download { size, force } => download_model(&model_paths, size, force),
    }
}

fn download_model(model_paths: &ModelPaths, size: ModelSize, force: bool) -> Result<()> {
    let info = size.info();
    if model_paths.is_available(info) && !force {
        println!(
            "{} is already installed at {}",
            info.display_name,
            model_paths.model_path(info).display()
        );
        return Ok(());
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("Cancelling...");
            cancel.cancel();
        })
        .context("failed to install Ctrl+C handler")?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    eprintln!("Downloading {} (~{} MB)", info.display_name, info.file_size_mb);
    let mut last_percent = None;
    let mut progress = |received: u64, total: Option<u64>| {
        if let Some(total) = total.filter(|t| *t > 0) {
            let percent = received * 100 / total;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                eprint!("\r{percent:>3}%");
            }
        }
    };
    let result = runtime.block_on(model_paths.download(info, &mut progress, &cancel));
    eprintln!();

    let path = result.with_context(|| format!("cannot install {}", info.file_name))?;
    println!("Installed {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// status / init-config
// ---------------------------------------------------------------------------

fn status(paths: &AppPaths, json_output: bool) -> Result<()> {
    let config = load_config();
    let settings = ConfigSettings::new(config.clone(), paths.clone());
    let caps = settings.capabilities();
    let model = config.stt.model_size.info();
    let model_paths = ModelPaths::from_app_paths(paths);
    let model_path = model_paths.model_path(model);
    let provider = config.summarize.provider;
    let key_set = std::env::var(provider.env_var()).is_ok_and(|k| !k.trim().is_empty());
    let installed: Vec<ModelSize> = model_paths
        .list_local_models()
        .into_iter()
        .map(|m| m.size)
        .collect();

    if json_output {
        let value = json!({
            "capabilities": caps,
            "settings_file": paths.settings_file,
            "models_dir": paths.models_dir,
            "downloads_dir": config.download_dir(paths),
            "log_file": paths.log_file,
            "model": { "size": model.size, "path": model_path, "present": model_path.exists() },
            "installed_models": installed,
            "provider": provider,
            "api_key_env": provider.env_var(),
            "api_key_set": key_set,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let yes_no = |b: bool| if b { "yes" } else { "no" };
    println!("Settings file : {}", paths.settings_file.display());
    println!("Downloads     : {}", config.download_dir(paths).display());
    println!("Log file      : {}", paths.log_file.display());
    println!(
        "Fetch         : {} ({})",
        yes_no(caps.fetch_available),
        config.fetch.program
    );
    println!(
        "Transcribe    : {} ({}, {})",
        yes_no(caps.transcribe_available),
        model.display_name,
        model_path.display()
    );
    let installed: Vec<&str> = installed.iter().map(|m| m.label()).collect();
    println!(
        "Models        : {}",
        if installed.is_empty() {
            "none (run `video-synthesis models download base`)".to_string()
        } else {
            installed.join(", ")
        }
    );
    println!(
        "Summarize     : {provider} (key in {}: {})",
        provider.env_var(),
        yes_no(key_set)
    );
    Ok(())
}

fn init_config(paths: &AppPaths, force: bool) -> Result<()> {
    write_default_config(&paths.settings_file, force)?;
    println!("Wrote {}", paths.settings_file.display());
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default().save_to(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_not_overwritten_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.toml");

        write_default_config(&path, false).unwrap();
        assert!(AppConfig::load_from(&path).is_ok());

        assert!(write_default_config(&path, false).is_err());
        write_default_config(&path, true).unwrap();
    }

    #[test]
    fn one_failed_item_does_not_hide_the_others() {
        let inputs = vec![
            RunInput::Url("https://a.example/1".into()),
            RunInput::Url("https://b.example/2".into()),
            RunInput::Url("https://c.example/3".into()),
        ];
        let statuses = vec![
            ItemStatus::Done,
            ItemStatus::Failed("fetch failed: private video".into()),
            ItemStatus::Done,
        ];
        assert_eq!(incomplete_count(&statuses), 1);

        let err = finish(&inputs, &statuses, false).unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 items did not complete");

        let all_done = vec![ItemStatus::Done, ItemStatus::Done, ItemStatus::Done];
        assert!(finish(&inputs, &all_done, false).is_ok());
    }

    #[test]
    fn single_item_error_keeps_its_reason() {
        let inputs = vec![RunInput::Audio("/tmp/a.mp3".into())];
        let err = finish(&inputs, &[ItemStatus::Failed("transcribe failed".into())], false)
            .unwrap_err();
        assert_eq!(err.to_string(), "transcribe failed");
        let err = finish(&inputs, &[ItemStatus::Cancelled], false).unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn terminal_events_settle_their_stage() {
        let completed = PipelineEvent::Completed {
            stage: Stage::Transcribe,
            artifact: Artifact::Transcript {
                text: "hi".into(),
                source_audio_path: "/tmp/a.mp3".into(),
                language: "en".into(),
            },
        };
        assert_eq!(terminal(&completed), Some((Stage::Transcribe, Settled::Completed)));
        assert_eq!(
            terminal(&PipelineEvent::Cancelled { stage: Stage::Fetch }),
            Some((Stage::Fetch, Settled::Cancelled))
        );
        assert_eq!(
            terminal(&PipelineEvent::InputFilled {
                stage: Stage::Summarize,
                source: None
            }),
            None
        );
    }
}
