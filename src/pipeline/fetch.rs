//! Fetch stage controller: URL + destination directory → `AudioFile`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;

use super::artifact::{Artifact, Stage};
use super::error::{FailureKind, FetchErrorKind, PipelineError, StageFailure};
use super::events::StageContext;
use super::runner::{TaskError, TaskHandle, TaskRunner};
use crate::config::CapabilityFlags;
use crate::fetch::{AudioFetcher, FetchError};

pub(crate) struct FetchController {
    ctx: StageContext,
    fetcher: Arc<dyn AudioFetcher>,
}

impl FetchController {
    pub fn new(ctx: StageContext, fetcher: Arc<dyn AudioFetcher>) -> Self {
        Self { ctx, fetcher }
    }

    pub fn start(
        &self,
        runner: &mut TaskRunner,
        caps: CapabilityFlags,
        url: &str,
        dest: &Path,
    ) -> Result<TaskHandle, PipelineError> {
        if runner.is_running(Stage::Fetch) {
            return Err(PipelineError::AlreadyRunning(Stage::Fetch));
        }
        let url = validate_url(url)?;
        if !caps.fetch_available {
            return Err(PipelineError::CapabilityUnavailable(Stage::Fetch));
        }
        std::fs::create_dir_all(dest).map_err(|source| PipelineError::Destination {
            path: dest.to_path_buf(),
            source,
        })?;

        self.ctx.store.mark_running(Stage::Fetch)?;
        log::info!(target: Stage::Fetch.log_target(), "Downloading {url} into {}", dest.display());

        let fetcher = Arc::clone(&self.fetcher);
        let dest: PathBuf = dest.to_path_buf();
        let started = runner.start(
            Stage::Fetch,
            move |task| {
                let mut progress = |percent: Option<f32>, message: &str| task.progress(percent, message);
                match fetcher.fetch(&url, &dest, &mut progress, task.token()) {
                    Ok(path) => Ok(Artifact::AudioFile {
                        path,
                        source_url: Some(url),
                    }),
                    Err(FetchError::Cancelled) => Err(TaskError::Cancelled),
                    Err(e) => Err(StageFailure::new(
                        FailureKind::Fetch(classify_fetch_error(&e)),
                        e.to_string(),
                    )
                    .into()),
                }
            },
            self.ctx.progress_callback(),
            self.ctx.done_callback(Stage::Fetch),
        );

        if started.is_err() {
            self.ctx.store.settle(Stage::Fetch)?;
        }
        started
    }
}

/// Accept absolute `http`/`https` URLs with a host.  Returns the trimmed
/// URL as typed; the downloader gets the user's string, not a normalised
/// one.
pub fn validate_url(raw: &str) -> Result<String, PipelineError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| PipelineError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("URL is empty"));
    }
    let parsed = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host"));
    }
    Ok(trimmed.to_string())
}

const RESTRICTED_MARKERS: &[&str] = &[
    "private video",
    "not available",
    "video unavailable",
    "sign in to confirm",
    "members-only",
    "age-restricted",
    "geo restrict",
    "copyright",
];

const INVALID_URL_MARKERS: &[&str] = &["unsupported url", "invalid url", "is not a valid url"];

const NETWORK_MARKERS: &[&str] = &[
    "unable to download webpage",
    "unable to download video data",
    "name resolution",
    "getaddrinfo",
    "connection refused",
    "connection reset",
    "timed out",
    "network is unreachable",
    "http error 5",
    "ssl",
];

/// Map a downloader error to the kind reported to the caller.  The
/// downloader's stderr is matched case-insensitively.
pub fn classify_fetch_error(error: &FetchError) -> FetchErrorKind {
    let FetchError::Failed(detail) = error else {
        return FetchErrorKind::Unknown;
    };
    let detail = detail.to_lowercase();
    let has = |markers: &[&str]| markers.iter().any(|m| detail.contains(m));

    if has(RESTRICTED_MARKERS) {
        FetchErrorKind::RestrictedContent
    } else if has(INVALID_URL_MARKERS) {
        FetchErrorKind::InvalidUrl
    } else if has(NETWORK_MARKERS) {
        FetchErrorKind::NetworkError
    } else {
        FetchErrorKind::Unknown
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
