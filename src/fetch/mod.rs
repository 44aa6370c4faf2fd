//! Fetch capability: remote URL → local audio file.
//!
//! [`AudioFetcher`] is the seam the pipeline talks to.  [`YtDlpFetcher`]
//! drives the `yt-dlp` program; [`MockFetcher`] (test-only) fabricates a
//! file path without touching the network.

pub mod ytdlp;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::CancelToken;

pub use ytdlp::YtDlpFetcher;

/// Progress sink handed to a fetcher: `(percent, message)`.  `percent` is
/// `None` while the total size is unknown.
pub type FetchProgress<'a> = &'a mut dyn FnMut(Option<f32>, &str);

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The download program is not installed.
    #[error("{0} is not installed")]
    Unavailable(String),

    /// The download program exited unsuccessfully; carries its error output.
    #[error("download failed: {0}")]
    Failed(String),

    #[error("download finished without reporting an output file")]
    NoOutput,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("download cancelled")]
    Cancelled,
}

/// Object-safe, thread-safe download capability.
///
/// Implementations poll `cancel` while the transfer runs and return
/// [`FetchError::Cancelled`] once it is raised.
pub trait AudioFetcher: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, FetchError>;
}

// ---------------------------------------------------------------------------
// MockFetcher  (test-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use mock::MockFetcher;
