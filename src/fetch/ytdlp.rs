//! [`AudioFetcher`] backed by the `yt-dlp` program.
//!
//! yt-dlp downloads the best audio stream, extracts it to the configured
//! codec and prints the final file path once post-processing has moved it
//! into place.  Its `--newline` progress lines are turned into percent
//! reports.

use std::path::{Path, PathBuf};

use super::{AudioFetcher, FetchError, FetchProgress};
use crate::config::FetchConfig;
use crate::pipeline::CancelToken;
use crate::process::{self, ProcessError};

const LOG_TARGET: &str = "video_synthesis::fetch";

#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    config: FetchConfig,
}

impl YtDlpFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        let template = dest_dir.join("%(title)s.%(ext)s");
        let mut args: Vec<String> = vec![
            "-f".into(),
            "bestaudio/best".into(),
            "-x".into(),
            "--audio-format".into(),
            self.config.audio_format.clone(),
            "--audio-quality".into(),
            self.config.audio_quality.clone(),
            "-o".into(),
            template.to_string_lossy().into_owned(),
            "--newline".into(),
            // --print implies --quiet; keep the progress lines coming.
            "--progress".into(),
            "--print".into(),
            "after_move:filepath".into(),
        ];
        if self.config.no_playlist {
            args.push("--no-playlist".into());
        }
        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args.push("--".into());
        args.push(url.to_string());
        args
    }
}

impl AudioFetcher for YtDlpFetcher {
    fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: FetchProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<PathBuf, FetchError> {
        progress(None, "Extracting video information...");
        log::info!(target: LOG_TARGET, "Downloading {url} into {}", dest_dir.display());

        let dest_prefix = dest_dir.to_string_lossy().into_owned();
        let mut output: Option<PathBuf> = None;
        let mut on_line = |line: &str| {
            if let Some(percent) = parse_progress(line) {
                progress(Some(percent), &format!("Downloading: {percent:.1}%"));
            } else if line.starts_with("[ExtractAudio]") {
                progress(
                    None,
                    &format!(
                        "Download finished, now converting to {}...",
                        self.config.audio_format
                    ),
                );
            } else if let Some(path) = reported_path(line, &dest_prefix) {
                output = Some(path);
            } else if line.starts_with("ERROR") || line.starts_with("WARNING") {
                log::warn!(target: LOG_TARGET, "{line}");
            }
        };

        process::run_cancellable_lines(
            &self.config.program,
            &self.args(url, dest_dir),
            cancel,
            &mut on_line,
        )
        .map_err(|e| match e {
            ProcessError::Missing(program) => FetchError::Unavailable(program),
            ProcessError::Cancelled => FetchError::Cancelled,
            ProcessError::Failed { stderr, code, .. } if stderr.is_empty() => {
                FetchError::Failed(format!("exit code {code:?}"))
            }
            ProcessError::Failed { stderr, .. } => FetchError::Failed(stderr),
            ProcessError::Io { program, source } => FetchError::Io(format!("{program}: {source}")),
        })?;

        let path = output.ok_or(FetchError::NoOutput)?;
        if !path.exists() {
            return Err(FetchError::Io(format!(
                "reported file {} does not exist",
                path.display()
            )));
        }
        log::info!(target: LOG_TARGET, "Download successful: {}", path.display());
        Ok(path)
    }
}

/// Percent from a `[download]  42.3% of 3.21MiB ...` line.
fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.strip_prefix("[download]")?;
    let token = rest.split_whitespace().find(|t| t.ends_with('%'))?;
    token.trim_end_matches('%').parse::<f32>().ok()
}

/// The `--print after_move:filepath` line: a bare path under `dest_prefix`.
fn reported_path(line: &str, dest_prefix: &str) -> Option<PathBuf> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('[') || !line.starts_with(dest_prefix) {
        return None;
    }
    Some(PathBuf::from(line))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_audio_extraction() {
        let f = YtDlpFetcher::new(FetchConfig {
            ffmpeg_location: Some("/opt/ffmpeg/bin".into()),
            ..FetchConfig::default()
        });
        let args = f.args("https://example.com/v", Path::new("/tmp/out"));
        let joined = args.join(" ");

        assert!(joined.starts_with("-f bestaudio/best -x --audio-format mp3 --audio-quality 192K"));
        assert!(joined.contains("-o /tmp/out/%(title)s.%(ext)s"));
        assert!(joined.contains("--print after_move:filepath"));
        assert!(joined.contains("--no-playlist"));
        assert!(joined.contains("--ffmpeg-location /opt/ffmpeg/bin"));
        assert_eq!(args.last().map(String::as_str), Some("https://example.com/v"));
    }

    #[test]
    fn progress_lines_parse_to_percent() {
        assert_eq!(
            parse_progress("[download]  42.3% of ~  3.21MiB at  1.23MiB/s ETA 00:02"),
            Some(42.3)
        );
        assert_eq!(parse_progress("[download] 100% of 3.21MiB"), Some(100.0));
        assert_eq!(parse_progress("[download] Destination: /tmp/x.webm"), None);
        assert_eq!(parse_progress("[youtube] abc: Downloading webpage"), None);
    }

    #[test]
    fn only_paths_under_destination_are_reported() {
        assert_eq!(
            reported_path("/tmp/out/Talk.mp3", "/tmp/out"),
            Some(PathBuf::from("/tmp/out/Talk.mp3"))
        );
        assert_eq!(reported_path("[ExtractAudio] Destination: /tmp/out/Talk.mp3", "/tmp/out"), None);
        assert_eq!(reported_path("WARNING: something", "/tmp/out"), None);
    }

    #[test]
    fn missing_program_is_unavailable() {
        let f = YtDlpFetcher::new(FetchConfig {
            program: "no-such-yt-dlp-7f3a".into(),
            ..FetchConfig::default()
        });
        let err = f
            .fetch("https://example.com/v", Path::new("/tmp"), &mut |_, _| {}, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, FetchError::Unavailable(_)));
    }

    #[cfg(unix)]
    fn fake_program(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn fake_download_reports_progress_and_path() {
        let bin = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let target = dest.path().join("Talk.mp3");
        std::fs::write(&target, b"mp3").unwrap();

        let script = format!(
            "echo '[download]  10.0% of 1MiB'\necho '[download] 100.0% of 1MiB'\necho '[ExtractAudio] Destination: {0}'\necho '{0}'",
            target.display()
        );
        let f = YtDlpFetcher::new(FetchConfig {
            program: fake_program(bin.path(), &script).to_string_lossy().into_owned(),
            ..FetchConfig::default()
        });

        let mut percents = Vec::new();
        let path = f
            .fetch(
                "https://example.com/v",
                dest.path(),
                &mut |p, _| percents.push(p),
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(percents, vec![None, Some(10.0), Some(100.0), None]);
    }

    #[cfg(unix)]
    #[test]
    fn failing_download_carries_stderr() {
        let bin = tempfile::tempdir().unwrap();
        let f = YtDlpFetcher::new(FetchConfig {
            program: fake_program(bin.path(), "echo 'ERROR: Private video' >&2\nexit 1")
                .to_string_lossy()
                .into_owned(),
            ..FetchConfig::default()
        });
        let err = f
            .fetch("https://example.com/v", Path::new("/tmp"), &mut |_, _| {}, &CancelToken::new())
            .unwrap_err();
        match err {
            FetchError::Failed(detail) => assert!(detail.contains("Private video")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
