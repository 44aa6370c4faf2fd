//! Cancellable subprocess execution for the external programs the
//! capability adapters drive (yt-dlp, ffmpeg).
//!
//! The child is polled every 50 ms.  When the caller's [`CancelToken`] is
//! raised the child is killed and [`ProcessError::Cancelled`] is returned.
//! Pipes are drained on helper threads so a chatty child never blocks on a
//! full pipe buffer.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::command_exists;
use crate::pipeline::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("`{0}` was not found on PATH")]
    Missing(String),

    #[error("failed to run `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with code {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Captured output of a successful run.
#[derive(Debug, Default)]
pub struct ProcessOutput {
    /// Raw stdout.  Empty in line mode; lines go to the callback instead.
    pub stdout: Vec<u8>,
    /// Collected stderr, also in line mode.
    pub stderr: String,
}

/// Run `program` to completion, capturing stdout as bytes.
pub fn run_cancellable(
    program: &str,
    args: &[String],
    cancel: &CancelToken,
) -> Result<ProcessOutput, ProcessError> {
    run(program, args, cancel, None)
}

/// Run `program` to completion, handing each stdout and stderr line to
/// `on_line` as it arrives.  `on_line` runs on the calling thread.
pub fn run_cancellable_lines(
    program: &str,
    args: &[String],
    cancel: &CancelToken,
    on_line: &mut dyn FnMut(&str),
) -> Result<ProcessOutput, ProcessError> {
    run(program, args, cancel, Some(on_line))
}

fn run(
    program: &str,
    args: &[String],
    cancel: &CancelToken,
    mut on_line: Option<&mut dyn FnMut(&str)>,
) -> Result<ProcessOutput, ProcessError> {
    if !command_exists(program) {
        return Err(ProcessError::Missing(program.to_owned()));
    }
    let io_err = |source| ProcessError::Io {
        program: program.to_owned(),
        source,
    };

    log::debug!("process: {} {}", program, args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(io_err)?;

    let (line_tx, line_rx) = mpsc::channel::<Line>();
    let streaming = on_line.is_some();
    let stdout = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, streaming.then(|| line_tx.clone()), Line::Out));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| spawn_reader(pipe, streaming.then(|| line_tx.clone()), Line::Err));
    drop(line_tx);

    let mut stderr_lines = String::new();
    let mut forward = |line: Line, on_line: &mut Option<&mut dyn FnMut(&str)>| {
        let text = match line {
            Line::Out(text) => text,
            Line::Err(text) => {
                stderr_lines.push_str(&text);
                stderr_lines.push('\n');
                text
            }
        };
        if let Some(callback) = on_line.as_mut() {
            callback(&text);
        }
    };

    let status = loop {
        while let Ok(line) = line_rx.try_recv() {
            forward(line, &mut on_line);
        }

        if let Some(status) = child.try_wait().map_err(io_err)? {
            break status;
        }

        if cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            log::debug!("process: killed {program} on cancel");
            return Err(ProcessError::Cancelled);
        }

        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
    let stderr_bytes = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
    for line in line_rx.try_iter() {
        forward(line, &mut on_line);
    }
    let stderr = if streaming {
        stderr_lines
    } else {
        String::from_utf8_lossy(&stderr_bytes).into_owned()
    };

    if status.success() {
        Ok(ProcessOutput { stdout, stderr })
    } else {
        Err(ProcessError::Failed {
            program: program.to_owned(),
            code: status.code(),
            stderr: stderr.trim().to_owned(),
        })
    }
}

enum Line {
    Out(String),
    Err(String),
}

/// Drain one pipe.  With a sender the thread forwards lines and returns
/// nothing; otherwise it returns the whole stream.
fn spawn_reader<R>(
    pipe: R,
    lines: Option<mpsc::Sender<Line>>,
    tag: fn(String) -> Line,
) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || match lines {
        Some(tx) => {
            let mut reader = BufReader::new(pipe);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).trim_end().to_owned();
                        if tx.send(tag(line)).is_err() {
                            break;
                        }
                    }
                }
            }
            Vec::new()
        }
        None => {
            let mut pipe = pipe;
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
