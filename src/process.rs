//! Subprocess execution: spawn, capture, enforce wall-clock timeout.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// A fully specified subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// First element is the executable, the rest are arguments.
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

impl RunRequest {
    pub fn new(argv: Vec<String>, cwd: &Path) -> Self {
        Self {
            argv,
            cwd: cwd.to_path_buf(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Captured output of a completed (or killed) subprocess.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed before producing an exit status.
    pub exit_code: Option<i32>,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run a subprocess to completion, capturing stdout and stderr in full.
///
/// Non-zero exit is not an error; only unreachable executables and kernel
/// failures propagate. On timeout the child is killed and still awaited so
/// no zombie is left behind; the captured output survives the kill.
pub async fn run(req: &RunRequest) -> Result<RunOutput> {
    let (exe, args) = req
        .argv
        .split_first()
        .context("empty argv for subprocess")?;

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .current_dir(&req.cwd)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning {exe}"))?;

    let mut stdout_pipe = child.stdout.take().context("child stdout not piped")?;
    let mut stderr_pipe = child.stderr.take().context("child stderr not piped")?;

    // Drain both pipes concurrently with the wait so a chatty child cannot
    // deadlock on a full pipe buffer.
    let drain = tokio::spawn(async move {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let _ = tokio::join!(
            stdout_pipe.read_to_end(&mut out),
            stderr_pipe.read_to_end(&mut err)
        );
        (out, err)
    });

    let status = match req.timeout {
        None => Some(child.wait().await?),
        Some(limit) => {
            tokio::select! {
                status = child.wait() => Some(status?),
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!("subprocess timed out after {:?}, killing", limit);
                    let _ = child.start_kill();
                    // Best-effort kill; still await exit to reap the child.
                    let _ = child.wait().await;
                    None
                }
            }
        }
    };

    let (out, err) = drain.await.unwrap_or_default();

    Ok(RunOutput {
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
        exit_code: status.and_then(|s| s.code()),
    })
}
