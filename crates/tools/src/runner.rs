//! Tool Runner
//!
//! Executes one external tool as a single observable step: spawn, wait,
//! capture output. A nonzero exit or a missing executable comes back as a
//! `ToolError`, never as a panic or an uncaught fault.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ToolError;

/// Captured result of one tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs one external executable per call.
///
/// The runner itself holds no state besides the executable path; every
/// invocation is transient. Side effects are confined to the files the tool
/// touches under its working directory.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    executable: PathBuf,
}

impl ToolRunner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run to completion, treating a nonzero exit as `ToolError::Failed`.
    pub async fn run<I, S>(
        &self,
        args: I,
        cwd: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run_unchecked(args, cwd, cancel).await?;
        check(output)
    }

    /// Like `run`, feeding `input` to the tool's stdin.
    pub async fn run_with_input<I, S>(
        &self,
        args: I,
        cwd: Option<&Path>,
        input: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self
            .run_unchecked_with_input(args, cwd, Some(input), cancel)
            .await?;
        check(output)
    }

    /// Run to completion and report the raw output regardless of exit code.
    pub async fn run_unchecked<I, S>(
        &self,
        args: I,
        cwd: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_unchecked_with_input(args, cwd, None, cancel).await
    }

    pub async fn run_unchecked_with_input<I, S>(
        &self,
        args: I,
        cwd: Option<&Path>,
        input: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let start = Instant::now();
        debug!(executable = %self.executable.display(), "spawning tool");

        let mut command = Command::new(&self.executable);
        command
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(self.executable.display().to_string())
            } else {
                ToolError::Io(err)
            }
        })?;

        // Writer and readers run as their own tasks so a tool that fills
        // one pipe while we feed another cannot deadlock the wait.
        if let Some(bytes) = input {
            if let Some(mut stdin) = child.stdin.take() {
                let bytes = bytes.to_vec();
                tokio::spawn(async move {
                    let _ = stdin.write_all(&bytes).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }
        let stdout_task = tokio::spawn(drain(child.stdout.take()));
        let stderr_task = tokio::spawn(drain(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                // Kill and reap before reporting, so the caller can safely
                // touch the working directory once we return.
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ToolError::Cancelled);
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let result = ToolOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration: start.elapsed(),
        };

        debug!(
            executable = %self.executable.display(),
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "tool finished"
        );

        Ok(result)
    }
}

fn check(output: ToolOutput) -> Result<ToolOutput, ToolError> {
    if !output.success() {
        return Err(ToolError::Failed {
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_end(&mut buf).await;
    }
    buf
}
