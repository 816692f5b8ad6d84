//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` uses tokio for async process execution and kills the
//! child explicitly when a timeout or cancellation fires.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CommandRunner;

/// Production `CommandRunner`.
pub struct TokioCommandRunner {
    timeout: Option<Duration>,
}

impl TokioCommandRunner {
    /// Runner whose captured commands are killed after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Runner that waits for captured commands indefinitely.
    #[must_use]
    pub fn unbounded() -> Self {
        Self { timeout: None }
    }

    /// Runner with an optional bound; `None` is [`TokioCommandRunner::unbounded`].
    #[must_use]
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        tokio::select! {
            result = async {
                let (status, stdout, stderr) = tokio::join!(
                    child.wait(),
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stdout_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                    async {
                        let mut buf = Vec::new();
                        if let Some(ref mut h) = stderr_handle {
                            let _ = h.read_to_end(&mut buf).await;
                        }
                        buf
                    },
                );
                Ok(Output {
                    status: status.with_context(|| format!("waiting for {program}"))?,
                    stdout,
                    stderr,
                })
            } => result,
            () = sleep_or_forever(self.timeout) => {
                let _ = child.kill().await;
                anyhow::bail!("{program} timed out after {}s", self.timeout.unwrap_or_default().as_secs())
            }
        }
    }

    async fn run_logged(
        &self,
        program: &str,
        args: &[&str],
        log: &Path,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus> {
        let stdout = File::create(log)
            .with_context(|| format!("creating log file {}", log.display()))?;
        let stderr = stdout
            .try_clone()
            .with_context(|| format!("duplicating log handle {}", log.display()))?;

        let spawned = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                append_reason(log, &format!("failed to start {program}: {e}"));
                return Err(e).with_context(|| format!("failed to spawn {program}"));
            }
        };

        tokio::select! {
            status = child.wait() => status.with_context(|| format!("waiting for {program}")),
            () = sleep_or_forever(deadline) => {
                let _ = child.kill().await;
                let secs = deadline.unwrap_or_default().as_secs();
                append_reason(log, &format!("{program} timed out after {secs}s"));
                anyhow::bail!("{program} timed out after {secs}s")
            }
            () = cancel.cancelled() => {
                let _ = child.kill().await;
                append_reason(log, &format!("{program} cancelled by shutdown"));
                anyhow::bail!("{program} cancelled by shutdown")
            }
        }
    }
}

async fn sleep_or_forever(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

/// Best-effort note at the end of a log explaining why the run stopped.
fn append_reason(log: &Path, reason: &str) {
    let written = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log)
        .and_then(|mut f| writeln!(f, "\n[codepass] {reason}"));
    if let Err(e) = written {
        tracing::debug!(log = %log.display(), error = %e, "could not append to log");
    }
}
