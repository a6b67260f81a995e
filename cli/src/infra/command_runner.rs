//! Infrastructure implementation of the `CommandRunner` port.
//!
//! `TokioCommandRunner` is the production implementation that uses tokio
//! for async process execution with guaranteed timeout and kill on all platforms.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::application::ports::CommandRunner;

/// Default timeout for short local commands (`ssh -V`, control checks).
pub const DEFAULT_CMD_TIMEOUT: Duration = Duration::from_secs(30);

/// Returned (inside `anyhow::Error`) when a child is killed for running too long.
#[derive(Debug, thiserror::Error)]
#[error("{program} timed out after {}s", .timeout.as_secs())]
pub struct CommandTimeout {
    pub program: String,
    pub timeout: Duration,
}

/// Production `CommandRunner` using tokio for async process execution
/// with guaranteed timeout and kill on all platforms.
///
/// `tokio::time::timeout` around `.output().await` does not kill the child
/// when it fires on every platform, so this uses `tokio::select!` with an
/// explicit `child.kill()`.
pub struct TokioCommandRunner {
    timeout: Duration,
}

impl TokioCommandRunner {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TokioCommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CMD_TIMEOUT)
    }
}

async fn read_all<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = h.read_to_end(&mut buf).await;
    }
    buf
}

/// Waits for `child` while draining its pipes; kills it after `timeout`.
async fn collect(mut child: Child, program: &str, timeout: Duration) -> Result<Output> {
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    tokio::select! {
        result = async {
            let (status, stdout, stderr) = tokio::join!(
                child.wait(),
                read_all(stdout_handle),
                read_all(stderr_handle),
            );
            Ok(Output {
                status: status.with_context(|| format!("waiting for {program}"))?,
                stdout,
                stderr,
            })
        } => result,
        () = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            Err(CommandTimeout { program: program.to_string(), timeout }.into())
        }
    }
}

impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output> {
        self.run_with_timeout(program, args, self.timeout).await
    }

    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Output> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;
        collect(child, program, timeout).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        input: &[u8],
        timeout: Duration,
    ) -> Result<Output> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        let stdin_handle = child.stdin.take();
        let input_owned = input.to_vec();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut stdin) = stdin_handle {
                let _ = stdin.write_all(&input_owned).await;
                let _ = stdin.shutdown().await;
            }
        });

        let output = collect(child, program, timeout).await;
        stdin_task.abort();
        output
    }

    async fn run_status(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExitStatus> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {program}"))?;

        tokio::select! {
            status = child.wait() => status.with_context(|| format!("waiting for {program}")),
            () = tokio::time::sleep(timeout) => {
                let _ = child.kill().await;
                Err(CommandTimeout { program: program.to_string(), timeout }.into())
            }
        }
    }
}
