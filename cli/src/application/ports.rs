//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and `tether_common`, never
//! from `crate::infra`, `crate::commands`, or `crate::output`.
//!
//! Async ports return `Send` futures because the agent drives them from
//! spawned tokio tasks.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::time::Duration;

use anyhow::Result;
use tether_common::{AuditRecord, ChangeEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{AgentConfig, RemoteError, RemoteTarget, WatchError};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
pub trait CommandRunner: Send + Sync {
    /// Run a program and capture its output.
    ///
    /// Implementations should delegate to `run_with_timeout` using the
    /// instance's configured default timeout.
    fn run(&self, program: &str, args: &[&str]) -> impl Future<Output = Result<Output>> + Send;

    /// Run a program with a custom timeout override.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or exceeds `timeout`.
    /// On timeout, the child process must be killed (not left orphaned).
    fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<Output>> + Send;

    /// Run a program with stdin piped from `stdin`.
    fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        stdin: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Output>> + Send;

    /// Run a program with null stdio and return only its exit status.
    ///
    /// Used for programs that fork a background process holding the pipes.
    fn run_status(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> impl Future<Output = Result<ExitStatus>> + Send;
}

// ── Network Probe Port ────────────────────────────────────────────────────────

/// Abstracts network connectivity checks so application services can be tested
/// without real network access.
pub trait NetworkProbe: Send + Sync {
    /// Check TCP connectivity to the given host and port.
    fn check_tcp_connectivity(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Check DNS resolution for the given hostname.
    fn check_dns_resolution(&self, hostname: &str) -> impl Future<Output = Result<bool>> + Send;
}

// ── Remote Connector Port ─────────────────────────────────────────────────────

/// Captured output of a remote command or upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Opens and drives secure remote shell sessions.
pub trait RemoteConnector: Send + Sync + 'static {
    /// Connection handle owned by the pool.
    type Session: Send + Sync + 'static;

    /// Establish a new session to `target`.
    fn connect(
        &self,
        target: &RemoteTarget,
    ) -> impl Future<Output = Result<Self::Session, RemoteError>> + Send;

    /// Run a shell command over an established session.
    ///
    /// A non-zero remote exit code is `Ok`; transport failures are `Err`.
    fn exec(
        &self,
        session: &Self::Session,
        command: &str,
    ) -> impl Future<Output = Result<RemoteOutput, RemoteError>> + Send;

    /// Upload `local` to `remote_path`, creating the remote directory.
    /// `front_matter`, when set, is written ahead of the file's bytes.
    fn push(
        &self,
        session: &Self::Session,
        local: &Path,
        front_matter: Option<&str>,
        remote_path: &str,
    ) -> impl Future<Output = Result<RemoteOutput, RemoteError>> + Send;

    /// Whether the session still answers.
    fn check(&self, session: &Self::Session) -> impl Future<Output = bool> + Send;

    /// Tear the session down. Never fails; errors are logged.
    fn close(&self, session: &Self::Session) -> impl Future<Output = ()> + Send;
}

// ── Audit Port ────────────────────────────────────────────────────────────────

/// Append-only sink for audit records. Sync trait; appends are short writes.
pub trait AuditSink: Send + Sync {
    /// Append one record. Concurrent appends must not interleave.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    fn append(&self, record: &AuditRecord) -> Result<()>;
}

// ── Event Source Port ─────────────────────────────────────────────────────────

/// What an event source reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSignal {
    Change(ChangeEvent),
    WatchLost { root: PathBuf },
    WatchRestored { root: PathBuf },
}

/// Produces normalized change events until cancelled.
pub trait EventSource: Send + 'static {
    /// Run until `cancel` fires or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`WatchError`] when a watch cannot be (re-)established.
    fn run(
        self,
        tx: mpsc::Sender<SourceSignal>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), WatchError>> + Send;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait; no async needed.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Filesystem Ports ──────────────────────────────────────────────────────────

/// Abstracts raw filesystem queries.
pub trait LocalFs {
    /// Whether `path` exists.
    fn exists(&self, path: &Path) -> bool;
    /// Whether `path` is a directory.
    fn is_dir(&self, path: &Path) -> bool;
}

/// Moves finished files out of the watched tree.
pub trait FileDisposer: Send + Sync {
    /// Move `path` to the processed or failed directory.
    ///
    /// Returns the new location, or `None` when the file no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the move fails.
    fn dispose(&self, path: &Path, succeeded: bool) -> Result<Option<PathBuf>>;
}

/// Loads the agent configuration.
pub trait ConfigStore {
    /// Load and `~`-expand the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    fn load(&self) -> Result<AgentConfig>;

    /// Path the configuration is loaded from.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    fn path(&self) -> Result<PathBuf>;
}
