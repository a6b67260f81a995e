//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator.

use std::path::PathBuf;

use tether_common::FailureReason;
use thiserror::Error;

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors found while validating an agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No watch roots configured. Add at least one entry under 'watch'.")]
    NoWatchRoots,

    #[error("No remote targets configured. Add at least one entry under 'targets'.")]
    NoTargets,

    #[error("Target '{0}' must have a non-empty host and user.")]
    IncompleteTarget(String),

    #[error("Duplicate rule name '{0}'.")]
    DuplicateRule(String),

    #[error("Rule '{rule}' references unknown target '{target}'.\n\nKnown targets: {known}")]
    UnknownTarget {
        rule: String,
        target: String,
        known: String,
    },

    #[error("Rule '{rule}' has an invalid pattern: {message}")]
    InvalidPattern { rule: String, message: String },

    #[error("Rule '{0}' must define exactly one of 'command' or 'push'.")]
    AmbiguousAction(String),

    #[error("Rule '{rule}' uses unknown placeholder '{{{placeholder}}}' in {field}.")]
    UnknownPlaceholder {
        rule: String,
        placeholder: String,
        field: String,
    },

    #[error("Rule '{rule}' has an unterminated placeholder in {field}.")]
    UnterminatedPlaceholder { rule: String, field: String },

    #[error("Rule '{rule}' has an invalid front matter key '{key}'.")]
    InvalidFrontMatterKey { rule: String, key: String },

    #[error(
        "{key} ({}) lies inside watch root {}. Finished files moved there would be picked up again.",
        .dir.display(),
        .root.display()
    )]
    DispositionInsideWatchRoot {
        key: String,
        dir: PathBuf,
        root: PathBuf,
    },

    #[error("Invalid value for {key}: {value}\n\nValid values: {valid}")]
    InvalidValue {
        key: String,
        value: String,
        valid: String,
    },
}

// ── Startup errors ────────────────────────────────────────────────────────────

/// Conditions that stop the agent before it starts watching.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Watch root {} does not exist.", .0.display())]
    WatchRootMissing(PathBuf),

    #[error("Watch root {} is not a directory.", .0.display())]
    WatchRootNotDirectory(PathBuf),

    #[error("Identity file for target '{0}' does not exist.")]
    IdentityMissing(String),
}

// ── Remote errors ─────────────────────────────────────────────────────────────

/// Failures talking to a remote target.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("cannot connect to {target}: {message}")]
    Connect { target: String, message: String },

    #[error("session to {target} dropped: {message}")]
    Disconnected { target: String, message: String },

    #[error("remote call to {target} timed out after {seconds}s")]
    Timeout { target: String, seconds: u64 },

    #[error("local file {} is unavailable: {message}", .path.display())]
    LocalFile { path: PathBuf, message: String },

    #[error("failed to run {program}: {message}")]
    Spawn { program: String, message: String },
}

impl RemoteError {
    /// Reason code recorded in the audit log for this failure.
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            RemoteError::Connect { .. } | RemoteError::Spawn { .. } => FailureReason::Connect,
            RemoteError::Disconnected { .. } => FailureReason::Disconnected,
            RemoteError::Timeout { .. } => FailureReason::Timeout,
            RemoteError::LocalFile { .. } => FailureReason::LocalFile,
        }
    }

    /// Whether retrying the same action may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Connect { .. }
                | RemoteError::Disconnected { .. }
                | RemoteError::Timeout { .. }
        )
    }

    /// Whether the session that produced this error should stop being reused.
    #[must_use]
    pub fn degrades_session(&self) -> bool {
        matches!(
            self,
            RemoteError::Disconnected { .. } | RemoteError::Timeout { .. }
        )
    }
}

// ── Pool errors ───────────────────────────────────────────────────────────────

/// Errors returned by session acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no session for {target} became available within {waited_ms}ms")]
    Exhausted { target: String, waited_ms: u64 },

    #[error("session pool is shut down")]
    Closed,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl PoolError {
    #[must_use]
    pub fn reason(&self) -> FailureReason {
        match self {
            PoolError::Exhausted { .. } => FailureReason::PoolExhausted,
            PoolError::Closed => FailureReason::PoolClosed,
            PoolError::Remote(err) => err.reason(),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            PoolError::Exhausted { .. } => true,
            PoolError::Closed => false,
            PoolError::Remote(err) => err.is_transient(),
        }
    }
}

// ── Watch errors ──────────────────────────────────────────────────────────────

/// Unrecoverable event source failures.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch root {} did not reappear within {seconds}s", .root.display())]
    RootVanished { root: PathBuf, seconds: u64 },

    #[error("failed to watch {}: {message}", .root.display())]
    Init { root: PathBuf, message: String },
}
