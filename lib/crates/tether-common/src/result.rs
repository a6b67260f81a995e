use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Outcome class of a single action attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    TransientFailure,
    FatalFailure,
}

/// Machine-readable reason attached to failed attempts and terminal failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Connection could not be established (preflight or ssh handshake).
    Connect,
    /// An established session dropped mid-action.
    Disconnected,
    /// The remote call exceeded its time budget.
    Timeout,
    /// No session permit became available within the acquire timeout.
    PoolExhausted,
    /// Remote command exited with a code configured as transient.
    TransientExit,
    /// Remote command exited with any other non-zero code.
    NonTransientExit,
    /// The local file referenced by the action is unreadable or gone.
    LocalFile,
    /// The session pool is shutting down and refuses new work.
    PoolClosed,
    RetriesExhausted,
    DeadlineExceeded,
    Shutdown,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::Connect => "connect",
            FailureReason::Disconnected => "disconnected",
            FailureReason::Timeout => "timeout",
            FailureReason::PoolExhausted => "pool_exhausted",
            FailureReason::TransientExit => "transient_exit",
            FailureReason::NonTransientExit => "non_transient_exit",
            FailureReason::LocalFile => "local_file",
            FailureReason::PoolClosed => "pool_closed",
            FailureReason::RetriesExhausted => "retries_exhausted",
            FailureReason::DeadlineExceeded => "deadline_exceeded",
            FailureReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one attempt (or the terminal verdict) for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub task: TaskId,
    /// 1-based attempt number; 0 when the task never started an attempt.
    pub attempt: u32,
    pub status: ActionStatus,
    /// `true` for the single record that closes the task.
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ActionResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    /// Terminal `fatal_failure` for a task that gave up or never ran.
    #[must_use]
    pub fn dead_letter(task: TaskId, attempt: u32, reason: FailureReason) -> Self {
        Self {
            task,
            attempt,
            status: ActionStatus::FatalFailure,
            terminal: true,
            exit_code: None,
            duration_ms: 0,
            reason: Some(reason),
            error_detail: None,
            recorded_at: Utc::now(),
        }
    }
}
