//! Retry schedule and attempt classification.
//!
//! Randomness is injected as a unit value in `[0, 1]` so the schedule stays
//! deterministic under test.

use std::time::Duration;

use chrono::Utc;
use tether_common::{ActionResult, ActionStatus, FailureReason, TaskId};

use crate::domain::config::RetryConfig;
use crate::domain::error::{PoolError, RemoteError};

/// Exponential backoff with jitter, bounded by attempts and elapsed time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max_delay: Duration,
    pub max_elapsed: Duration,
    pub jitter_ratio: f64,
    pub transient_exit_codes: Vec<i32>,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            transient_exit_codes: config.transient_exit_codes.clone(),
        }
    }
}

/// What to do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RetryAfter(Duration),
    GiveUp(FailureReason),
}

impl RetryPolicy {
    /// Un-jittered delay before attempt `attempt + 1`: `min(base * 2^(n-1), max)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(31);
        let scaled = self.base.saturating_mul(1u32 << exp);
        scaled.min(self.max_delay)
    }

    /// Backoff spread by `±jitter_ratio`, placed in that range by `unit`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let anchor = self.backoff(attempt).as_millis() as f64;
        if anchor == 0.0 {
            return Duration::ZERO;
        }
        let span = anchor * self.jitter_ratio;
        let lower = (anchor - span).max(0.0);
        let upper = (anchor + span).min(self.max_delay.as_millis() as f64);
        if upper <= lower {
            return Duration::from_millis(lower.round() as u64);
        }
        let unit = unit.clamp(0.0, 1.0);
        Duration::from_millis((lower + (upper - lower) * unit).round() as u64)
    }

    /// Decides whether attempt `attempt` (1-based, just failed transiently)
    /// is followed by another one.
    #[must_use]
    pub fn next_step(&self, attempt: u32, elapsed: Duration, unit: f64) -> Step {
        if attempt >= self.max_attempts {
            return Step::GiveUp(FailureReason::RetriesExhausted);
        }
        let delay = self.jittered(attempt, unit);
        if elapsed.saturating_add(delay) > self.max_elapsed {
            return Step::GiveUp(FailureReason::DeadlineExceeded);
        }
        Step::RetryAfter(delay)
    }

    /// Classifies a completed remote command by its exit code.
    #[must_use]
    pub fn classify_exit(&self, exit_code: i32, stderr: &str) -> AttemptOutcome {
        if exit_code == 0 {
            return AttemptOutcome::Succeeded { exit_code };
        }
        let detail = summarize(stderr, exit_code);
        if self.transient_exit_codes.contains(&exit_code) {
            AttemptOutcome::Transient {
                reason: FailureReason::TransientExit,
                exit_code: Some(exit_code),
                detail,
            }
        } else {
            AttemptOutcome::Fatal {
                reason: FailureReason::NonTransientExit,
                exit_code: Some(exit_code),
                detail,
            }
        }
    }
}

fn summarize(stderr: &str, exit_code: i32) -> String {
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
    match last {
        Some(line) => format!("exit {exit_code}: {}", line.trim()),
        None => format!("exit {exit_code}"),
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded {
        exit_code: i32,
    },
    Transient {
        reason: FailureReason,
        exit_code: Option<i32>,
        detail: String,
    },
    Fatal {
        reason: FailureReason,
        exit_code: Option<i32>,
        detail: String,
    },
}

impl From<&RemoteError> for AttemptOutcome {
    fn from(err: &RemoteError) -> Self {
        let detail = err.to_string();
        if err.is_transient() {
            AttemptOutcome::Transient {
                reason: err.reason(),
                exit_code: None,
                detail,
            }
        } else {
            AttemptOutcome::Fatal {
                reason: err.reason(),
                exit_code: None,
                detail,
            }
        }
    }
}

impl From<&PoolError> for AttemptOutcome {
    fn from(err: &PoolError) -> Self {
        if let PoolError::Remote(remote) = err {
            return remote.into();
        }
        let detail = err.to_string();
        if err.is_transient() {
            AttemptOutcome::Transient {
                reason: err.reason(),
                exit_code: None,
                detail,
            }
        } else {
            AttemptOutcome::Fatal {
                reason: err.reason(),
                exit_code: None,
                detail,
            }
        }
    }
}

impl AttemptOutcome {
    #[must_use]
    pub fn status(&self) -> ActionStatus {
        match self {
            AttemptOutcome::Succeeded { .. } => ActionStatus::Success,
            AttemptOutcome::Transient { .. } => ActionStatus::TransientFailure,
            AttemptOutcome::Fatal { .. } => ActionStatus::FatalFailure,
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AttemptOutcome::Transient { .. })
    }

    /// Builds the audit record for this attempt. Success and fatal outcomes
    /// are always terminal.
    #[must_use]
    pub fn into_result(self, task: TaskId, attempt: u32, duration: Duration) -> ActionResult {
        let status = self.status();
        let (exit_code, reason, error_detail) = match self {
            AttemptOutcome::Succeeded { exit_code } => (Some(exit_code), None, None),
            AttemptOutcome::Transient {
                reason,
                exit_code,
                detail,
            }
            | AttemptOutcome::Fatal {
                reason,
                exit_code,
                detail,
            } => (exit_code, Some(reason), Some(detail)),
        };
        ActionResult {
            task,
            attempt,
            status,
            terminal: status != ActionStatus::TransientFailure,
            exit_code,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            reason,
            error_detail,
            recorded_at: Utc::now(),
        }
    }
}
