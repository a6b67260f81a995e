//! Application service: executes a resolved action with bounded retries.
//!
//! Every attempt is written to the audit log. A task always ends with
//! exactly one terminal `ActionResult`: a success, a fatal attempt, or a
//! dead letter (`retries_exhausted`, `deadline_exceeded`, `shutdown`).

use std::sync::Arc;

use tether_common::{ActionResult, AuditRecord, CoalescedTask, FailureReason, TaskId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::ports::{AuditSink, RemoteConnector, RemoteOutput};
use crate::application::services::pool::{SessionLease, SessionPool};
use crate::domain::{AttemptOutcome, Resolution, ResolvedAction, RetryPolicy, Step};

/// Runs actions against the session pool under a [`RetryPolicy`].
pub struct RetryController<C: RemoteConnector> {
    pool: SessionPool<C>,
    policy: Arc<RetryPolicy>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
}

impl<C: RemoteConnector> Clone for RetryController<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            policy: Arc::clone(&self.policy),
            audit: Arc::clone(&self.audit),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: RemoteConnector> RetryController<C> {
    #[must_use]
    pub fn new(
        pool: SessionPool<C>,
        policy: RetryPolicy,
        audit: Arc<dyn AuditSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            policy: Arc::new(policy),
            audit,
            cancel,
        }
    }

    /// Run `resolution` for `task` until it succeeds, fails fatally, or the
    /// retry budget runs out. Returns the terminal result.
    pub async fn execute(&self, task: &CoalescedTask, resolution: &Resolution) -> ActionResult {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return self.dead_letter(task.id, attempt, FailureReason::Shutdown, None);
            }
            attempt += 1;
            let attempt_started = Instant::now();
            let outcome = self.attempt(resolution).await;
            let transient = outcome.is_transient();
            let result = outcome.into_result(task.id, attempt, attempt_started.elapsed());
            self.record(&result);

            if !transient {
                if result.is_success() {
                    info!(task = %task.id, attempt, rule = %resolution.rule, "action succeeded");
                } else {
                    error!(
                        task = %task.id,
                        attempt,
                        rule = %resolution.rule,
                        detail = result.error_detail.as_deref().unwrap_or(""),
                        "action failed"
                    );
                }
                return result;
            }

            let unit: f64 = rand::random();
            match self.policy.next_step(attempt, started.elapsed(), unit) {
                Step::GiveUp(reason) => {
                    return self.dead_letter(task.id, attempt, reason, result.error_detail);
                }
                Step::RetryAfter(delay) => {
                    warn!(
                        task = %task.id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        detail = result.error_detail.as_deref().unwrap_or(""),
                        "transient failure, retrying"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            return self.dead_letter(task.id, attempt, FailureReason::Shutdown, None);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(&self, resolution: &Resolution) -> AttemptOutcome {
        let lease = match self.pool.acquire(&resolution.target).await {
            Ok(lease) => lease,
            Err(e) => return AttemptOutcome::from(&e),
        };

        match &resolution.action {
            ResolvedAction::Command { command } => self.run_command(&lease, command).await,
            ResolvedAction::Push {
                local,
                remote_path,
                front_matter,
                then,
            } => {
                match lease.push(local, front_matter.as_deref(), remote_path).await {
                    Ok(out) if out.exit_code == 0 => {
                        debug!(remote_path = %remote_path, "upload complete");
                    }
                    Ok(out) => return self.policy.classify_exit(out.exit_code, &out.stderr),
                    Err(e) => return AttemptOutcome::from(&e),
                }
                match then {
                    Some(command) => self.run_command(&lease, command).await,
                    None => AttemptOutcome::Succeeded { exit_code: 0 },
                }
            }
        }
    }

    async fn run_command(&self, lease: &SessionLease<C>, command: &str) -> AttemptOutcome {
        match lease.exec(command).await {
            Ok(output) => {
                log_output(&output);
                self.policy.classify_exit(output.exit_code, &output.stderr)
            }
            Err(e) => AttemptOutcome::from(&e),
        }
    }

    fn dead_letter(
        &self,
        task: TaskId,
        attempt: u32,
        reason: FailureReason,
        detail: Option<String>,
    ) -> ActionResult {
        let mut result = ActionResult::dead_letter(task, attempt, reason);
        result.error_detail = detail;
        error!(task = %task, attempt, %reason, "giving up on task");
        self.record(&result);
        result
    }

    fn record(&self, result: &ActionResult) {
        if let Err(e) = self.audit.append(&AuditRecord::Action(result.clone())) {
            warn!(task = %result.task, error = %e, "failed to write action audit record");
        }
    }
}

fn log_output(output: &RemoteOutput) {
    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        debug!(stream = "stdout", "{line}");
    }
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        warn!(stream = "stderr", "{line}");
    }
}
