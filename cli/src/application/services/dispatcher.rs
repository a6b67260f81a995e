//! Application service: maps coalesced tasks to remote actions.
//!
//! Every task gets a `dispatch` audit record. Matched tasks are executed on
//! their own tokio task, bounded by a global concurrency limit.

use std::sync::Arc;

use chrono::Local;
use tether_common::{
    ActionResult, AuditRecord, ChangeKind, CoalescedTask, DispatchDecision, FailureReason,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{AuditSink, FileDisposer, RemoteConnector};
use crate::application::services::retry::RetryController;
use crate::domain::RuleTable;

/// Result of dispatching one task.
#[derive(Debug)]
pub enum Dispatched {
    /// No rule matched; nothing runs remotely.
    NoOp,
    /// The action is running; the handle yields its terminal result.
    Submitted(JoinHandle<ActionResult>),
}

/// Resolves tasks against the rule table and hands them to the retry
/// controller.
pub struct Dispatcher<C: RemoteConnector> {
    rules: Arc<RuleTable>,
    retry: RetryController<C>,
    audit: Arc<dyn AuditSink>,
    limiter: Arc<Semaphore>,
    disposer: Option<Arc<dyn FileDisposer>>,
    cancel: CancellationToken,
}

impl<C: RemoteConnector> Dispatcher<C> {
    #[must_use]
    pub fn new(
        rules: Arc<RuleTable>,
        retry: RetryController<C>,
        audit: Arc<dyn AuditSink>,
        max_concurrent_tasks: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rules,
            retry,
            audit,
            limiter: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            disposer: None,
            cancel,
        }
    }

    #[must_use]
    pub fn with_disposer(mut self, disposer: Option<Arc<dyn FileDisposer>>) -> Self {
        self.disposer = disposer;
        self
    }

    /// Record the decision for `task` and start its action if a rule matched.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, task: CoalescedTask) -> Dispatched {
        let today = task.last_seen.with_timezone(&Local).date_naive();
        let resolution = self.rules.resolve(&task, today);

        let decision = match &resolution {
            Some(r) => DispatchDecision::Matched {
                rule: r.rule.clone(),
                target: r.target_name.clone(),
            },
            None => DispatchDecision::NoMatch,
        };
        let record = AuditRecord::Dispatch {
            task: task.id,
            path: task.path.clone(),
            kind: task.kind,
            decision,
            at: task.last_seen,
        };
        if let Err(e) = self.audit.append(&record) {
            warn!(task = %task.id, error = %e, "failed to write dispatch audit record");
        }

        let Some(resolution) = resolution else {
            debug!(task = %task.id, path = %task.path.display(), "no rule matched");
            return Dispatched::NoOp;
        };
        info!(
            task = %task.id,
            path = %task.path.display(),
            kind = %task.kind,
            rule = %resolution.rule,
            remote = %resolution.target.key(),
            "{}",
            resolution.action.describe()
        );

        let retry = self.retry.clone();
        let limiter = Arc::clone(&self.limiter);
        let disposer = self.disposer.clone();
        let cancel = self.cancel.clone();
        let audit = Arc::clone(&self.audit);

        Dispatched::Submitted(tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = limiter.acquire_owned() => permit.ok(),
            };
            let result = match permit {
                Some(_permit) => retry.execute(&task, &resolution).await,
                None => {
                    let result = ActionResult::dead_letter(task.id, 0, FailureReason::Shutdown);
                    if let Err(e) = audit.append(&AuditRecord::Action(result.clone())) {
                        warn!(task = %task.id, error = %e, "failed to write action audit record");
                    }
                    result
                }
            };
            if let Some(disposer) = disposer {
                dispose(disposer, &task, &result).await;
            }
            result
        }))
    }
}

/// Moves the local file on the blocking pool once its task is finished.
/// Never fatal.
async fn dispose(disposer: Arc<dyn FileDisposer>, task: &CoalescedTask, result: &ActionResult) {
    if task.kind == ChangeKind::Deleted || result.reason == Some(FailureReason::Shutdown) {
        return;
    }
    let path = task.path.clone();
    let succeeded = result.is_success();
    let moved = tokio::task::spawn_blocking(move || disposer.dispose(&path, succeeded)).await;
    match moved {
        Ok(Ok(Some(dest))) => {
            debug!(task = %task.id, dest = %dest.display(), "moved finished file");
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => warn!(task = %task.id, error = %e, "failed to move finished file"),
        Err(e) => warn!(task = %task.id, error = %e, "file move task failed"),
    }
}
