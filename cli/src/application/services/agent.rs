//! Application service: the long-running agent.
//!
//! Wires event source → debouncer → dispatcher → retry controller → pool
//! and owns the shutdown sequence: stop the source, flush open windows,
//! drain dispatched tasks, then drain the pool.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tether_common::{ActionResult, FailureReason};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::application::ports::{AuditSink, EventSource, FileDisposer, RemoteConnector};
use crate::application::services::debounce::run_debouncer;
use crate::application::services::dispatcher::{Dispatched, Dispatcher};
use crate::application::services::pool::SessionPool;
use crate::application::services::retry::RetryController;
use crate::domain::{AgentConfig, ConfigError, RetryPolicy, RuleTable};

const CHANNEL_CAPACITY: usize = 1024;

/// Counts reported when the agent stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentSummary {
    /// Tasks emitted by the debouncer.
    pub tasks: u64,
    /// Tasks no rule matched.
    pub no_ops: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Tasks dead-lettered by shutdown.
    pub cancelled: u64,
}

impl AgentSummary {
    fn observe(&mut self, result: &ActionResult) {
        if result.is_success() {
            self.succeeded += 1;
        } else if result.reason == Some(FailureReason::Shutdown) {
            self.cancelled += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// A configured agent, ready to run.
pub struct Agent<C: RemoteConnector> {
    config: AgentConfig,
    rules: Arc<RuleTable>,
    pool: SessionPool<C>,
    audit: Arc<dyn AuditSink>,
    disposer: Option<Arc<dyn FileDisposer>>,
}

impl<C: RemoteConnector> Agent<C> {
    /// Validate `config` and compile its rule table.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn new(
        config: AgentConfig,
        connector: C,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = Arc::new(RuleTable::compile(&config)?);
        let pool = SessionPool::new(
            Arc::new(connector),
            Arc::clone(&audit),
            config.pool.max_per_target,
            config.pool.acquire_timeout(),
        );
        Ok(Self {
            config,
            rules,
            pool,
            audit,
            disposer: None,
        })
    }

    #[must_use]
    pub fn with_disposer(mut self, disposer: Arc<dyn FileDisposer>) -> Self {
        self.disposer = Some(disposer);
        self
    }

    /// Handle to the session pool, for inspection.
    #[must_use]
    pub fn pool(&self) -> SessionPool<C> {
        self.pool.clone()
    }

    /// Run until `shutdown` is cancelled or the source ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the event source fails; in-flight work is still
    /// drained first.
    pub async fn run<S: EventSource>(
        self,
        source: S,
        shutdown: CancellationToken,
    ) -> Result<AgentSummary> {
        let (signal_tx, signal_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (task_tx, mut task_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let background = shutdown.child_token();

        let mut source_handle = tokio::spawn(source.run(signal_tx, shutdown.child_token()));
        let debouncer = tokio::spawn(run_debouncer(
            signal_rx,
            task_tx,
            self.config.debounce.window(),
            Arc::clone(&self.audit),
            shutdown.clone(),
        ));
        let health = self
            .pool
            .spawn_health_checker(self.config.pool.health_check_interval(), background.clone());

        let retry = RetryController::new(
            self.pool.clone(),
            RetryPolicy::from(&self.config.retry),
            Arc::clone(&self.audit),
            shutdown.clone(),
        );
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.rules),
            retry,
            Arc::clone(&self.audit),
            self.config.max_concurrent_tasks,
            shutdown.clone(),
        )
        .with_disposer(self.disposer.clone());

        info!(
            roots = self.config.watch.len(),
            rules = self.rules.rules().len(),
            "agent started"
        );

        let mut summary = AgentSummary::default();
        let mut running = JoinSet::new();
        let mut source_done = false;
        let mut fatal = None;

        loop {
            tokio::select! {
                task = task_rx.recv() => {
                    let Some(task) = task else { break };
                    summary.tasks += 1;
                    match dispatcher.dispatch(task) {
                        Dispatched::NoOp => summary.no_ops += 1,
                        Dispatched::Submitted(handle) => {
                            running.spawn(handle);
                        }
                    }
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    record_join(&mut summary, joined);
                }
                joined = &mut source_handle, if !source_done => {
                    source_done = true;
                    match joined {
                        Ok(Ok(())) => info!("event source stopped"),
                        Ok(Err(e)) => {
                            error!(error = %e, "event source failed; shutting down");
                            fatal = Some(anyhow!(e));
                            shutdown.cancel();
                        }
                        Err(e) => {
                            error!(error = %e, "event source task aborted; shutting down");
                            fatal = Some(anyhow!("event source task aborted: {e}"));
                            shutdown.cancel();
                        }
                    }
                }
            }
        }

        info!(pending = running.len(), "draining dispatched tasks");
        while let Some(joined) = running.join_next().await {
            record_join(&mut summary, joined);
        }
        if let Err(e) = debouncer.await {
            warn!(error = %e, "debouncer task aborted");
        }
        if !source_done {
            source_handle.abort();
        }

        background.cancel();
        if let Err(e) = health.await {
            warn!(error = %e, "health checker aborted");
        }
        self.pool.shutdown(self.config.pool.drain_grace()).await;

        info!(
            tasks = summary.tasks,
            no_ops = summary.no_ops,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "agent stopped"
        );
        match fatal {
            Some(e) => Err(e.context("event source failed")),
            None => Ok(summary),
        }
    }
}

fn record_join(
    summary: &mut AgentSummary,
    joined: Result<Result<ActionResult, JoinError>, JoinError>,
) {
    match joined {
        Ok(Ok(result)) => summary.observe(&result),
        Ok(Err(e)) | Err(e) => {
            error!(error = %e, "dispatched task panicked");
            summary.failed += 1;
        }
    }
}
