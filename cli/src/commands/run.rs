//! `tether run`: run the agent until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::AppContext;
use crate::application::ports::{AuditSink, FileDisposer};
use crate::application::services::Agent;
use crate::application::services::preflight::check_startup;
use crate::infra::audit::JsonLinesAuditLog;
use crate::infra::fs::{FsDisposer, HostFs};
use crate::infra::watcher::NotifyEventSource;

/// Run `tether run`.
///
/// # Errors
///
/// Returns an error on invalid configuration, a missing watch root or
/// identity file, or when a watch root vanishes for good.
pub async fn run(app: &AppContext) -> Result<()> {
    let config = app.load_config()?;
    check_startup(&config, &HostFs)?;

    let audit: Arc<dyn AuditSink> = Arc::new(
        JsonLinesAuditLog::open(&config.audit.path).context("cannot open audit log")?,
    );
    let connector = app.connector(&config)?;
    let source = NotifyEventSource::new(config.watch.clone(), config.watcher.clone());
    let disposer = config
        .disposition
        .as_ref()
        .map(|d| Arc::new(FsDisposer::new(d)) as Arc<dyn FileDisposer>);
    let roots = config.watch.len();

    let mut agent = Agent::new(config, connector, audit)?;
    if let Some(disposer) = disposer {
        agent = agent.with_disposer(disposer);
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            on_signal.cancel();
        }
    });

    if !app.is_json() {
        app.output.info(&format!(
            "Watching {roots} {}. Press Ctrl-C to stop.",
            if roots == 1 { "root" } else { "roots" }
        ));
    }
    let summary = agent.run(source, shutdown).await?;
    app.renderer().render_summary(&summary)
}
