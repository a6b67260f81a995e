//! `tether check`: validate configuration and probe targets.

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::preflight::run_preflight;
use crate::domain::preflight::collect_issues;
use crate::infra::fs::HostFs;
use crate::infra::network::TokioNetworkProbe;
use crate::output::TerminalReporter;

/// Run `tether check`.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or any check fails.
pub async fn run(app: &AppContext) -> Result<()> {
    let config = app.load_config()?;
    let reporter = if app.is_json() {
        TerminalReporter::silent(&app.output)
    } else {
        TerminalReporter::new(&app.output)
    };

    let checks = run_preflight(
        &config,
        &reporter,
        &app.command_runner(),
        &TokioNetworkProbe,
        &HostFs,
    )
    .await;
    let issues = collect_issues(&checks);
    app.renderer().render_check(&checks, &issues)?;

    match issues.len() {
        0 => Ok(()),
        1 => anyhow::bail!("1 issue found."),
        n => anyhow::bail!("{n} issues found."),
    }
}
