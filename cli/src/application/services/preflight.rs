//! Application service: preflight checks behind `tether check`.
//!
//! Imports only from `crate::domain` and `crate::application::ports`.
//! All I/O is routed through injected port traits.

use std::time::Duration;

use crate::application::ports::{CommandRunner, LocalFs, NetworkProbe, ProgressReporter};
use crate::domain::preflight::{PreflightChecks, RootCheck, TargetCheck};
use crate::domain::{AgentConfig, RuleTable, StartupError};

/// Checks that must pass before `tether run` starts anything.
///
/// # Errors
///
/// Returns the first invalid setting, missing or non-directory watch root,
/// or missing identity file.
pub fn check_startup(config: &AgentConfig, fs: &impl LocalFs) -> Result<(), StartupError> {
    config.validate()?;
    RuleTable::compile(config)?;
    for watch in &config.watch {
        if !fs.exists(&watch.root) {
            return Err(StartupError::WatchRootMissing(watch.root.clone()));
        }
        if !fs.is_dir(&watch.root) {
            return Err(StartupError::WatchRootNotDirectory(watch.root.clone()));
        }
    }
    for (name, target) in &config.targets {
        if target
            .auth_ref
            .identity_file()
            .is_some_and(|identity| !fs.exists(&identity))
        {
            return Err(StartupError::IdentityMissing(name.clone()));
        }
    }
    Ok(())
}

/// Validate `config` and probe every watch root and target.
///
/// Never fails: every problem is captured in the returned checks.
pub async fn run_preflight(
    config: &AgentConfig,
    reporter: &impl ProgressReporter,
    cmd_runner: &impl CommandRunner,
    network_probe: &impl NetworkProbe,
    fs: &impl LocalFs,
) -> PreflightChecks {
    reporter.step("checking prerequisites...");
    let ssh_found = cmd_runner.run("ssh", &["-V"]).await.is_ok();

    reporter.step("validating configuration...");
    let (config_error, rule_count) = match config
        .validate()
        .and_then(|()| RuleTable::compile(config))
    {
        Ok(table) => (None, table.rules().len()),
        Err(e) => (Some(e.to_string()), 0),
    };

    reporter.step("checking watch roots...");
    let roots = config
        .watch
        .iter()
        .map(|w| RootCheck {
            root: w.root.clone(),
            exists: fs.exists(&w.root),
            is_dir: fs.is_dir(&w.root),
        })
        .collect();

    reporter.step("checking targets...");
    let timeout = Duration::from_millis(config.pool.preflight_timeout_ms);
    let mut targets = Vec::with_capacity(config.targets.len());
    for (name, target) in &config.targets {
        let dns = network_probe
            .check_dns_resolution(&target.host)
            .await
            .unwrap_or(false);
        let reachable = dns
            && network_probe
                .check_tcp_connectivity(&target.host, target.port, timeout)
                .await
                .unwrap_or(false);
        let identity = target.auth_ref.identity_file();
        targets.push(TargetCheck {
            name: name.clone(),
            address: target.key().to_string(),
            dns,
            reachable,
            uses_identity_file: identity.is_some(),
            identity_present: identity.is_none_or(|p| fs.exists(&p)),
        });
    }

    reporter.success("preflight complete");
    PreflightChecks {
        ssh_found,
        config_error,
        rule_count,
        roots,
        targets,
    }
}
