//! Unit tests for the preflight service.
//!
//! `check_startup` gates `tether run`; `run_preflight` backs `tether check`
//! and must capture every problem instead of stopping at the first.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use tether_cli::application::services::preflight::{check_startup, run_preflight};
use tether_cli::domain::preflight::collect_issues;
use tether_cli::domain::{AuthRef, ConfigError, StartupError};

use crate::helpers::agent_config;
use crate::mocks::{FakeFs, NoopReporter, StubProbe, StubRunner};

const ROOT: &str = "/srv/inbox";
const IDENTITY: &str = "/home/me/.ssh/id_deploy";

fn healthy_probe() -> StubProbe {
    StubProbe {
        dns: true,
        tcp: true,
    }
}

// ── check_startup ─────────────────────────────────────────────────────────────

#[test]
fn test_check_startup_accepts_existing_root() {
    let config = agent_config(Path::new(ROOT));
    check_startup(&config, &FakeFs::with_dirs(&[ROOT])).expect("startup ok");
}

#[test]
fn test_check_startup_rejects_missing_root() {
    let config = agent_config(Path::new(ROOT));
    let err = check_startup(&config, &FakeFs::default()).unwrap_err();
    assert!(matches!(err, StartupError::WatchRootMissing(_)), "got: {err}");
}

#[test]
fn test_check_startup_rejects_file_as_root() {
    let config = agent_config(Path::new(ROOT));
    let err = check_startup(&config, &FakeFs::default().file(ROOT)).unwrap_err();
    assert!(
        matches!(err, StartupError::WatchRootNotDirectory(_)),
        "got: {err}"
    );
}

#[test]
fn test_check_startup_rejects_invalid_config_first() {
    let mut config = agent_config(Path::new(ROOT));
    config.targets.clear();
    let err = check_startup(&config, &FakeFs::with_dirs(&[ROOT])).unwrap_err();
    assert!(matches!(err, StartupError::Config(ConfigError::NoTargets)));
}

#[test]
fn test_check_startup_rejects_bad_pattern() {
    let mut config = agent_config(Path::new(ROOT));
    config.rules[0].pattern = "(".to_string();
    let err = check_startup(&config, &FakeFs::with_dirs(&[ROOT])).unwrap_err();
    assert!(err.to_string().contains("invalid pattern"), "got: {err}");
}

#[test]
fn test_check_startup_missing_identity_names_target_not_path() {
    let mut config = agent_config(Path::new(ROOT));
    if let Some(target) = config.targets.get_mut("blog") {
        target.auth_ref = AuthRef::new(IDENTITY);
    }
    let err = check_startup(&config, &FakeFs::with_dirs(&[ROOT])).unwrap_err();

    let msg = err.to_string();
    assert!(matches!(err, StartupError::IdentityMissing(_)));
    assert!(msg.contains("'blog'"), "got: {msg}");
    assert!(!msg.contains("id_deploy"), "got: {msg}");

    let fs = FakeFs::with_dirs(&[ROOT]).file(IDENTITY);
    check_startup(&config, &fs).expect("identity present");
}

// ── run_preflight ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_preflight_all_healthy_has_no_issues() {
    let config = agent_config(Path::new(ROOT));
    let checks = run_preflight(
        &config,
        &NoopReporter,
        &StubRunner { code: 0 },
        &healthy_probe(),
        &FakeFs::with_dirs(&[ROOT]),
    )
    .await;

    assert!(checks.ssh_found);
    assert_eq!(checks.rule_count, 2);
    assert_eq!(checks.targets[0].address, "deploy@web.example.com:22");
    assert!(collect_issues(&checks).is_empty());
}

#[tokio::test]
async fn test_run_preflight_collects_every_problem() {
    let mut config = agent_config(Path::new(ROOT));
    if let Some(target) = config.targets.get_mut("blog") {
        target.auth_ref = AuthRef::new(IDENTITY);
    }
    let checks = run_preflight(
        &config,
        &NoopReporter,
        &StubRunner { code: 127 },
        &StubProbe {
            dns: true,
            tcp: false,
        },
        &FakeFs::default(),
    )
    .await;

    assert!(!checks.ssh_found);
    assert!(!checks.roots[0].exists);
    assert!(!checks.targets[0].reachable);
    assert!(!checks.targets[0].identity_present);
    let issues = collect_issues(&checks);
    assert_eq!(issues.len(), 4, "got: {issues:?}");
    assert!(issues.iter().all(|i| !i.contains("id_deploy")));
}

#[tokio::test]
async fn test_run_preflight_skips_tcp_when_dns_fails() {
    let config = agent_config(Path::new(ROOT));
    let checks = run_preflight(
        &config,
        &NoopReporter,
        &StubRunner { code: 0 },
        &StubProbe {
            dns: false,
            tcp: true,
        },
        &FakeFs::with_dirs(&[ROOT]),
    )
    .await;

    assert!(!checks.targets[0].dns);
    assert!(!checks.targets[0].reachable);
    assert_eq!(collect_issues(&checks).len(), 1);
}

#[tokio::test]
async fn test_run_preflight_reports_config_error_without_failing() {
    let mut config = agent_config(Path::new(ROOT));
    config.rules[1].target = "docs".to_string();
    let checks = run_preflight(
        &config,
        &NoopReporter,
        &StubRunner { code: 0 },
        &healthy_probe(),
        &FakeFs::with_dirs(&[ROOT]),
    )
    .await;

    let err = checks.config_error.as_deref().expect("config error");
    assert!(err.contains("unknown target 'docs'"), "got: {err}");
    assert_eq!(checks.rule_count, 0);
}
