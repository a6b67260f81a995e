//! Integration tests for `tether check` and the startup checks of `tether run`.
//!
//! None of these tests reach a real host: targets point at a closed local
//! port, and `run` is only exercised on configurations it must refuse.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tether() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tether"));
    cmd.env("NO_COLOR", "1").env_remove("TETHER_CONFIG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, body).expect("write config");
    path
}

/// A root under `dir`, one target on a closed local port and one rule.
fn config_body(dir: &Path, root: &Path, auth_ref: &str) -> String {
    format!(
        "\
watch:
  - root: {root}
targets:
  blog:
    host: 127.0.0.1
    user: deploy
    port: 1
    auth_ref: {auth_ref}
rules:
  - name: publish
    pattern: '\\.md$'
    target: blog
    command: publish {{path}}
audit:
  path: {dir}/audit.log
pool:
  preflight_timeout_ms: 500
",
        root = root.display(),
        dir = dir.display(),
    )
}

// ── check ─────────────────────────────────────────────────────────────────────

#[test]
fn test_check_without_targets_reports_configuration_issue() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(
        dir.path(),
        &format!("watch:\n  - root: {}\n", dir.path().display()),
    );

    tether()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No remote targets configured"))
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("found."));
}

#[test]
fn test_check_json_reports_unreachable_target() {
    let dir = TempDir::new().expect("temp dir");
    let body = config_body(dir.path(), dir.path(), "agent");
    let config = write_config(dir.path(), &body);

    let output = tether()
        .arg("--config")
        .arg(&config)
        .args(["--json", "check"])
        .output()
        .expect("run tether");

    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["ok"], false);
    assert_eq!(value["checks"]["rule_count"], 1);
    assert_eq!(value["checks"]["targets"][0]["reachable"], false);
    let issues = value["issues"].as_array().expect("issues array");
    assert!(
        issues
            .iter()
            .any(|i| i.as_str().unwrap_or("").contains("unreachable")),
        "got: {issues:?}"
    );
}

#[test]
fn test_check_missing_identity_hides_path() {
    let dir = TempDir::new().expect("temp dir");
    let key = dir.path().join("id_secret");
    let body = config_body(dir.path(), dir.path(), &key.display().to_string());
    let config = write_config(dir.path(), &body);

    tether()
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Identity file for target 'blog' is missing"))
        .stdout(predicate::str::contains("id_secret").not())
        .stderr(predicate::str::contains("id_secret").not());
}

// ── run startup ───────────────────────────────────────────────────────────────

#[test]
fn test_run_refuses_missing_watch_root() {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().join("absent");
    let body = config_body(dir.path(), &root, "agent");
    let config = write_config(dir.path(), &body);

    tether()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("does not exist"));
    assert!(!dir.path().join("audit.log").exists());
}

#[test]
fn test_run_refuses_missing_identity_without_leaking_path() {
    let dir = TempDir::new().expect("temp dir");
    let key = dir.path().join("id_secret");
    let body = config_body(dir.path(), dir.path(), &key.display().to_string());
    let config = write_config(dir.path(), &body);

    tether()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Identity file for target 'blog'"))
        .stderr(predicate::str::contains("id_secret").not());
}

#[test]
fn test_run_refuses_invalid_pattern() {
    let dir = TempDir::new().expect("temp dir");
    let body = config_body(dir.path(), dir.path(), "agent").replace("'\\.md$'", "'('");
    let config = write_config(dir.path(), &body);

    tether()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid pattern"));
}
