//! Integration tests for `tether match`.
//!
//! Every test points `--config` at a temp file so nothing reads
//! `~/.tether/config.yaml`.

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

/// Writes a config watching `<dir>/inbox` and returns its path.
fn write_config(dir: &Path, target: &str) -> PathBuf {
    let root = dir.join("inbox");
    let yaml = format!(
        "\
watch:
  - root: {root}
targets:
  blog:
    host: web.example.com
    user: deploy
    auth_ref: {dir}/keys/id_secret
rules:
  - name: publish
    pattern: '\\.md$'
    kinds: [created, modified]
    target: {target}
    command: publish {{relative_path}}
",
        root = root.display(),
        dir = dir.display(),
    );
    let path = dir.join("config.yaml");
    std::fs::write(&path, yaml).expect("write config");
    path
}

#[test]
fn test_match_reports_rule_target_and_action() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), "blog");
    let file = dir.path().join("inbox").join("posts").join("hello.md");

    tether()
        .arg("--config")
        .arg(&config)
        .arg("match")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("posts/hello.md"))
        .stdout(predicate::str::contains("publish"))
        .stdout(predicate::str::contains("deploy@web.example.com:22"))
        .stdout(predicate::str::contains("run: publish posts/hello.md"))
        .stdout(predicate::str::contains("id_secret").not());
}

#[test]
fn test_match_no_rule_warns_and_succeeds() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), "blog");
    let file = dir.path().join("inbox").join("notes.txt");

    tether()
        .arg("--config")
        .arg(&config)
        .arg("match")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("No rule matches"));
}

#[test]
fn test_match_json_omits_rule_when_kind_filtered() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), "blog");
    let file = dir.path().join("inbox").join("hello.md");

    let output = tether()
        .arg("--config")
        .arg(&config)
        .args(["--json", "match", "--kind", "deleted"])
        .arg(&file)
        .output()
        .expect("run tether");

    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["relative_path"], "hello.md");
    assert_eq!(value["kind"], "deleted");
    assert!(value.get("rule").is_none(), "got: {value}");
}

#[test]
fn test_match_json_never_includes_identity_path() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), "blog");
    let file = dir.path().join("inbox").join("hello.md");

    let output = tether()
        .arg("--config")
        .arg(&config)
        .args(["--json", "match"])
        .arg(&file)
        .output()
        .expect("run tether");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"rule\": \"publish\""), "got: {stdout}");
    assert!(!stdout.contains("id_secret"), "got: {stdout}");
}

#[test]
fn test_match_unknown_target_fails_with_error() {
    let dir = TempDir::new().expect("temp dir");
    let config = write_config(dir.path(), "docs");

    tether()
        .arg("--config")
        .arg(&config)
        .args(["match", "/tmp/hello.md"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("unknown target 'docs'"));
}

#[test]
fn test_match_missing_config_file_fails() {
    let dir = TempDir::new().expect("temp dir");

    tether()
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .args(["match", "/tmp/hello.md"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
