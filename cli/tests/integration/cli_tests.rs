//! Integration tests for the tether CLI skeleton
//!
//! These tests verify the command structure and argument parsing.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn tether() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tether"));
    cmd.env("NO_COLOR", "1").env_remove("TETHER_CONFIG");
    cmd
}

// --- Help and version tests ---

#[test]
fn test_cli_no_args_shows_help_and_exits_two() {
    // clap with arg_required_else_help shows help on stderr and exits 2
    tether().assert().code(2).stderr(predicate::str::contains(
        "Run remote actions over SSH when watched files change",
    ));
}

#[test]
fn test_cli_help_flag_shows_help() {
    tether()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("Commands:"));
}

#[test]
fn test_cli_version_flag_shows_version() {
    tether()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether"));
}

#[test]
fn test_version_command_shows_version() {
    tether()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether 0.1.0"));
}

#[test]
fn test_version_command_json_outputs_valid_json() {
    let output = tether()
        .args(["version", "--json"])
        .output()
        .expect("run tether");
    assert!(output.status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(value["version"], "0.1.0");
}

#[test]
fn test_quiet_version_prints_nothing() {
    tether()
        .args(["-q", "version"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// --- Command hierarchy tests ---

#[test]
fn test_help_lists_all_commands() {
    let output = tether().arg("--help").output().expect("run tether");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "check", "match", "version"] {
        assert!(
            stdout.contains(&format!("  {command}")),
            "missing {command} in:\n{stdout}"
        );
    }
}

#[test]
fn test_match_help_shows_kind_values() {
    tether()
        .args(["match", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--kind"))
        .stdout(predicate::str::contains("deleted"));
}

#[test]
fn test_match_rejects_unknown_kind() {
    tether()
        .args(["match", "/tmp/a.md", "--kind", "renamed"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_unknown_command_exits_with_error() {
    tether()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_global_flags_accepted_after_subcommand() {
    tether()
        .args(["version", "--no-color", "--log-level", "debug"])
        .assert()
        .success();
}
