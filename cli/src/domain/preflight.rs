//! Preflight check types and pure diagnostic functions.
//!
//! This module is intentionally free of I/O, async, and external layer imports.
//! All functions take data in and return data out.

use std::path::PathBuf;

use serde::Serialize;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Everything `tether check` looks at.
#[derive(Debug, Serialize)]
pub struct PreflightChecks {
    /// Whether the `ssh` client is on PATH.
    pub ssh_found: bool,
    /// Configuration or rule table error, if any.
    pub config_error: Option<String>,
    /// Number of compiled rules.
    pub rule_count: usize,
    pub roots: Vec<RootCheck>,
    pub targets: Vec<TargetCheck>,
}

/// State of one watch root on disk.
#[derive(Debug, Serialize)]
pub struct RootCheck {
    pub root: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
}

/// Reachability of one configured target.
#[derive(Debug, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TargetCheck {
    /// Name under `targets`.
    pub name: String,
    /// `user@host:port`.
    pub address: String,
    /// Whether the host name resolved.
    pub dns: bool,
    /// Whether a TCP connection to the ssh port succeeded.
    pub reachable: bool,
    /// Whether an identity file is configured.
    pub uses_identity_file: bool,
    /// Whether the configured identity file exists.
    pub identity_present: bool,
}

// ── Pure functions ────────────────────────────────────────────────────────────

/// Collect actionable issues from check results.
///
/// Returns a list of human-readable issue strings for any failing checks.
#[must_use]
pub fn collect_issues(checks: &PreflightChecks) -> Vec<String> {
    let mut issues = Vec::new();
    if !checks.ssh_found {
        issues.push("ssh client is not installed".to_string());
    }
    if let Some(err) = &checks.config_error {
        issues.push(format!("Invalid configuration: {err}"));
    }
    for root in &checks.roots {
        if !root.exists {
            issues.push(format!("Watch root {} does not exist", root.root.display()));
        } else if !root.is_dir {
            issues.push(format!(
                "Watch root {} is not a directory",
                root.root.display()
            ));
        }
    }
    for target in &checks.targets {
        if target.uses_identity_file && !target.identity_present {
            issues.push(format!(
                "Identity file for target '{}' is missing",
                target.name
            ));
        }
        if !target.dns {
            issues.push(format!(
                "Cannot resolve host for target '{}' ({})",
                target.name, target.address
            ));
        } else if !target.reachable {
            issues.push(format!(
                "Target '{}' ({}) is unreachable",
                target.name, target.address
            ));
        }
    }
    issues
}

// ── Unit tests ────────────────────────────────────────────────────────────────
