//! JSON output helpers.
//!
//! `JsonRenderer` prints one pretty-printed object per command;
//! `format_error` is used by every `--json` code path when a command fails.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::application::services::AgentSummary;
use crate::domain::MatchReport;
use crate::domain::preflight::PreflightChecks;

/// Format a JSON error object.
///
/// Output (pretty-printed):
/// ```json
/// {
///   "error": true,
///   "message": "..."
/// }
/// ```
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_error(message: &str) -> Result<String> {
    let obj = serde_json::json!({
        "error": true,
        "message": message,
    });
    serde_json::to_string_pretty(&obj).context("JSON serialization failed")
}

/// Renders command results as JSON on stdout.
pub struct JsonRenderer;

#[derive(Serialize)]
struct CheckOutput<'a> {
    ok: bool,
    checks: &'a PreflightChecks,
    issues: &'a [String],
}

impl JsonRenderer {
    fn print(value: &impl Serialize) -> Result<()> {
        let out = serde_json::to_string_pretty(value).context("JSON serialization failed")?;
        println!("{out}");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_version(&self, version: &str) -> Result<()> {
        Self::print(&serde_json::json!({ "version": version }))
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_check(&self, checks: &PreflightChecks, issues: &[String]) -> Result<()> {
        Self::print(&CheckOutput {
            ok: issues.is_empty(),
            checks,
            issues,
        })
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_match(&self, report: &MatchReport) -> Result<()> {
        Self::print(report)
    }

    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_summary(&self, summary: &AgentSummary) -> Result<()> {
        Self::print(summary)
    }
}
