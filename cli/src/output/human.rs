//! Human-readable terminal renderer.

use owo_colors::OwoColorize as _;

use crate::application::services::AgentSummary;
use crate::domain::MatchReport;
use crate::domain::preflight::PreflightChecks;
use crate::output::OutputContext;

/// Renders domain types as human-readable terminal output using `OutputContext`.
pub struct HumanRenderer<'a> {
    ctx: &'a OutputContext,
}

impl<'a> HumanRenderer<'a> {
    /// Create a new `HumanRenderer` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self { ctx }
    }

    /// Render the CLI version information.
    pub fn render_version(&self, version: &str) {
        if !self.ctx.quiet {
            println!("tether {version}");
        }
    }

    /// Render `tether check` results.
    pub fn render_check(&self, checks: &PreflightChecks, issues: &[String]) {
        if !self.ctx.quiet {
            println!();
            self.ctx.header("tether preflight");
            println!();

            println!("  Prerequisites:");
            self.print_check(checks.ssh_found, "ssh client installed");
            println!();

            println!("  Configuration:");
            match &checks.config_error {
                None => self.print_check(true, &format!("{} rules compiled", checks.rule_count)),
                Some(err) => self.print_check(false, err),
            }
            println!();

            println!("  Watch roots:");
            for root in &checks.roots {
                self.print_check(root.exists && root.is_dir, &root.root.display().to_string());
            }
            println!();

            println!("  Targets:");
            for target in &checks.targets {
                let ok = target.dns && target.reachable && target.identity_present;
                self.print_check(
                    ok,
                    &format!(
                        "{} {}",
                        target.name,
                        target.address.style(self.ctx.styles.dim)
                    ),
                );
            }
            println!();
        }

        if issues.is_empty() {
            self.ctx.success("Everything looks good!");
        } else {
            for issue in issues {
                self.ctx.error(issue);
            }
        }
    }

    /// Render a dry-run match.
    pub fn render_match(&self, report: &MatchReport) {
        self.ctx.kv("Path:", &report.relative_path);
        self.ctx.kv("Kind:", report.kind.as_str());
        match (&report.rule, &report.action) {
            (Some(rule), Some(action)) => {
                self.ctx.kv("Rule:", &rule.style(self.ctx.styles.accent).to_string());
                if let (Some(target), Some(remote)) = (&report.target, &report.remote) {
                    self.ctx.kv("Target:", &format!("{target} ({remote})"));
                }
                self.ctx.kv("Action:", action);
            }
            _ => self.ctx.warn("No rule matches; nothing would run."),
        }
    }

    /// Render the shutdown summary of `tether run`.
    pub fn render_summary(&self, summary: &AgentSummary) {
        self.ctx.info(&format_summary(summary));
    }

    fn print_check(&self, ok: bool, msg: &str) {
        if ok {
            println!("    {} {msg}", "\u{2713}".style(self.ctx.styles.success));
        } else {
            println!("    {} {msg}", "\u{2717}".style(self.ctx.styles.error));
        }
    }
}

// ── Display helpers ──────────────────────────────────────────────────────────

#[must_use]
pub fn format_summary(summary: &AgentSummary) -> String {
    let mut line = format!(
        "{} {}: {} succeeded, {} failed",
        summary.tasks,
        if summary.tasks == 1 { "task" } else { "tasks" },
        summary.succeeded,
        summary.failed,
    );
    if summary.no_ops > 0 {
        line.push_str(&format!(", {} unmatched", summary.no_ops));
    }
    if summary.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", summary.cancelled));
    }
    line
}
