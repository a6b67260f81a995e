//! Output formatting module

pub mod human;
pub mod json;
pub mod reporter;
pub mod styles;

use console::Term;
use owo_colors::OwoColorize as _;
pub use human::HumanRenderer;
pub use json::JsonRenderer;
pub use reporter::TerminalReporter;
pub use styles::Styles;

use crate::application::services::AgentSummary;
use crate::domain::MatchReport;
use crate::domain::preflight::PreflightChecks;

/// Output context carrying styling and terminal state.
pub struct OutputContext {
    /// Stylesheet for colored output.
    pub styles: Styles,
    /// Whether stdout is a TTY.
    pub is_tty: bool,
    /// Whether to suppress non-error output.
    pub quiet: bool,
}

impl OutputContext {
    /// Create output context based on CLI flags and environment.
    #[must_use]
    pub fn new(no_color: bool, quiet: bool) -> Self {
        let is_tty = Term::stdout().is_term();
        let use_colors = !no_color && is_tty && std::env::var("NO_COLOR").is_err();

        let mut styles = Styles::default();
        if use_colors {
            styles.colorize();
        }

        Self {
            styles,
            is_tty,
            quiet,
        }
    }

    /// Print a success message prefixed with `✓`. Suppressed when `quiet`.
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "✓".style(self.styles.success));
        }
    }

    /// Print a warning message prefixed with `⚠`. Suppressed when `quiet`.
    pub fn warn(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "⚠".style(self.styles.warning));
        }
    }

    /// Print an error message prefixed with `✗` to stderr. Never suppressed.
    pub fn error(&self, msg: &str) {
        eprintln!("  {} {msg}", "✗".style(self.styles.error));
    }

    /// Print an info message prefixed with `ℹ`. Suppressed when `quiet`.
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            println!("  {} {msg}", "ℹ".style(self.styles.info));
        }
    }

    /// Print a section header. Suppressed when `quiet`.
    pub fn header(&self, msg: &str) {
        if !self.quiet {
            println!("  {}", msg.style(self.styles.header));
        }
    }

    /// Print a key-value pair with the key dimmed. Suppressed when `quiet`.
    pub fn kv(&self, key: &str, value: &str) {
        if !self.quiet {
            println!("  {}  {value}", key.style(self.styles.dim));
        }
    }
}

/// Output renderer selected by `--json`.
pub enum Renderer<'a> {
    Human(HumanRenderer<'a>),
    Json(JsonRenderer),
}

impl Renderer<'_> {
    /// Render the CLI version.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_version(&self, version: &str) -> anyhow::Result<()> {
        match self {
            Renderer::Human(r) => {
                r.render_version(version);
                Ok(())
            }
            Renderer::Json(r) => r.render_version(version),
        }
    }

    /// Render preflight results and the issues derived from them.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_check(&self, checks: &PreflightChecks, issues: &[String]) -> anyhow::Result<()> {
        match self {
            Renderer::Human(r) => {
                r.render_check(checks, issues);
                Ok(())
            }
            Renderer::Json(r) => r.render_check(checks, issues),
        }
    }

    /// Render a dry-run match.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_match(&self, report: &MatchReport) -> anyhow::Result<()> {
        match self {
            Renderer::Human(r) => {
                r.render_match(report);
                Ok(())
            }
            Renderer::Json(r) => r.render_match(report),
        }
    }

    /// Render the counts reported when the agent stops.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn render_summary(&self, summary: &AgentSummary) -> anyhow::Result<()> {
        match self {
            Renderer::Human(r) => {
                r.render_summary(summary);
                Ok(())
            }
            Renderer::Json(r) => r.render_summary(summary),
        }
    }
}
