//! `TerminalReporter`: presentation-layer implementation of `ProgressReporter`.
//!
//! Lets application services emit progress without depending on any
//! presentation type directly.

use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter that wraps an `OutputContext`.
///
/// Prints nothing when the context is quiet or when built with
/// [`TerminalReporter::silent`] (used under `--json`).
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
    enabled: bool,
}

impl<'a> TerminalReporter<'a> {
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            enabled: !ctx.quiet,
        }
    }

    #[must_use]
    pub fn silent(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            enabled: false,
        }
    }
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        if self.enabled {
            println!("  {} {message}", "→".style(self.ctx.styles.info));
        }
    }

    fn success(&self, message: &str) {
        if self.enabled {
            println!("  {} {message}", "✓".style(self.ctx.styles.success));
        }
    }

    fn warn(&self, message: &str) {
        if self.enabled {
            println!("  {} {message}", "!".style(self.ctx.styles.warning));
        }
    }
}
