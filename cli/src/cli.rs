//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;

/// Run remote actions over SSH when watched files change
#[derive(Parser)]
#[command(
    name = "tether",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Diagnostic log filter (overrides RUST_LOG)
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Watch configured roots and run matching actions until Ctrl-C
    Run,

    /// Validate configuration and probe targets
    Check,

    /// Show which rule a path would trigger, without running it
    Match(commands::matching::MatchArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            config,
            json,
            quiet,
            no_color,
            command,
            ..
        } = self;
        let app = AppContext::new(AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            config,
        });
        match command {
            Command::Run => commands::run::run(&app).await,
            Command::Check => commands::check::run(&app).await,
            Command::Match(args) => commands::matching::run(&app, &args),
            Command::Version => commands::version::run(&app),
        }
    }
}
