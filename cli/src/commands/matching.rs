//! `tether match`: dry-run the rule table for one path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tether_common::ChangeKind;

use crate::app::AppContext;
use crate::domain::RuleTable;

/// Arguments for the match command.
#[derive(Args)]
pub struct MatchArgs {
    /// File path, absolute or relative to the current directory
    pub path: PathBuf,

    /// Change kind to simulate
    #[arg(long, value_enum, default_value = "modified")]
    pub kind: ChangeKind,
}

/// Run `tether match`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the rule table does
/// not compile.
pub fn run(app: &AppContext, args: &MatchArgs) -> Result<()> {
    let config = app.load_config()?;
    let rules = RuleTable::compile(&config).context("invalid rule table")?;
    let path = absolute(&args.path)?;
    let report = rules.dry_run(&path, args.kind, Utc::now());
    app.renderer().render_match(&report)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(cwd.join(path))
}
