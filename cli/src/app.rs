//! Application context: unified state passed to every command handler.
//!
//! `AppContext` owns output settings and the configuration store, and is the
//! one place where production adapters (process runner, network probe, ssh
//! connector) are constructed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::application::ports::ConfigStore;
use crate::domain::AgentConfig;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::config::YamlConfigStore;
use crate::infra::fs::expand_home;
use crate::infra::network::TokioNetworkProbe;
use crate::infra::ssh::{OpenSshConnector, SshTimeouts};
use crate::output::{HumanRenderer, JsonRenderer, OutputContext, Renderer};

/// Default directory for ssh control sockets.
const DEFAULT_CONTROL_DIR: &str = "~/.tether/ctl";

/// Output rendering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable terminal output (default).
    Human,
    /// Machine-readable JSON output.
    Json,
}

/// Output rendering flags.
pub struct OutputFlags {
    /// Disable ANSI color output.
    pub no_color: bool,
    /// Suppress non-error output.
    pub quiet: bool,
    /// Enable JSON output mode.
    pub json: bool,
}

/// Flags passed from the top-level CLI to `AppContext::new`.
pub struct AppFlags {
    /// Output rendering options.
    pub output: OutputFlags,
    /// Explicit configuration file (`--config`).
    pub config: Option<PathBuf>,
}

/// Connector type used by `tether run`.
pub type ProductionConnector = OpenSshConnector<TokioCommandRunner, TokioNetworkProbe>;

/// Unified application context passed to every command handler.
pub struct AppContext {
    /// Terminal output context (colors, quiet mode).
    pub output: OutputContext,
    /// Output rendering mode (human vs JSON).
    pub mode: OutputMode,
    /// Where the agent configuration is loaded from.
    pub config_store: YamlConfigStore,
}

impl AppContext {
    /// Construct an `AppContext` from top-level CLI flags.
    #[must_use]
    pub fn new(flags: AppFlags) -> Self {
        let mode = if flags.output.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };
        Self {
            output: OutputContext::new(flags.output.no_color, flags.output.quiet),
            mode,
            config_store: YamlConfigStore::new(flags.config),
        }
    }

    /// Returns `true` when JSON output mode is active.
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Returns the appropriate `Renderer` variant for the current output mode.
    #[must_use]
    pub fn renderer(&self) -> Renderer<'_> {
        match self.mode {
            OutputMode::Human => Renderer::Human(HumanRenderer::new(&self.output)),
            OutputMode::Json => Renderer::Json(JsonRenderer),
        }
    }

    /// Load the configuration through the config store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_config(&self) -> Result<AgentConfig> {
        self.config_store.load()
    }

    /// Process runner for short local commands.
    #[must_use]
    pub fn command_runner(&self) -> TokioCommandRunner {
        TokioCommandRunner::default()
    }

    /// Build the OpenSSH connector described by `config.pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn connector(&self, config: &AgentConfig) -> Result<ProductionConnector> {
        let control_dir = match &config.pool.control_dir {
            Some(dir) => dir.clone(),
            None => expand_home(std::path::Path::new(DEFAULT_CONTROL_DIR))?,
        };
        let timeouts = SshTimeouts {
            connect: Duration::from_millis(config.pool.connect_timeout_ms),
            command: Duration::from_millis(config.pool.command_timeout_ms),
            preflight: Duration::from_millis(config.pool.preflight_timeout_ms),
        };
        Ok(OpenSshConnector::new(
            TokioCommandRunner::new(timeouts.command),
            TokioNetworkProbe,
            control_dir,
            timeouts,
        ))
    }
}
