//! Infrastructure implementation of the `ConfigStore` port.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::ports::ConfigStore;
use crate::domain::AuthRef;
use crate::domain::config::AgentConfig;
use crate::infra::fs::expand_home;

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

/// Production implementation of `ConfigStore` that reads a YAML file on disk.
///
/// `path` takes precedence over `TETHER_CONFIG` and the default location.
#[derive(Debug, Default)]
pub struct YamlConfigStore {
    path: Option<PathBuf>,
}

impl YamlConfigStore {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<AgentConfig> {
        let path = self.path()?;
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let config: AgentConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("cannot parse {}", path.display()))?;
        expand_paths(config)
    }

    fn path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        if let Ok(val) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(val));
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".tether").join("config.yaml"))
    }
}

/// Expand `~` in every path-valued setting.
fn expand_paths(mut config: AgentConfig) -> Result<AgentConfig> {
    for watch in &mut config.watch {
        watch.root = expand_home(&watch.root)?;
    }
    config.audit.path = expand_home(&config.audit.path)?;
    if let Some(dir) = &config.pool.control_dir {
        config.pool.control_dir = Some(expand_home(dir)?);
    }
    if let Some(disposition) = &mut config.disposition {
        disposition.processed_dir = expand_home(&disposition.processed_dir)?;
        disposition.failed_dir = expand_home(&disposition.failed_dir)?;
    }
    for target in config.targets.values_mut() {
        if let Some(identity) = target.auth_ref.identity_file() {
            target.auth_ref = AuthRef::with_identity_file(expand_home(&identity)?);
        }
    }
    Ok(config)
}
