//! Domain types and validators for tether configuration.
//!
//! Pure functions only, no I/O, no async, no filesystem access.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_common::ChangeKind;

use crate::domain::error::ConfigError;
use crate::domain::target::RemoteTarget;

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.tether/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Local directory trees to watch.
    pub watch: Vec<WatchRootConfig>,
    /// Event source tuning.
    pub watcher: WatcherConfig,
    /// Named remote targets referenced by rules.
    pub targets: BTreeMap<String, RemoteTarget>,
    /// Ordered rule table; first match wins.
    pub rules: Vec<RuleConfig>,
    pub debounce: DebounceConfig,
    pub pool: PoolConfig,
    pub retry: RetryConfig,
    pub audit: AuditConfig,
    /// Where local files go once their task is finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disposition: Option<DispositionConfig>,
    /// Upper bound on tasks executing at the same time.
    pub max_concurrent_tasks: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch: Vec::new(),
            watcher: WatcherConfig::default(),
            targets: BTreeMap::new(),
            rules: Vec::new(),
            debounce: DebounceConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
            audit: AuditConfig::default(),
            disposition: None,
            max_concurrent_tasks: 16,
        }
    }
}

/// One watched directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchRootConfig {
    pub root: PathBuf,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Interval between attempts to re-establish a lost watch.
    pub retry_interval_ms: u64,
    /// How long a vanished root may stay missing before the agent gives up.
    pub reappear_timeout_ms: u64,
    /// How long a rename source waits for its destination half.
    pub rename_grace_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1_000,
            reappear_timeout_ms: 30_000,
            rename_grace_ms: 100,
        }
    }
}

/// A rule mapping matching paths to a remote action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// Regex matched against the path relative to its watch root.
    pub pattern: String,
    /// Kinds this rule applies to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<ChangeKind>,
    /// Name of an entry in `targets`.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push: Option<PushConfig>,
}

/// Upload the changed file, optionally followed by a remote command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    pub remote_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<String>,
    /// Fields written as a YAML front-matter block ahead of the file's bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub front_matter: Vec<FrontMatterField>,
}

/// One `key: value` line of a front-matter block; `value` is a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontMatterField {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub window_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { window_ms: 300 }
    }
}

impl DebounceConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Concurrent leases allowed per `(host, user, port)`.
    pub max_per_target: usize,
    pub acquire_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Upper bound for a single remote command or upload.
    pub command_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub drain_grace_ms: u64,
    pub preflight_timeout_ms: u64,
    /// Directory for ssh control sockets; defaults to `~/.tether/ctl`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_dir: Option<PathBuf>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_target: 4,
            acquire_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 300_000,
            health_check_interval_ms: 30_000,
            drain_grace_ms: 15_000,
            preflight_timeout_ms: 5_000,
            control_dir: None,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Budget measured from the first attempt; no retry starts past it.
    pub max_elapsed_ms: u64,
    /// Fraction of each delay that is randomized, in `[0, 1]`.
    pub jitter_ratio: f64,
    /// Remote exit codes treated as transient.
    pub transient_exit_codes: Vec<i32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            max_elapsed_ms: 300_000,
            jitter_ratio: 0.25,
            transient_exit_codes: vec![75],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.tether/audit.log"),
        }
    }
}

/// Destination directories for processed and failed files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispositionConfig {
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
}

// ── Validators ───────────────────────────────────────────────────────────────

impl AgentConfig {
    /// Checks the structure of the configuration.
    ///
    /// Patterns and templates are checked when the rule table is compiled.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.is_empty() {
            return Err(ConfigError::NoWatchRoots);
        }
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        for (name, target) in &self.targets {
            if target.host.trim().is_empty() || target.user.trim().is_empty() {
                return Err(ConfigError::IncompleteTarget(name.clone()));
            }
        }
        positive("pool.max_per_target", self.pool.max_per_target as u64)?;
        positive("retry.max_attempts", u64::from(self.retry.max_attempts))?;
        positive("max_concurrent_tasks", self.max_concurrent_tasks as u64)?;
        positive("debounce.window_ms", self.debounce.window_ms)?;
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "retry.jitter_ratio".to_string(),
                value: self.retry.jitter_ratio.to_string(),
                valid: "a number between 0 and 1".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(ConfigError::DuplicateRule(rule.name.clone()));
            }
            if !self.targets.contains_key(&rule.target) {
                return Err(ConfigError::UnknownTarget {
                    rule: rule.name.clone(),
                    target: rule.target.clone(),
                    known: self.target_names().join(", "),
                });
            }
            if rule.command.is_some() == rule.push.is_some() {
                return Err(ConfigError::AmbiguousAction(rule.name.clone()));
            }
        }
        if let Some(disposition) = &self.disposition {
            self.outside_watch_roots("disposition.processed_dir", &disposition.processed_dir)?;
            self.outside_watch_roots("disposition.failed_dir", &disposition.failed_dir)?;
        }
        Ok(())
    }

    /// Rejects a directory the watcher would report changes in.
    ///
    /// Paths are compared lexically, after `~` expansion.
    fn outside_watch_roots(&self, key: &str, dir: &Path) -> Result<(), ConfigError> {
        let watched = self.watch.iter().find(|w| {
            if w.recursive {
                dir.starts_with(&w.root)
            } else {
                dir == w.root
            }
        });
        match watched {
            Some(w) => Err(ConfigError::DispositionInsideWatchRoot {
                key: key.to_string(),
                dir: dir.to_path_buf(),
                root: w.root.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Configured target names in sorted order.
    #[must_use]
    pub fn target_names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }
}

fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            valid: "a positive integer".to_string(),
        });
    }
    Ok(())
}

// ── Unit tests ───────────────────────────────────────────────────────────────
