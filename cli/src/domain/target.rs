//! Remote target identity and credential reference.
//!
//! Pure types only, no I/O.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Literal `auth_ref` value that selects the running ssh-agent.
pub const AGENT_AUTH: &str = "agent";

/// Opaque reference to a credential: an identity file path or `agent`.
///
/// The value is never rendered by `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthRef(String);

impl AuthRef {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identity file to pass to ssh, or `None` when the agent supplies keys.
    #[must_use]
    pub fn identity_file(&self) -> Option<PathBuf> {
        let value = self.0.trim();
        if value.is_empty() || value == AGENT_AUTH {
            None
        } else {
            Some(PathBuf::from(value))
        }
    }

    /// Replaces the referenced path, e.g. after `~` expansion.
    #[must_use]
    pub fn with_identity_file(path: PathBuf) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

impl fmt::Debug for AuthRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthRef(<redacted>)")
    }
}

impl fmt::Display for AuthRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identity_file().is_some() {
            f.write_str("identity-file")
        } else {
            f.write_str(AGENT_AUTH)
        }
    }
}

fn default_port() -> u16 {
    22
}

/// A remote host reachable over ssh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_ref: AuthRef,
}

impl RemoteTarget {
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: default_port(),
            auth_ref: AuthRef::new(AGENT_AUTH),
        }
    }

    /// Pool key identifying sessions that may be shared.
    #[must_use]
    pub fn key(&self) -> TargetKey {
        TargetKey {
            host: self.host.clone(),
            user: self.user.clone(),
            port: self.port,
        }
    }

    /// `user@host` destination argument for ssh.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// `(host, user, port)` identity of a pooled connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub host: String,
    pub user: String,
    pub port: u16,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}
