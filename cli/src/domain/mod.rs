//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod coalesce;
pub mod config;
pub mod error;
pub mod preflight;
pub mod retry;
pub mod rules;
pub mod session;
pub mod target;

pub use coalesce::Coalescer;
pub use config::AgentConfig;
pub use error::{ConfigError, PoolError, RemoteError, StartupError, WatchError};
pub use retry::{AttemptOutcome, RetryPolicy, Step};
pub use rules::{MatchReport, Resolution, ResolvedAction, RuleTable};
pub use session::SessionState;
pub use target::{AuthRef, RemoteTarget, TargetKey};
