//! Application services: use-case orchestration.
//!
//! Each service module implements a single use-case by composing domain logic
//! with port trait calls. Services import only from `crate::domain` and
//! `crate::application::ports`, never from `crate::infra`, `crate::commands`,
//! or `crate::output`.

pub mod agent;
pub mod debounce;
pub mod dispatcher;
pub mod pool;
pub mod preflight;
pub mod retry;

pub use agent::{Agent, AgentSummary};
pub use dispatcher::{Dispatched, Dispatcher};
pub use pool::{SessionLease, SessionPool};
pub use retry::RetryController;
