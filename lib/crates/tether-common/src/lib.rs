//! Shared data model for the tether agent.
//!
//! Everything in this crate is serialisable and immutable once produced:
//! filesystem notifications, coalesced tasks, per-attempt action results and
//! the audit records that wrap them.

pub mod audit;
pub mod result;
pub mod types;

pub use audit::{AuditRecord, DispatchDecision, SessionEvent, WatchStatus};
pub use result::{ActionResult, ActionStatus, FailureReason};
pub use types::*;
