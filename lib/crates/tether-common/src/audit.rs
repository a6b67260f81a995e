use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::result::ActionResult;
use crate::types::{ChangeEvent, ChangeKind, SessionId, TaskId};

/// State of a watch on a root directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchStatus {
    Lost,
    Restored,
}

/// Lifecycle transitions of pooled sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Connected,
    Reused,
    Degraded,
    Evicted,
    Closed,
}

/// What the dispatcher decided for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchDecision {
    Matched { rule: String, target: String },
    NoMatch,
}

/// One line of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Change(ChangeEvent),
    Watch {
        root: PathBuf,
        status: WatchStatus,
        at: DateTime<Utc>,
    },
    Dispatch {
        task: TaskId,
        path: PathBuf,
        kind: ChangeKind,
        decision: DispatchDecision,
        at: DateTime<Utc>,
    },
    Session {
        session: SessionId,
        /// `user@host:port`; never carries credential material.
        target: String,
        event: SessionEvent,
        at: DateTime<Utc>,
    },
    Action(ActionResult),
}

impl AuditRecord {
    /// Task this record belongs to, if any.
    #[must_use]
    pub fn task(&self) -> Option<TaskId> {
        match self {
            AuditRecord::Dispatch { task, .. } => Some(*task),
            AuditRecord::Action(result) => Some(result.task),
            _ => None,
        }
    }

    #[must_use]
    pub fn session(target: String, session: SessionId, event: SessionEvent) -> Self {
        AuditRecord::Session {
            session,
            target,
            event,
            at: Utc::now(),
        }
    }
}
