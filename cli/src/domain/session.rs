//! Session lifecycle states.

use serde::Serialize;

/// Lifecycle of a pooled remote session.
///
/// `Connecting → Ready ⇄ (leased) → Degraded → Closed`; a degraded session
/// is never leased again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl SessionState {
    /// Whether an idle session in this state may be handed out.
    #[must_use]
    pub fn is_reusable(self) -> bool {
        self == SessionState::Ready
    }

    /// Whether the pool should drop this session on the next acquire.
    #[must_use]
    pub fn should_evict(self) -> bool {
        matches!(self, SessionState::Degraded | SessionState::Closed)
    }

    /// State once the connection is established. Only `Connecting` moves.
    #[must_use]
    pub fn connected(self) -> Self {
        match self {
            SessionState::Connecting => SessionState::Ready,
            other => other,
        }
    }

    /// State after a failed health check or a disconnect. Closed stays closed.
    #[must_use]
    pub fn degrade(self) -> Self {
        match self {
            SessionState::Closed => SessionState::Closed,
            _ => SessionState::Degraded,
        }
    }
}
