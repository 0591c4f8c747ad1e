use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a proctored quiz attempt.
///
/// `Initializing` may fall straight through to `Terminated` when startup
/// fails. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Terminating,
    Terminated,
}

impl SessionState {
    /// Returns true if `self -> next` is an allowed transition.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Initializing)
                | (Self::Initializing, Self::Active | Self::Terminated)
                | (Self::Active, Self::Terminating)
                | (Self::Terminating, Self::Terminated)
                // A session that never started can be discarded.
                | (Self::Idle, Self::Terminated)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why an active session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum EndReason {
    Submitted,
    ForceSubmitted,
    TimeExpired,
    Disconnected(String),
}

impl EndReason {
    /// Free-text disconnect reason, if the session ended by disconnecting.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<&str> {
        match self {
            Self::Disconnected(reason) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::ForceSubmitted => "force_submitted",
            Self::TimeExpired => "time_expired",
            Self::Disconnected(_) => "disconnected",
        }
    }

    /// Rebuilds an end reason from its stored tag and optional detail.
    #[must_use]
    pub fn from_parts(kind: &str, detail: Option<String>) -> Option<Self> {
        match kind {
            "submitted" => Some(Self::Submitted),
            "force_submitted" => Some(Self::ForceSubmitted),
            "time_expired" => Some(Self::TimeExpired),
            "disconnected" => Some(Self::Disconnected(detail.unwrap_or_default())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_is_absorbing() {
        for next in [
            SessionState::Idle,
            SessionState::Initializing,
            SessionState::Active,
            SessionState::Terminating,
            SessionState::Terminated,
        ] {
            assert!(!SessionState::Terminated.can_transition_to(next));
        }
        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::Terminating.is_terminal());
    }

    #[test]
    fn startup_failure_skips_active() {
        assert!(SessionState::Initializing.can_transition_to(SessionState::Terminated));
        assert!(!SessionState::Active.can_transition_to(SessionState::Terminated));
        assert!(!SessionState::Active.can_transition_to(SessionState::Initializing));
    }

    #[test]
    fn end_reason_round_trips_through_parts() {
        let reason = EndReason::Disconnected("navigated away".into());
        let rebuilt =
            EndReason::from_parts(reason.as_str(), reason.disconnect_reason().map(str::to_owned));
        assert_eq!(rebuilt, Some(reason));
        assert_eq!(EndReason::from_parts("bogus", None), None);
    }
}
