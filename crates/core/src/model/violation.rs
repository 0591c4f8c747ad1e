use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::time::format_timestamp;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ViolationError {
    #[error("violation reason cannot be empty")]
    EmptyReason,
}

/// Classified integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    DevtoolsShortcut,
    ViewSource,
    ContextMenu,
    TabHidden,
    FullscreenExited,
    FullscreenReentryFailed,
    ClipboardAttempt,
    DevtoolsOpened,
}

impl ViolationKind {
    /// Human-readable reason stored with the violation.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::DevtoolsShortcut => "Developer tools activation attempt",
            Self::ViewSource => "View source attempt",
            Self::ContextMenu => "Right-click context menu disabled",
            Self::TabHidden => "Switched to another tab/window",
            Self::FullscreenExited => "Exited fullscreen mode",
            Self::FullscreenReentryFailed => "Failed to re-enter fullscreen",
            Self::ClipboardAttempt => "Copy/paste attempt detected",
            Self::DevtoolsOpened => "Developer tools opened",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// One entry in a session's violation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    reason: String,
    timestamp: DateTime<Utc>,
}

impl Violation {
    /// Creates a violation entry.
    ///
    /// # Errors
    ///
    /// Returns `ViolationError::EmptyReason` if the reason is blank.
    pub fn new(reason: impl Into<String>, timestamp: DateTime<Utc>) -> Result<Self, ViolationError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(ViolationError::EmptyReason);
        }
        Ok(Self { reason, timestamp })
    }

    #[must_use]
    pub fn from_kind(kind: ViolationKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason: kind.reason().to_owned(),
            timestamp,
        }
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Sortable text form of the timestamp.
    #[must_use]
    pub fn timestamp_label(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn blank_reason_is_rejected() {
        assert_eq!(
            Violation::new("   ", fixed_now()).unwrap_err(),
            ViolationError::EmptyReason
        );
    }

    #[test]
    fn kind_reason_matches_log_text() {
        let violation = Violation::from_kind(ViolationKind::TabHidden, fixed_now());
        assert_eq!(violation.reason(), "Switched to another tab/window");
        assert_eq!(violation.timestamp_label(), "2023-11-14T22:13:20.000Z");
    }
}
