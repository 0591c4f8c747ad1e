use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{EndReason, ParticipantId, QuizId, Violation};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ViolationRecordError {
    #[error("completed_at is before started_at")]
    InvalidTimeRange,

    #[error("too many violations for a single session: {len}")]
    TooManyViolations { len: usize },

    #[error("warning count ({count}) does not match violation log length ({len})")]
    CountMismatch { count: u32, len: usize },
}

/// Snapshot of a proctored attempt, written once when the session ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    quiz_id: QuizId,
    participant_id: ParticipantId,
    warning_count: u32,
    violations: Vec<Violation>,
    end_reason: EndReason,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl ViolationRecord {
    /// Build a record from the final violation log of a session.
    ///
    /// # Errors
    ///
    /// Returns `ViolationRecordError::InvalidTimeRange` if `completed_at` is before `started_at`.
    /// Returns `ViolationRecordError::TooManyViolations` if the log length cannot fit in `u32`.
    pub fn from_session(
        quiz_id: QuizId,
        participant_id: ParticipantId,
        violations: Vec<Violation>,
        end_reason: EndReason,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self, ViolationRecordError> {
        let warning_count = u32::try_from(violations.len()).map_err(|_| {
            ViolationRecordError::TooManyViolations {
                len: violations.len(),
            }
        })?;
        Self::from_persisted(
            quiz_id,
            participant_id,
            warning_count,
            violations,
            end_reason,
            started_at,
            completed_at,
        )
    }

    /// Rehydrate a record from storage.
    ///
    /// # Errors
    ///
    /// Returns `ViolationRecordError::CountMismatch` if the stored count disagrees with the log.
    pub fn from_persisted(
        quiz_id: QuizId,
        participant_id: ParticipantId,
        warning_count: u32,
        violations: Vec<Violation>,
        end_reason: EndReason,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<Self, ViolationRecordError> {
        if completed_at < started_at {
            return Err(ViolationRecordError::InvalidTimeRange);
        }
        if usize::try_from(warning_count).ok() != Some(violations.len()) {
            return Err(ViolationRecordError::CountMismatch {
                count: warning_count,
                len: violations.len(),
            });
        }

        Ok(Self {
            quiz_id,
            participant_id,
            warning_count,
            violations,
            end_reason,
            started_at,
            completed_at,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    #[must_use]
    pub fn warning_count(&self) -> u32 {
        self.warning_count
    }

    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    #[must_use]
    pub fn end_reason(&self) -> &EndReason {
        &self.end_reason
    }

    #[must_use]
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.end_reason.disconnect_reason()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ViolationKind;
    use crate::time::fixed_now;

    #[test]
    fn record_counts_violations() {
        let now = fixed_now();
        let log = vec![
            Violation::from_kind(ViolationKind::TabHidden, now),
            Violation::from_kind(ViolationKind::ContextMenu, now),
        ];
        let record = ViolationRecord::from_session(
            QuizId::new(1),
            ParticipantId::new(9),
            log,
            EndReason::Disconnected("navigated away".into()),
            now,
            now,
        )
        .unwrap();

        assert_eq!(record.warning_count(), 2);
        assert_eq!(record.disconnect_reason(), Some("navigated away"));
    }

    #[test]
    fn persisted_count_must_match_log() {
        let now = fixed_now();
        let err = ViolationRecord::from_persisted(
            QuizId::new(1),
            ParticipantId::new(9),
            3,
            vec![Violation::from_kind(ViolationKind::TabHidden, now)],
            EndReason::Submitted,
            now,
            now,
        )
        .unwrap_err();
        assert_eq!(err, ViolationRecordError::CountMismatch { count: 3, len: 1 });
    }

    #[test]
    fn completion_before_start_is_rejected() {
        let now = fixed_now();
        let err = ViolationRecord::from_session(
            QuizId::new(1),
            ParticipantId::new(9),
            Vec::new(),
            EndReason::Submitted,
            now,
            now - chrono::Duration::seconds(1),
        )
        .unwrap_err();
        assert_eq!(err, ViolationRecordError::InvalidTimeRange);
    }
}
