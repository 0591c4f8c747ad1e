//! Shared error types for the services crate.

use thiserror::Error;

use proctor_core::model::{ConfigError, ParticipantId, QuizId, SessionState, ViolationError};
use storage::repository::StorageError;

use crate::proctoring::EnvironmentError;

/// Message shown to the participant when a quiz cannot start without fullscreen.
pub const FULLSCREEN_REQUIRED: &str = "Fullscreen mode required for this quiz";

/// Errors emitted by `ProctoringSession`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProctoringError {
    #[error("{message}")]
    FullscreenRequired {
        message: String,
        #[source]
        source: EnvironmentError,
    },
    #[error("cannot {action} a session that is {state}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Violation(#[from] ViolationError),
}

impl ProctoringError {
    /// Text suitable for a blocking message in the quiz UI.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::FullscreenRequired { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors emitted by `ProctoringService` when opening an attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("quiz {quiz_id} was already attempted ({attempts} recorded)")]
    AlreadyAttempted { quiz_id: QuizId, attempts: u32 },
    #[error("participant {participant_id} already has quiz {quiz_id} open")]
    InProgress {
        quiz_id: QuizId,
        participant_id: ParticipantId,
    },
    #[error(transparent)]
    Proctoring(#[from] ProctoringError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
