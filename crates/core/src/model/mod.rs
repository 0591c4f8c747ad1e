mod config;
mod ids;
mod record;
mod session;
mod violation;

pub use ids::{ParseIdError, ParticipantId, QuizId};

pub use config::{ConfigError, QuizConfig, RetryPolicy};
pub use record::{ViolationRecord, ViolationRecordError};
pub use session::{EndReason, SessionState};
pub use violation::{Violation, ViolationError, ViolationKind};
