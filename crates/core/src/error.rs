use thiserror::Error;

use crate::model::{ConfigError, ViolationError, ViolationRecordError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Violation(#[from] ViolationError),
    #[error(transparent)]
    Record(#[from] ViolationRecordError),
}
