use async_trait::async_trait;
use proctor_core::model::{ParticipantId, QuizId, ViolationRecord};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("remote store rejected the write with status {0}")]
    Rejected(u16),
}

/// Storage identifier for a persisted violation record.
pub type RecordId = i64;

/// A persisted record together with its storage identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub record: ViolationRecord,
}

impl StoredRecord {
    #[must_use]
    pub fn new(id: RecordId, record: ViolationRecord) -> Self {
        Self { id, record }
    }
}

/// Durable sink for the violation record written when a proctored session ends.
#[async_trait]
pub trait ViolationRecordRepository: Send + Sync {
    /// Append a record. Records are immutable once written.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn append_record(&self, record: &ViolationRecord) -> Result<RecordId, StorageError>;

    /// Fetch a record by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_record(&self, id: RecordId) -> Result<ViolationRecord, StorageError>;

    /// List records for a quiz, most recently completed first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the records cannot be loaded.
    async fn list_records(
        &self,
        quiz_id: QuizId,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Number of attempts a participant has recorded for a quiz.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the count cannot be computed.
    async fn count_attempts(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
    ) -> Result<u32, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<Mutex<Vec<ViolationRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ViolationRecord>>, StorageError> {
        self.records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn record_id(index: usize) -> Result<RecordId, StorageError> {
    // IDs start at 1 like SQLite rowids.
    RecordId::try_from(index + 1)
        .map_err(|_| StorageError::Serialization("record id overflow".into()))
}

#[async_trait]
impl ViolationRecordRepository for InMemoryRepository {
    async fn append_record(&self, record: &ViolationRecord) -> Result<RecordId, StorageError> {
        let mut guard = self.lock()?;
        guard.push(record.clone());
        record_id(guard.len() - 1)
    }

    async fn get_record(&self, id: RecordId) -> Result<ViolationRecord, StorageError> {
        let guard = self.lock()?;
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| guard.get(index))
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_records(
        &self,
        quiz_id: QuizId,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let guard = self.lock()?;
        let mut out = Vec::new();
        for (index, record) in guard.iter().enumerate() {
            if record.quiz_id() == quiz_id {
                out.push(StoredRecord::new(record_id(index)?, record.clone()));
            }
        }
        out.sort_by(|a, b| {
            b.record
                .completed_at()
                .cmp(&a.record.completed_at())
                .then(b.id.cmp(&a.id))
        });
        out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(out)
    }

    async fn count_attempts(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
    ) -> Result<u32, StorageError> {
        let guard = self.lock()?;
        let count = guard
            .iter()
            .filter(|r| r.quiz_id() == quiz_id && r.participant_id() == participant_id)
            .count();
        u32::try_from(count).map_err(|_| StorageError::Serialization("attempt count overflow".into()))
    }
}

/// Writes to a primary store and mirrors each write to a secondary store.
///
/// The primary result decides success. Mirror failures are logged only.
#[derive(Clone)]
pub struct MirroredRepository {
    primary: Arc<dyn ViolationRecordRepository>,
    mirror: Arc<dyn ViolationRecordRepository>,
}

impl MirroredRepository {
    #[must_use]
    pub fn new(
        primary: Arc<dyn ViolationRecordRepository>,
        mirror: Arc<dyn ViolationRecordRepository>,
    ) -> Self {
        Self { primary, mirror }
    }
}

#[async_trait]
impl ViolationRecordRepository for MirroredRepository {
    async fn append_record(&self, record: &ViolationRecord) -> Result<RecordId, StorageError> {
        let id = self.primary.append_record(record).await?;
        if let Err(err) = self.mirror.append_record(record).await {
            tracing::warn!(
                quiz_id = %record.quiz_id(),
                participant_id = %record.participant_id(),
                error = %err,
                "violation record mirror write failed"
            );
        }
        Ok(id)
    }

    async fn get_record(&self, id: RecordId) -> Result<ViolationRecord, StorageError> {
        self.primary.get_record(id).await
    }

    async fn list_records(
        &self,
        quiz_id: QuizId,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        self.primary.list_records(quiz_id, limit).await
    }

    async fn count_attempts(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
    ) -> Result<u32, StorageError> {
        // Either side may have seen an attempt the other missed.
        let local = self.primary.count_attempts(quiz_id, participant_id).await?;
        match self.mirror.count_attempts(quiz_id, participant_id).await {
            Ok(remote) => Ok(local.max(remote)),
            Err(err) => {
                tracing::warn!(error = %err, "mirror attempt count unavailable");
                Ok(local)
            }
        }
    }
}

/// Aggregates the record repository behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub records: Arc<dyn ViolationRecordRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let records: Arc<dyn ViolationRecordRepository> = Arc::new(InMemoryRepository::new());
        Self { records }
    }

    /// Mirror every write of this storage into `mirror`.
    #[must_use]
    pub fn mirrored_to(self, mirror: Arc<dyn ViolationRecordRepository>) -> Self {
        let records: Arc<dyn ViolationRecordRepository> =
            Arc::new(MirroredRepository::new(self.records, mirror));
        Self { records }
    }
}
