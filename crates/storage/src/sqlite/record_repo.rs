use proctor_core::model::{ParticipantId, QuizId, ViolationRecord};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{id_i64, map_record_row, map_stored_row, ser};
use crate::repository::{RecordId, StorageError, StoredRecord, ViolationRecordRepository};

fn connection(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

#[async_trait::async_trait]
impl ViolationRecordRepository for SqliteRepository {
    async fn append_record(&self, record: &ViolationRecord) -> Result<RecordId, StorageError> {
        let violations = serde_json::to_string(record.violations()).map_err(ser)?;

        let res = sqlx::query(
            r"
                INSERT INTO violation_records (
                    quiz_id, participant_id, warning_count, violations,
                    end_reason, disconnect_reason, started_at, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(id_i64("quiz_id", record.quiz_id().value())?)
        .bind(id_i64("participant_id", record.participant_id().value())?)
        .bind(i64::from(record.warning_count()))
        .bind(violations)
        .bind(record.end_reason().as_str())
        .bind(record.disconnect_reason().map(str::to_owned))
        .bind(record.started_at())
        .bind(record.completed_at())
        .execute(&self.pool)
        .await
        .map_err(connection)?;

        Ok(res.last_insert_rowid())
    }

    async fn get_record(&self, id: RecordId) -> Result<ViolationRecord, StorageError> {
        let row = sqlx::query(
            r"
                SELECT
                    quiz_id, participant_id, warning_count, violations,
                    end_reason, disconnect_reason, started_at, completed_at
                FROM violation_records
                WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(connection)?
        .ok_or(StorageError::NotFound)?;

        map_record_row(&row)
    }

    async fn list_records(
        &self,
        quiz_id: QuizId,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT
                    id, quiz_id, participant_id, warning_count, violations,
                    end_reason, disconnect_reason, started_at, completed_at
                FROM violation_records
                WHERE quiz_id = ?1
                ORDER BY completed_at DESC, id DESC
                LIMIT ?2
            ",
        )
        .bind(id_i64("quiz_id", quiz_id.value())?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(connection)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_stored_row(&row)?);
        }
        Ok(out)
    }

    async fn count_attempts(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
    ) -> Result<u32, StorageError> {
        let row = sqlx::query(
            r"
                SELECT COUNT(*) AS attempts
                FROM violation_records
                WHERE quiz_id = ?1 AND participant_id = ?2
            ",
        )
        .bind(id_i64("quiz_id", quiz_id.value())?)
        .bind(id_i64("participant_id", participant_id.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(connection)?;

        let attempts: i64 = row.try_get("attempts").map_err(ser)?;
        u32::try_from(attempts)
            .map_err(|_| StorageError::Serialization(format!("invalid attempts: {attempts}")))
    }
}
