use proctor_core::model::{
    EndReason, ParticipantId, QuizId, Violation, ViolationRecord,
};
use sqlx::Row;

use crate::repository::{StorageError, StoredRecord};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn quiz_id_from_i64(v: i64) -> Result<QuizId, StorageError> {
    Ok(QuizId::new(i64_to_u64("quiz_id", v)?))
}

pub(crate) fn participant_id_from_i64(v: i64) -> Result<ParticipantId, StorageError> {
    Ok(ParticipantId::new(i64_to_u64("participant_id", v)?))
}

pub(crate) fn map_record_row(row: &sqlx::sqlite::SqliteRow) -> Result<ViolationRecord, StorageError> {
    let quiz_id = quiz_id_from_i64(row.try_get::<i64, _>("quiz_id").map_err(ser)?)?;
    let participant_id =
        participant_id_from_i64(row.try_get::<i64, _>("participant_id").map_err(ser)?)?;
    let warning_count = row.try_get::<i64, _>("warning_count").map_err(ser)?;
    let warning_count = u32::try_from(warning_count).map_err(|_| {
        StorageError::Serialization(format!("invalid warning_count: {warning_count}"))
    })?;
    let violations: Vec<Violation> =
        serde_json::from_str(&row.try_get::<String, _>("violations").map_err(ser)?)
            .map_err(ser)?;

    let kind: String = row.try_get("end_reason").map_err(ser)?;
    let detail: Option<String> = row.try_get("disconnect_reason").map_err(ser)?;
    let end_reason = EndReason::from_parts(&kind, detail)
        .ok_or_else(|| StorageError::Serialization(format!("invalid end_reason: {kind}")))?;

    ViolationRecord::from_persisted(
        quiz_id,
        participant_id,
        warning_count,
        violations,
        end_reason,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_stored_row(row: &sqlx::sqlite::SqliteRow) -> Result<StoredRecord, StorageError> {
    let id: i64 = row.try_get("id").map_err(ser)?;
    Ok(StoredRecord::new(id, map_record_row(row)?))
}
