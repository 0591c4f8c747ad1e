use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::model::{EndReason, ParticipantId, QuizId, Violation, ViolationRecord};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::repository::{RecordId, StorageError, StoredRecord, ViolationRecordRepository};

const TABLE: &str = "violation_records";

#[derive(Clone, Debug)]
pub struct RemoteStoreConfig {
    pub base_url: String,
    pub api_key: String,
}

impl RemoteStoreConfig {
    /// Reads `PROCTOR_REMOTE_URL` and `PROCTOR_REMOTE_KEY`.
    ///
    /// Returns `None` unless both are set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("PROCTOR_REMOTE_URL").ok()?;
        let api_key = env::var("PROCTOR_REMOTE_KEY").ok()?;
        if base_url.trim().is_empty() || api_key.trim().is_empty() {
            return None;
        }
        Some(Self { base_url, api_key })
    }
}

/// Violation records kept in the hosted backend's REST table.
#[derive(Clone)]
pub struct RemoteRecordStore {
    client: Client,
    config: RemoteStoreConfig,
}

impl RemoteRecordStore {
    #[must_use]
    pub fn new(config: RemoteStoreConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{TABLE}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn fetch_rows(&self, query: &[(&str, String)]) -> Result<Vec<RemoteRow>, StorageError> {
        let response = self
            .authorize(self.client.get(self.table_url()))
            .query(query)
            .send()
            .await
            .map_err(connection)?;
        let response = check_status(response)?;
        response.json().await.map_err(ser)
    }
}

fn connection(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(StorageError::Rejected(status.as_u16()))
    }
}

#[async_trait]
impl ViolationRecordRepository for RemoteRecordStore {
    async fn append_record(&self, record: &ViolationRecord) -> Result<RecordId, StorageError> {
        let response = self
            .authorize(self.client.post(self.table_url()))
            .header("Prefer", "return=representation")
            .json(&RemoteRow::from_record(record))
            .send()
            .await
            .map_err(connection)?;
        let rows: Vec<RemoteRow> = check_status(response)?.json().await.map_err(ser)?;
        rows.into_iter()
            .next()
            .and_then(|row| row.id)
            .ok_or_else(|| StorageError::Serialization("insert returned no id".into()))
    }

    async fn get_record(&self, id: RecordId) -> Result<ViolationRecord, StorageError> {
        let rows = self
            .fetch_rows(&[("id", format!("eq.{id}")), ("select", "*".into())])
            .await?;
        rows.into_iter()
            .next()
            .ok_or(StorageError::NotFound)?
            .into_record()
    }

    async fn list_records(
        &self,
        quiz_id: QuizId,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let rows = self
            .fetch_rows(&[
                ("quiz_id", format!("eq.{quiz_id}")),
                ("order", "completed_at.desc,id.desc".into()),
                ("limit", limit.to_string()),
                ("select", "*".into()),
            ])
            .await?;
        rows.into_iter()
            .map(|row| {
                let id = row
                    .id
                    .ok_or_else(|| StorageError::Serialization("row without id".into()))?;
                Ok(StoredRecord::new(id, row.into_record()?))
            })
            .collect()
    }

    async fn count_attempts(
        &self,
        quiz_id: QuizId,
        participant_id: ParticipantId,
    ) -> Result<u32, StorageError> {
        let rows = self
            .fetch_rows(&[
                ("quiz_id", format!("eq.{quiz_id}")),
                ("participant_id", format!("eq.{participant_id}")),
                ("select", "*".into()),
            ])
            .await?;
        u32::try_from(rows.len()).map_err(ser)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RemoteRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    quiz_id: u64,
    participant_id: u64,
    warning_count: u32,
    violations: Vec<Violation>,
    end_reason: String,
    disconnect_reason: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl RemoteRow {
    fn from_record(record: &ViolationRecord) -> Self {
        Self {
            id: None,
            quiz_id: record.quiz_id().value(),
            participant_id: record.participant_id().value(),
            warning_count: record.warning_count(),
            violations: record.violations().to_vec(),
            end_reason: record.end_reason().as_str().to_owned(),
            disconnect_reason: record.disconnect_reason().map(str::to_owned),
            started_at: record.started_at(),
            completed_at: record.completed_at(),
        }
    }

    fn into_record(self) -> Result<ViolationRecord, StorageError> {
        let end_reason = EndReason::from_parts(&self.end_reason, self.disconnect_reason)
            .ok_or_else(|| {
                StorageError::Serialization(format!("invalid end_reason: {}", self.end_reason))
            })?;
        ViolationRecord::from_persisted(
            QuizId::new(self.quiz_id),
            ParticipantId::new(self.participant_id),
            self.warning_count,
            self.violations,
            end_reason,
            self.started_at,
            self.completed_at,
        )
        .map_err(ser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::model::ViolationKind;
    use proctor_core::time::fixed_now;

    #[test]
    fn remote_row_round_trips_record_fields() {
        let now = fixed_now();
        let record = ViolationRecord::from_session(
            QuizId::new(3),
            ParticipantId::new(11),
            vec![Violation::from_kind(ViolationKind::ClipboardAttempt, now)],
            EndReason::Disconnected("tab closed".into()),
            now,
            now,
        )
        .unwrap();

        let json = serde_json::to_value(RemoteRow::from_record(&record)).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["end_reason"], "disconnected");
        assert_eq!(json["disconnect_reason"], "tab closed");

        let row: RemoteRow = serde_json::from_value(json).unwrap();
        assert_eq!(row.into_record().unwrap(), record);
    }

    #[test]
    fn table_url_ignores_trailing_slash() {
        let store = RemoteRecordStore::new(RemoteStoreConfig {
            base_url: "https://example.test/".into(),
            api_key: "k".into(),
        });
        assert_eq!(
            store.table_url(),
            "https://example.test/rest/v1/violation_records"
        );
    }
}
