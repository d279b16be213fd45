use crate::db_types::{CallRecord, CallStatus, CallStep, CallUpdate};
use crate::error::AppError;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Durable per-call state shared by every webhook of a call.  Implementations must serialize
/// updates per call id; requests for the same call can land on different instances.
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Create the record if unseen, then apply the set fields
    async fn upsert_status(&self, call_sid: &str, update: CallUpdate)
        -> Result<CallRecord, AppError>;

    /// Atomically append to the step log
    async fn append_steps(
        &self,
        call_sid: &str,
        steps: Vec<CallStep>,
    ) -> Result<CallRecord, AppError>;

    async fn attach_recording(
        &self,
        call_sid: &str,
        url: Option<&str>,
        status: Option<&str>,
    ) -> Result<(), AppError>;

    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, AppError>;

    /// Every call ever seen, oldest first
    async fn list_all(&self) -> Result<Vec<CallRecord>, AppError>;
}

#[derive(Default)]
pub struct InMemoryCallStore {
    calls: RwLock<HashMap<String, CallRecord>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallRecordStore for InMemoryCallStore {
    async fn upsert_status(
        &self,
        call_sid: &str,
        update: CallUpdate,
    ) -> Result<CallRecord, AppError> {
        debug!(call_sid=%call_sid, update=?update, "upserting call");
        let mut calls = self.calls.write().await;
        let record = calls
            .entry(call_sid.to_string())
            .or_insert_with(|| CallRecord::new(call_sid));
        record.apply(&update);
        Ok(record.clone())
    }

    async fn append_steps(
        &self,
        call_sid: &str,
        steps: Vec<CallStep>,
    ) -> Result<CallRecord, AppError> {
        debug!(call_sid=%call_sid, steps=?steps, "appending steps");
        let mut calls = self.calls.write().await;
        let record = calls
            .entry(call_sid.to_string())
            .or_insert_with(|| CallRecord::new(call_sid));
        record.steps.extend(steps);
        record.apply(&CallUpdate::default());
        Ok(record.clone())
    }

    async fn attach_recording(
        &self,
        call_sid: &str,
        url: Option<&str>,
        status: Option<&str>,
    ) -> Result<(), AppError> {
        debug!(call_sid=%call_sid, url=?url, status=?status, "attaching recording");
        let mut calls = self.calls.write().await;
        let record = calls
            .entry(call_sid.to_string())
            .or_insert_with(|| CallRecord::new(call_sid));
        if let Some(url) = url {
            record.recording_url = Some(url.to_string());
        }
        if let Some(status) = status {
            record.recording_status = Some(status.to_string());
        }
        record.apply(&CallUpdate::default());
        Ok(())
    }

    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, AppError> {
        Ok(self.calls.read().await.get(call_sid).cloned())
    }

    async fn list_all(&self) -> Result<Vec<CallRecord>, AppError> {
        let mut records: Vec<CallRecord> = self.calls.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.call_sid.cmp(&b.call_sid))
        });
        Ok(records)
    }
}

/// Postgres-backed store.  Each mutation is a single upsert statement, so concurrent appends for
/// a call are serialized by the row lock instead of a read-modify-write.
pub struct PgCallStore {
    pool: PgPool,
}

const CALL_COLUMNS: &str = "call_sid, from_number, to_number, status, steps, recording_url, \
                            recording_status, transcript, created_at, updated_at";

impl PgCallStore {
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| {
                error!(error=%e, "failed to connect to postgres");
                AppError::Storage(e.to_string())
            })?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!(error=%e, "failed to run migrations");
                AppError::Storage(e.to_string())
            })?;
        info!("connected to postgres call store");
        Ok(Self { pool })
    }

    fn record_from_row(row: &PgRow) -> Result<CallRecord, AppError> {
        let status: String = row.try_get("status")?;
        let steps: Json<Vec<CallStep>> = row.try_get("steps")?;
        Ok(CallRecord {
            call_sid: row.try_get("call_sid")?,
            from: row.try_get("from_number")?,
            to: row.try_get("to_number")?,
            status: status.parse().map_err(AppError::Storage)?,
            steps: steps.0,
            recording_url: row.try_get("recording_url")?,
            recording_status: row.try_get("recording_status")?,
            transcript: row.try_get("transcript")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CallRecordStore for PgCallStore {
    async fn upsert_status(
        &self,
        call_sid: &str,
        update: CallUpdate,
    ) -> Result<CallRecord, AppError> {
        let sql = format!(
            "INSERT INTO calls (call_sid, from_number, to_number, status, transcript) \
             VALUES ($1, COALESCE($2, ''), COALESCE($3, ''), COALESCE($4, $5), $6) \
             ON CONFLICT (call_sid) DO UPDATE SET \
               from_number = CASE WHEN calls.from_number = '' THEN EXCLUDED.from_number ELSE calls.from_number END, \
               to_number = CASE WHEN calls.to_number = '' THEN EXCLUDED.to_number ELSE calls.to_number END, \
               status = COALESCE($4, calls.status), \
               transcript = COALESCE($6, calls.transcript), \
               updated_at = now() \
             RETURNING {CALL_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(call_sid)
            .bind(update.from)
            .bind(update.to)
            .bind(update.status.map(|s| s.as_str()))
            .bind(CallStatus::Processing.as_str())
            .bind(update.transcript)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error=%e, call_sid=%call_sid, "failed to upsert call");
                AppError::from(e)
            })?;
        Self::record_from_row(&row)
    }

    async fn append_steps(
        &self,
        call_sid: &str,
        steps: Vec<CallStep>,
    ) -> Result<CallRecord, AppError> {
        let sql = format!(
            "INSERT INTO calls (call_sid, status, steps) VALUES ($1, $2, $3) \
             ON CONFLICT (call_sid) DO UPDATE SET \
               steps = calls.steps || EXCLUDED.steps, \
               updated_at = now() \
             RETURNING {CALL_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(call_sid)
            .bind(CallStatus::Processing.as_str())
            .bind(Json(&steps))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                error!(error=%e, call_sid=%call_sid, "failed to append call steps");
                AppError::from(e)
            })?;
        Self::record_from_row(&row)
    }

    async fn attach_recording(
        &self,
        call_sid: &str,
        url: Option<&str>,
        status: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO calls (call_sid, status, recording_url, recording_status) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (call_sid) DO UPDATE SET \
               recording_url = COALESCE(EXCLUDED.recording_url, calls.recording_url), \
               recording_status = COALESCE(EXCLUDED.recording_status, calls.recording_status), \
               updated_at = now()",
        )
        .bind(call_sid)
        .bind(CallStatus::Processing.as_str())
        .bind(url)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error=%e, call_sid=%call_sid, "failed to attach recording");
            AppError::from(e)
        })?;
        Ok(())
    }

    async fn get(&self, call_sid: &str) -> Result<Option<CallRecord>, AppError> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE call_sid = $1");
        let row = sqlx::query(&sql)
            .bind(call_sid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<CallRecord>, AppError> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls ORDER BY created_at, call_sid");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(Self::record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_appends_are_never_lost() {
        let store = Arc::new(InMemoryCallStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_steps("CA1", vec![CallStep::new(format!("step-{i}"), "text")])
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let record = store.get("CA1").await.unwrap().unwrap();
        assert_eq!(record.steps.len(), 32);
        for i in 0..32 {
            let name = format!("step-{i}");
            assert!(record.steps.iter().any(|s| s.name == name));
        }
    }

    #[tokio::test]
    async fn first_callback_creates_placeholder_record() {
        let store = InMemoryCallStore::new();
        store
            .attach_recording("CA9", Some("https://rec/1"), Some("in-progress"))
            .await
            .unwrap();
        let record = store.get("CA9").await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Processing);
        assert_eq!(record.from, "");
        assert_eq!(record.recording_url.as_deref(), Some("https://rec/1"));
    }

    #[tokio::test]
    async fn numbers_are_set_once() {
        let store = InMemoryCallStore::new();
        store
            .upsert_status("CA2", CallUpdate::received("+611", "+612", CallStatus::VaReceived))
            .await
            .unwrap();
        let record = store
            .upsert_status("CA2", CallUpdate::received("+699", "+698", CallStatus::VaProcessed))
            .await
            .unwrap();
        assert_eq!(record.from, "+611");
        assert_eq!(record.to, "+612");
        assert_eq!(record.status, CallStatus::VaProcessed);
    }

    #[tokio::test]
    async fn replayed_recording_callback_is_idempotent() {
        let store = InMemoryCallStore::new();
        for _ in 0..2 {
            store
                .attach_recording("CA3", Some("https://rec/3"), Some("completed"))
                .await
                .unwrap();
        }
        let record = store.get("CA3").await.unwrap().unwrap();
        assert_eq!(record.recording_url.as_deref(), Some("https://rec/3"));
        assert_eq!(record.recording_status.as_deref(), Some("completed"));
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn steps_survive_status_updates() {
        let store = InMemoryCallStore::new();
        store
            .append_steps("CA4", vec![CallStep::new("job-details", "leaking tap")])
            .await
            .unwrap();
        let record = store
            .upsert_status(
                "CA4",
                CallUpdate::transcript("leaking tap".to_string(), CallStatus::VaProcessed),
            )
            .await
            .unwrap();
        assert_eq!(record.steps, vec![CallStep::new("job-details", "leaking tap")]);
        assert_eq!(record.transcript.as_deref(), Some("leaking tap"));
    }
}
