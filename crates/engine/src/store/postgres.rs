use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use sqlx::PgPool;

use deepresearch_common::types::{HistoryEntry, Session, SessionStatus, SessionSummary};
use deepresearch_common::{DeepResearchError, Result, SessionId};

use super::hash::integrity_hash;
use super::Store;

/// Postgres-backed implementation of [`Store`]. `sessions`/`integrity_hashes`
/// tables, JSONB `data`/`history` columns (§0, §4.5) standing in for the
/// upstream system's MongoDB documents.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| DeepResearchError::StoreError(format!("failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DeepResearchError::StoreError(format!("migration failed: {e}")))
    }

    async fn row_to_session(&self, row: SessionRow) -> Result<Session> {
        let mut session: Session = serde_json::from_value(row.data)?;
        let history: Vec<HistoryEntry> = serde_json::from_value(row.history)?;
        session.history = history;
        session.status = SessionStatus::decode(&row.status);
        session.current_iteration = row.current_iteration;
        session.last_error = row.last_error;
        session.version = row.version;

        let stored_hash: Option<String> = sqlx::query_scalar(
            "SELECT session_hash FROM integrity_hashes WHERE session_id = $1",
        )
        .bind(row.session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

        if let Some(hash) = stored_hash {
            let recomputed = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);
            if recomputed != hash {
                tracing::warn!(session_id = %session.session_id, "integrity hash mismatch on load");
                session.integrity_failed = true;
            }
        }

        Ok(session)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: uuid::Uuid,
    status: String,
    current_iteration: i32,
    data: serde_json::Value,
    last_error: Option<String>,
    version: i64,
    history: serde_json::Value,
}

impl Store for PostgresStore {
    fn save<'a>(&'a self, session: &'a Session, iteration: i32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let now = Utc::now();
            let data = serde_json::to_value(session)?;
            let hash = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);

            let existing: Option<uuid::Uuid> =
                sqlx::query_scalar("SELECT session_id FROM sessions WHERE session_id = $1")
                    .bind(session.session_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            if existing.is_none() {
                sqlx::query(
                    "INSERT INTO sessions (session_id, user_id, created_at, updated_at, status, \
                     current_iteration, data, last_error, version, history) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '[]'::jsonb)",
                )
                .bind(session.session_id.as_uuid())
                .bind(&session.user_id)
                .bind(session.created_at)
                .bind(now)
                .bind(session.status.as_db_str())
                .bind(iteration)
                .bind(&data)
                .bind(&session.last_error)
                .bind(session.version)
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

                sqlx::query(
                    "INSERT INTO integrity_hashes (session_id, session_hash) VALUES ($1, $2)",
                )
                .bind(session.session_id.as_uuid())
                .bind(&hash)
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;
            } else {
                let history_entry = serde_json::to_value(HistoryEntry {
                    iteration,
                    timestamp: now,
                    data: session.aggregated_data.clone(),
                })?;

                sqlx::query(
                    "UPDATE sessions SET updated_at = $2, status = $3, current_iteration = $4, \
                     data = $5, last_error = $6, version = version + 1, \
                     history = history || $7::jsonb WHERE session_id = $1",
                )
                .bind(session.session_id.as_uuid())
                .bind(now)
                .bind(session.status.as_db_str())
                .bind(iteration)
                .bind(&data)
                .bind(&session.last_error)
                .bind(serde_json::Value::Array(vec![history_entry]))
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

                sqlx::query(
                    "UPDATE integrity_hashes SET session_hash = $2 WHERE session_id = $1",
                )
                .bind(session.session_id.as_uuid())
                .bind(&hash)
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;
            }

            Ok(())
        })
    }

    fn load<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        Box::pin(async move {
            let row: Option<SessionRow> = sqlx::query_as(
                "SELECT session_id, status, current_iteration, data, last_error, version, history \
                 FROM sessions WHERE session_id = $1",
            )
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            match row {
                Some(r) => self.row_to_session(r).await,
                None => Err(DeepResearchError::NotFound(id.to_string())),
            }
        })
    }

    fn list<'a>(&'a self, user_id: Option<&'a str>) -> Pin<Box<dyn Future<Output = Result<Vec<SessionSummary>>> + Send + 'a>> {
        Box::pin(async move {
            let rows: Vec<SessionRow> = sqlx::query_as(
                "SELECT session_id, status, current_iteration, data, last_error, version, history \
                 FROM sessions WHERE ($1::text IS NULL OR user_id = $1) ORDER BY created_at ASC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let status = SessionStatus::decode(&row.status);
                if status == SessionStatus::Error && row.status != "error" {
                    tracing::warn!(session_id = %row.session_id, raw_status = %row.status, "unknown session status, defaulting to error");
                }
                match self.row_to_session(row).await {
                    Ok(session) => summaries.push(SessionSummary::from(&session)),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping session with corrupt data during list");
                    }
                }
            }
            Ok(summaries)
        })
    }

    fn delete<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            if result.rows_affected() == 0 {
                return Err(DeepResearchError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn history<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>> {
        Box::pin(async move {
            let history: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT history FROM sessions WHERE session_id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            match history {
                Some(v) => Ok(serde_json::from_value(v)?),
                None => Err(DeepResearchError::NotFound(id.to_string())),
            }
        })
    }

    fn rollback<'a>(&'a self, id: SessionId, target_iteration: i32) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        Box::pin(async move {
            let entries = self.history(id).await?;
            let target = entries
                .into_iter()
                .rev()
                .find(|e| e.iteration == target_iteration)
                .ok_or_else(|| {
                    DeepResearchError::NotFound(format!(
                        "no history entry at iteration {target_iteration} for session {id}"
                    ))
                })?;

            let mut session = self.load(id).await?;
            session.aggregated_data = target.data;
            session.current_iteration = target.iteration;
            session.status = SessionStatus::Running;
            session.updated_at = Utc::now();

            let data = serde_json::to_value(&session)?;
            let hash = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);

            sqlx::query(
                "UPDATE sessions SET data = $2, current_iteration = $3, status = $4, updated_at = $5 \
                 WHERE session_id = $1",
            )
            .bind(id.as_uuid())
            .bind(&data)
            .bind(session.current_iteration)
            .bind(session.status.as_db_str())
            .bind(session.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            sqlx::query("UPDATE integrity_hashes SET session_hash = $2 WHERE session_id = $1")
                .bind(id.as_uuid())
                .bind(&hash)
                .execute(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            Ok(session)
        })
    }

    fn verify_integrity<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let rows: Vec<SessionRow> = sqlx::query_as(
                "SELECT session_id, status, current_iteration, data, last_error, version, history FROM sessions",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

            let mut mismatches = 0;
            for row in rows {
                let session: Session = match serde_json::from_value(row.data.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(session_id = %row.session_id, error = %e, "corrupt session data at startup");
                        continue;
                    }
                };

                let stored_hash: Option<String> = sqlx::query_scalar(
                    "SELECT session_hash FROM integrity_hashes WHERE session_id = $1",
                )
                .bind(row.session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DeepResearchError::StoreError(e.to_string()))?;

                if let Some(hash) = stored_hash {
                    let recomputed = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);
                    if recomputed != hash {
                        mismatches += 1;
                        tracing::warn!(session_id = %row.session_id, "startup integrity verification failed");
                    }
                }
            }

            if mismatches > 0 {
                tracing::warn!(count = mismatches, "sessions failed integrity verification at startup");
            }
            Ok(())
        })
    }
}
