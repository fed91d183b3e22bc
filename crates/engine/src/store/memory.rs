use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::Utc;

use deepresearch_common::types::{HistoryEntry, Session, SessionStatus, SessionSummary};
use deepresearch_common::{DeepResearchError, Result, SessionId};

use super::hash::integrity_hash;
use super::Store;

struct Row {
    session: Session,
    hash: String,
}

/// In-process `Store` used by Orchestrator tests and as a development
/// fallback; mirrors [`super::PostgresStore`]'s exact operation semantics
/// without a database dependency.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<SessionId, Row>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn save<'a>(&'a self, session: &'a Session, iteration: i32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().expect("lock poisoned");
            let hash = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);

            match rows.get_mut(&session.session_id) {
                None => {
                    let mut stored = session.clone();
                    stored.history = Vec::new();
                    rows.insert(session.session_id, Row { session: stored, hash });
                }
                Some(row) => {
                    row.session = session.clone();
                    row.session.current_iteration = iteration;
                    row.session.history.push(HistoryEntry {
                        iteration,
                        timestamp: Utc::now(),
                        data: session.aggregated_data.clone(),
                    });
                    row.hash = hash;
                }
            }
            Ok(())
        })
    }

    fn load<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        Box::pin(async move {
            let rows = self.rows.lock().expect("lock poisoned");
            let row = rows.get(&id).ok_or_else(|| DeepResearchError::NotFound(id.to_string()))?;
            let mut session = row.session.clone();

            let recomputed = integrity_hash(&serde_json::to_value(&session.aggregated_data)?);
            if recomputed != row.hash {
                session.integrity_failed = true;
            }
            Ok(session)
        })
    }

    fn list<'a>(&'a self, user_id: Option<&'a str>) -> Pin<Box<dyn Future<Output = Result<Vec<SessionSummary>>> + Send + 'a>> {
        Box::pin(async move {
            let rows = self.rows.lock().expect("lock poisoned");
            let mut summaries: Vec<(chrono::DateTime<Utc>, SessionSummary)> = Vec::new();
            for row in rows.values() {
                if let Some(uid) = user_id {
                    if row.session.user_id.as_deref() != Some(uid) {
                        continue;
                    }
                }
                summaries.push((row.session.created_at, SessionSummary::from(&row.session)));
            }
            summaries.sort_by_key(|(created, _)| *created);
            Ok(summaries.into_iter().map(|(_, s)| s).collect())
        })
    }

    fn delete<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().expect("lock poisoned");
            rows.remove(&id).ok_or_else(|| DeepResearchError::NotFound(id.to_string()))?;
            Ok(())
        })
    }

    fn history<'a>(&'a self, id: SessionId) -> Pin<Box<dyn Future<Output = Result<Vec<HistoryEntry>>> + Send + 'a>> {
        Box::pin(async move {
            let rows = self.rows.lock().expect("lock poisoned");
            let row = rows.get(&id).ok_or_else(|| DeepResearchError::NotFound(id.to_string()))?;
            Ok(row.session.history.clone())
        })
    }

    fn rollback<'a>(&'a self, id: SessionId, target_iteration: i32) -> Pin<Box<dyn Future<Output = Result<Session>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().expect("lock poisoned");
            let row = rows.get_mut(&id).ok_or_else(|| DeepResearchError::NotFound(id.to_string()))?;

            let target = row
                .session
                .history
                .iter()
                .rev()
                .find(|e| e.iteration == target_iteration)
                .cloned()
                .ok_or_else(|| {
                    DeepResearchError::NotFound(format!(
                        "no history entry at iteration {target_iteration} for session {id}"
                    ))
                })?;

            row.session.aggregated_data = target.data;
            row.session.current_iteration = target.iteration;
            row.session.status = SessionStatus::Running;
            row.session.updated_at = Utc::now();
            row.hash = integrity_hash(&serde_json::to_value(&row.session.aggregated_data)?);

            Ok(row.session.clone())
        })
    }

    fn verify_integrity<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut rows = self.rows.lock().expect("lock poisoned");
            for row in rows.values_mut() {
                let recomputed = integrity_hash(&serde_json::to_value(&row.session.aggregated_data)?);
                if recomputed != row.hash {
                    tracing::warn!(session_id = %row.session.session_id, "startup integrity verification failed");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepresearch_common::types::ResearchRequest;

    fn sample_request() -> ResearchRequest {
        ResearchRequest {
            messages: deepresearch_common::types::MessageList(vec![]),
            system_instruction: None,
            max_iterations: 15,
            max_search_items: 4,
            default_model: None,
            reason_model: None,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let store = InMemoryStore::new();
        let session = Session::new(SessionId::new(), "what is rust".into(), sample_request());
        store.save(&session, -1).await.unwrap();

        let loaded = store.load(session.session_id).await.unwrap();
        assert_eq!(loaded.user_query, "what is rust");
        assert!(!loaded.integrity_failed);
    }

    #[tokio::test]
    async fn second_save_appends_history_entry() {
        let store = InMemoryStore::new();
        let mut session = Session::new(SessionId::new(), "q".into(), sample_request());
        store.save(&session, -1).await.unwrap();

        session.current_iteration = 0;
        session.aggregated_data.all_search_queries.push("q1".into());
        store.save(&session, 0).await.unwrap();

        let history = store.history(session.session_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].iteration, 0);
    }

    #[tokio::test]
    async fn rollback_restores_latest_matching_iteration() {
        let store = InMemoryStore::new();
        let mut session = Session::new(SessionId::new(), "q".into(), sample_request());
        store.save(&session, -1).await.unwrap();

        session.aggregated_data.all_search_queries.push("first".into());
        store.save(&session, 0).await.unwrap();

        session.aggregated_data.all_search_queries.push("second".into());
        store.save(&session, 1).await.unwrap();

        let rolled_back = store.rollback(session.session_id, 0).await.unwrap();
        assert_eq!(rolled_back.current_iteration, 0);
        assert_eq!(rolled_back.aggregated_data.all_search_queries, vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn rollback_to_unknown_iteration_errors() {
        let store = InMemoryStore::new();
        let session = Session::new(SessionId::new(), "q".into(), sample_request());
        store.save(&session, -1).await.unwrap();

        let result = store.rollback(session.session_id, 99).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_then_load_is_not_found() {
        let store = InMemoryStore::new();
        let session = Session::new(SessionId::new(), "q".into(), sample_request());
        store.save(&session, -1).await.unwrap();
        store.delete(session.session_id).await.unwrap();

        assert!(store.load(session.session_id).await.is_err());
    }
}
