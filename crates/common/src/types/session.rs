use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ResearchRequest;
use crate::ids::SessionId;

/// Lifecycle status of a research session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Init,
    Running,
    Completed,
    Interrupted,
    Error,
}

impl SessionStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }

    /// Decode a status string, falling back to `Error` (with a warning
    /// logged by the caller) for anything unrecognized rather than
    /// failing to deserialize — an unknown status must still surface in
    /// a session listing, never be silently dropped.
    pub fn decode(s: &str) -> Self {
        match s {
            "init" => Self::Init,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "interrupted" => Self::Interrupted,
            "error" => Self::Error,
            _ => Self::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// A `(source_url, extracted_text)` pair produced by the judge+extract
/// stages of one iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextRecord {
    pub source_url: String,
    pub extracted_text: String,
}

impl ContextRecord {
    /// The tagged-string wire form consumed by prompt templates:
    /// `url:<u>\ncontext:<t>`. This is a one-way projection for prompt
    /// construction; the structured form above is what gets persisted.
    pub fn to_prompt_string(&self) -> String {
        format!("url:{}\ncontext:{}", self.source_url, self.extracted_text)
    }
}

/// Scratch and accumulated data for a run. Hashed (sha-256, canonical
/// sorted-keys serialization) for the integrity-check invariant.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AggregatedData {
    pub all_search_queries: Vec<String>,
    pub aggregated_contexts: Vec<ContextRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_plan: Option<String>,
    #[serde(default)]
    pub current_iteration_data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report_content: Option<String>,
}

/// One append-only snapshot of `aggregated_data` taken at the end of an
/// iteration (or at the special `-1` error marker / `max_iterations`
/// report marker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: i32,
    pub timestamp: DateTime<Utc>,
    pub data: AggregatedData,
}

/// The full persisted unit of a research run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub user_query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub settings: ResearchRequest,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub current_iteration: i32,
    pub aggregated_data: AggregatedData,
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub version: i64,
    /// Set by the Store on explicit GET when the recomputed integrity
    /// hash does not match the stored one. Never persisted itself.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub integrity_failed: bool,
}

impl Session {
    pub fn new(session_id: SessionId, user_query: String, settings: ResearchRequest) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: None,
            user_query,
            system_instruction: settings.system_instruction.clone(),
            settings,
            status: SessionStatus::Init,
            created_at: now,
            updated_at: now,
            end_time: None,
            current_iteration: -1,
            aggregated_data: AggregatedData::default(),
            history: Vec::new(),
            last_error: None,
            version: 1,
            integrity_failed: false,
        }
    }
}

/// Projection returned by `GET /sessions`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub user_query: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id,
            user_query: s.user_query.clone(),
            status: s.status,
            start_time: s.created_at,
            end_time: s.end_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_unknown_status_falls_back_to_error() {
        assert_eq!(SessionStatus::decode("bogus"), SessionStatus::Error);
        assert_eq!(SessionStatus::decode("running"), SessionStatus::Running);
    }

    #[test]
    fn context_record_prompt_string_shape() {
        let ctx = ContextRecord {
            source_url: "https://example.com".into(),
            extracted_text: "hello".into(),
        };
        assert_eq!(
            ctx.to_prompt_string(),
            "url:https://example.com\ncontext:hello"
        );
    }
}
