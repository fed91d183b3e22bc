use serde::{Deserialize, Serialize};

use deepresearch_common::types::{Message, MessageList, ResearchRequest};

/// The three shapes the upstream system accepts for `messages` (§4.6, §9):
/// a list of message objects, or a single bare message object. A pre-built
/// `MessageList` is wire-identical to the list form, so there is nothing
/// further to distinguish on the JSON boundary.
#[derive(Deserialize)]
#[serde(untagged)]
enum MessagesField {
    List(Vec<Message>),
    Single(Message),
}

impl From<MessagesField> for MessageList {
    fn from(field: MessagesField) -> Self {
        match field {
            MessagesField::List(messages) => MessageList(messages),
            MessagesField::Single(message) => MessageList(vec![message]),
        }
    }
}

/// Wire body of `POST /v1/chat/completions`. Deserialized from a raw
/// `serde_json::Value` by the handler (rather than via axum's `Json`
/// extractor directly) so a non-conforming `messages` shape can be turned
/// into an HTTP 422 instead of axum's default 400 rejection.
#[derive(Deserialize)]
pub struct ChatCompletionRequest {
    messages: MessagesField,
    #[serde(default)]
    system_instruction: Option<String>,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    #[serde(default = "default_max_search_items")]
    max_search_items: u32,
    #[serde(default)]
    default_model: Option<String>,
    #[serde(default)]
    reason_model: Option<String>,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_search_items() -> u32 {
    4
}

impl From<ChatCompletionRequest> for ResearchRequest {
    fn from(req: ChatCompletionRequest) -> Self {
        let mut research = ResearchRequest {
            messages: req.messages.into(),
            system_instruction: req.system_instruction,
            max_iterations: req.max_iterations,
            max_search_items: req.max_search_items,
            default_model: req.default_model,
            reason_model: req.reason_model,
        };
        research.clamp_bounds();
        research
    }
}

#[derive(Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
}

#[derive(Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

impl ModelList {
    pub fn single_deep_researcher(created: i64) -> Self {
        Self {
            object: "list",
            data: vec![ModelObject {
                id: "deep_researcher".to_string(),
                object: "model",
                created,
                owned_by: "deep-research-orchestrator",
            }],
        }
    }
}

#[derive(Serialize)]
pub struct SessionSummaryList {
    pub sessions: Vec<deepresearch_common::types::SessionSummary>,
    pub start_time: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub history: Vec<deepresearch_common::types::HistoryEntry>,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}
