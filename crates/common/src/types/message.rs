use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role. Unlike a typical two-party chat wire format, `System`
/// is a first-class role here since the first message of a research
/// request is frequently a system instruction rather than a user query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single message in a conversation history. Round-trips to a canonical
/// JSON object form preserving role, content, timestamp, and metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
            metadata: None,
        }
    }
}

/// Ordered sequence of messages, with a projection to the `[{role,
/// content}]` wire form LLM providers consume.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageList(pub Vec<Message>);

impl MessageList {
    pub fn to_openai_format(&self) -> Vec<Value> {
        self.0
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::System => "system",
                    },
                    "content": m.content,
                })
            })
            .collect()
    }

    /// The first message with non-empty content, whatever its role —
    /// used upstream to derive `Session::user_query` when the caller
    /// sends a `user` role message. Returns `None` if every message is
    /// empty or the list itself is empty.
    pub fn first_nonempty_content(&self) -> Option<&str> {
        self.0
            .iter()
            .map(|m| m.content.as_str())
            .find(|c| !c.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl IntoIterator for MessageList {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Input to a research run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub messages: MessageList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_search_items")]
    pub max_search_items: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_model: Option<String>,
}

fn default_max_iterations() -> u32 {
    15
}

fn default_max_search_items() -> u32 {
    4
}

impl ResearchRequest {
    /// Clamp to the documented bounds (1..=50 for both fields), matching
    /// the wire model's `ge`/`le` constraints.
    pub fn clamp_bounds(&mut self) {
        self.max_iterations = self.max_iterations.clamp(1, 50);
        self.max_search_items = self.max_search_items.clamp(1, 50);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_nonempty_content_skips_blank_messages() {
        let list = MessageList(vec![
            Message {
                role: Role::System,
                content: "   ".into(),
                timestamp: None,
                metadata: None,
            },
            Message::user("What is Rust?"),
        ]);

        assert_eq!(list.first_nonempty_content(), Some("What is Rust?"));
    }

    #[test]
    fn first_nonempty_content_none_when_all_blank() {
        let list = MessageList(vec![Message {
            role: Role::User,
            content: "".into(),
            timestamp: None,
            metadata: None,
        }]);

        assert_eq!(list.first_nonempty_content(), None);
    }

    #[test]
    fn to_openai_format_projects_role_and_content() {
        let list = MessageList(vec![Message::user("hi")]);
        let projected = list.to_openai_format();
        assert_eq!(projected[0]["role"], "user");
        assert_eq!(projected[0]["content"], "hi");
    }
}
