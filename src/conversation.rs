//! Append-only per-agent conversation threads.
//!
//! Threads live only as long as the process; there is no persistence layer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: MessageSender,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// In-memory conversation store keyed by agent id. Messages are only ever
/// appended, never mutated in place.
#[derive(Default)]
pub struct ConversationStore {
    threads: DashMap<String, Vec<ChatMessage>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, agent_id: &str, sender: MessageSender, content: impl Into<String>) -> ChatMessage {
        let message = ChatMessage {
            sender,
            content: content.into(),
            timestamp: Utc::now(),
        };
        self.threads
            .entry(agent_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    pub fn history(&self, agent_id: &str) -> Vec<ChatMessage> {
        self.threads
            .get(agent_id)
            .map(|thread| thread.value().clone())
            .unwrap_or_default()
    }
}
