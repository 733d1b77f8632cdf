mod jsonl;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Role;

pub use jsonl::JsonlConversationStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One visitor session's chat with one widget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub widget_id: u64,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Append-only conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn find_or_create(&self, widget_id: u64, session_id: &str) -> Result<Conversation>;
    async fn append_message(&self, message: &StoredMessage) -> Result<()>;
    async fn list_conversations(&self, widget_id: u64) -> Result<Vec<Conversation>>;
    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
    /// Removes the conversation and its messages; `NotFound` if it never existed.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;
}
