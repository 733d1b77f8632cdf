use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::warn;

use super::{Conversation, ConversationStore, Result, StorageError, StoredMessage};

/// Stores each conversation as `<id>.json` metadata plus an `<id>.jsonl` message log.
#[derive(Debug)]
pub struct JsonlConversationStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlConversationStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn init(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.base_path).await
    }

    pub fn conversation_id(widget_id: u64, session_id: &str) -> Result<String> {
        validate_id(session_id)?;
        Ok(format!("{}-{}", widget_id, session_id))
    }

    async fn load_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(conversation_id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save_conversation(&self, conversation: &Conversation) -> Result<()> {
        let json = serde_json::to_string(conversation)?;
        fs::write(self.conversation_path(&conversation.id), json).await?;
        Ok(())
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", conversation_id))
    }

    fn messages_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", conversation_id))
    }
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn find_or_create(&self, widget_id: u64, session_id: &str) -> Result<Conversation> {
        let id = Self::conversation_id(widget_id, session_id)?;
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.load_conversation(&id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let conversation = Conversation {
            id,
            widget_id,
            session_id: session_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.save_conversation(&conversation).await?;
        Ok(conversation)
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<()> {
        validate_id(&message.conversation_id)?;
        let _guard = self.write_lock.lock().await;

        let mut conversation = self
            .load_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(message.conversation_id.clone()))?;

        let json = serde_json::to_string(message)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.messages_path(&message.conversation_id))
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        conversation.updated_at = message.created_at;
        self.save_conversation(&conversation).await
    }

    async fn list_conversations(&self, widget_id: u64) -> Result<Vec<Conversation>> {
        let mut conversations = Vec::new();
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(conversations)
            }
            Err(error) => return Err(error.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Conversation>(&content) {
                Ok(conversation) if conversation.widget_id == widget_id => {
                    conversations.push(conversation)
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable conversation file {:?}: {}", path, e),
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        validate_id(conversation_id)?;
        let path = self.messages_path(conversation_id);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }

        let file = fs::File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut messages = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Skipping malformed message in {}: {}", conversation_id, e),
            }
        }

        Ok(messages)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        validate_id(conversation_id)?;
        let _guard = self.write_lock.lock().await;

        let metadata = self.conversation_path(conversation_id);
        if !fs::try_exists(&metadata).await? {
            return Err(StorageError::NotFound(conversation_id.to_string()));
        }

        match fs::remove_file(self.messages_path(conversation_id)).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        fs::remove_file(metadata).await?;
        Ok(())
    }
}
