//! Conversation persistence behind a trait, with merge semantics: state
//! updates patch top-level keys and never overwrite the whole document.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reservo_core::state::{merge_state_keys, ConversationState};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub channel: String,
    pub external_id: String,
    pub state: ConversationState,
    pub lead_name: Option<String>,
    pub lead_phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conversation {0} not found")]
    NotFound(Uuid),
    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Find or create the conversation for this channel identity.
    /// The boolean is true when the conversation was just created.
    async fn get_or_create(
        &self,
        agent_id: &str,
        channel: &str,
        external_id: &str,
    ) -> Result<(ConversationRecord, bool), StoreError>;

    /// Most recent messages, oldest first, at most `limit`.
    async fn history(&self, conversation_id: Uuid, limit: usize)
        -> Result<Vec<StoredMessage>, StoreError>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError>;

    /// Patch the persisted state: top-level keys of `patch` overwrite, all
    /// other keys survive. Returns the state after the merge.
    async fn merge_state(
        &self,
        conversation_id: Uuid,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ConversationState, StoreError>;

    /// Record lead contact details on first sight. A value that is already
    /// set is never overwritten.
    async fn update_lead(
        &self,
        conversation_id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreInner {
    by_identity: HashMap<(String, String, String), Uuid>,
    records: HashMap<Uuid, ConversationRecord>,
    messages: HashMap<Uuid, Vec<StoredMessage>>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, conversation_id: Uuid) -> Option<ConversationRecord> {
        self.inner.lock().await.records.get(&conversation_id).cloned()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create(
        &self,
        agent_id: &str,
        channel: &str,
        external_id: &str,
    ) -> Result<(ConversationRecord, bool), StoreError> {
        let mut inner = self.inner.lock().await;
        let key = (agent_id.to_string(), channel.to_string(), external_id.to_string());

        if let Some(id) = inner.by_identity.get(&key) {
            let record = inner.records.get(id).cloned().ok_or(StoreError::NotFound(*id))?;
            return Ok((record, false));
        }

        let record = ConversationRecord {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            channel: channel.to_string(),
            external_id: external_id.to_string(),
            state: ConversationState::default(),
            lead_name: None,
            lead_phone: None,
        };
        inner.by_identity.insert(key, record.id);
        inner.messages.insert(record.id, Vec::new());
        inner.records.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.inner.lock().await;
        let messages =
            inner.messages.get(&conversation_id).ok_or(StoreError::NotFound(conversation_id))?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let messages = inner
            .messages
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound(conversation_id))?;
        messages.push(StoredMessage {
            role: role.to_string(),
            content: content.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    async fn merge_state(
        &self,
        conversation_id: Uuid,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ConversationState, StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound(conversation_id))?;

        let mut document = record.state.to_json();
        merge_state_keys(&mut document, patch);
        record.state = serde_json::from_value(serde_json::Value::Object(document))?;
        Ok(record.state.clone())
    }

    async fn update_lead(
        &self,
        conversation_id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&conversation_id)
            .ok_or(StoreError::NotFound(conversation_id))?;
        if record.lead_name.is_none() {
            record.lead_name = name.map(str::to_string);
        }
        if record.lead_phone.is_none() {
            record.lead_phone = phone.map(str::to_string);
        }
        Ok(())
    }
}
