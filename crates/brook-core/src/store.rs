use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use brook_common::{GenerationStatus, MessageRole};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown message: {0}")]
    UnknownMessage(Uuid),
    #[error("store backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub status: GenerationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Durable message store, one record per message.
///
/// `update_content` and `update_status` are idempotent for identical
/// arguments; the relay relies on that at the forced terminal flush.
/// Runtime readers reconcile against this store after a disconnect, so the
/// record is the source of truth for what a generation actually produced.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_conversation(&self, title: Option<&str>) -> StoreResult<Uuid>;

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
    ) -> StoreResult<MessageRecord>;

    async fn update_content(&self, message_id: Uuid, content: &str) -> StoreResult<()>;

    async fn update_status(
        &self,
        message_id: Uuid,
        status: GenerationStatus,
        content: Option<&str>,
    ) -> StoreResult<()>;

    async fn message(&self, message_id: Uuid) -> StoreResult<Option<MessageRecord>>;
}

/// In-memory store. Backs single-process deployments without a database
/// and the relay's own tests.
#[derive(Default)]
pub struct MemoryMessageStore {
    conversations: Mutex<HashMap<Uuid, Option<String>>>,
    records: Mutex<HashMap<Uuid, MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert_conversation(&self, title: Option<&str>) -> StoreResult<Uuid> {
        let id = Uuid::now_v7();
        let mut conversations = self
            .conversations
            .lock()
            .expect("message store lock poisoned");
        conversations.insert(id, title.map(str::to_string));
        Ok(id)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
    ) -> StoreResult<MessageRecord> {
        let now = OffsetDateTime::now_utc();
        let record = MessageRecord {
            id: Uuid::now_v7(),
            conversation_id,
            role,
            content: String::new(),
            status: GenerationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let mut records = self.records.lock().expect("message store lock poisoned");
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_content(&self, message_id: Uuid, content: &str) -> StoreResult<()> {
        let mut records = self.records.lock().expect("message store lock poisoned");
        let record = records
            .get_mut(&message_id)
            .ok_or(StoreError::UnknownMessage(message_id))?;
        record.content = content.to_string();
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: GenerationStatus,
        content: Option<&str>,
    ) -> StoreResult<()> {
        let mut records = self.records.lock().expect("message store lock poisoned");
        let record = records
            .get_mut(&message_id)
            .ok_or(StoreError::UnknownMessage(message_id))?;
        record.status = status;
        if let Some(content) = content {
            record.content = content.to_string();
        }
        record.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn message(&self, message_id: Uuid) -> StoreResult<Option<MessageRecord>> {
        let records = self.records.lock().expect("message store lock poisoned");
        Ok(records.get(&message_id).cloned())
    }
}
