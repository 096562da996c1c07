use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use time::OffsetDateTime;
use uuid::Uuid;

use brook_common::{GenerationStatus, MessageRole};
use brook_core::store::{MessageRecord, MessageStore, StoreError, StoreResult};

use crate::entities;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("corrupt column value: {0}")]
    Decode(String),
}

/// sea-orm implementation of the durable message store. Holds its own
/// connection handle; callers decide how widely to share it.
#[derive(Clone)]
pub struct MessageStorage {
    db: DatabaseConnection,
}

impl MessageStorage {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = Database::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync, run once at bootstrap.
    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Conversations)
            .register(entities::Messages)
            .sync(&self.db)
            .await
    }

    async fn fetch_active(
        &self,
        message_id: Uuid,
    ) -> StoreResult<entities::messages::ActiveModel> {
        let model = entities::Messages::find_by_id(message_id)
            .one(&self.db)
            .await
            .map_err(backend)?
            .ok_or(StoreError::UnknownMessage(message_id))?;
        Ok(model.into())
    }
}

fn decode_record(model: entities::messages::Model) -> Result<MessageRecord, StorageError> {
    let role = MessageRole::parse(&model.role)
        .ok_or_else(|| StorageError::Decode(format!("message role {:?}", model.role)))?;
    let status = GenerationStatus::parse(&model.status)
        .ok_or_else(|| StorageError::Decode(format!("message status {:?}", model.status)))?;
    Ok(MessageRecord {
        id: model.id,
        conversation_id: model.conversation_id,
        role,
        content: model.content,
        status,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

fn backend(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl MessageStore for MessageStorage {
    async fn insert_conversation(&self, title: Option<&str>) -> StoreResult<Uuid> {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::now_v7();
        let active = entities::conversations::ActiveModel {
            id: ActiveValue::Set(id),
            title: ActiveValue::Set(title.map(str::to_string)),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Conversations::insert(active)
            .exec(&self.db)
            .await
            .map_err(backend)?;
        Ok(id)
    }

    async fn insert_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
    ) -> StoreResult<MessageRecord> {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::now_v7();
        let active = entities::messages::ActiveModel {
            id: ActiveValue::Set(id),
            conversation_id: ActiveValue::Set(conversation_id),
            role: ActiveValue::Set(role.as_str().to_string()),
            content: ActiveValue::Set(String::new()),
            status: ActiveValue::Set(GenerationStatus::Pending.as_str().to_string()),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Messages::insert(active)
            .exec(&self.db)
            .await
            .map_err(backend)?;
        Ok(MessageRecord {
            id,
            conversation_id,
            role,
            content: String::new(),
            status: GenerationStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_content(&self, message_id: Uuid, content: &str) -> StoreResult<()> {
        let mut active = self.fetch_active(message_id).await?;
        active.content = ActiveValue::Set(content.to_string());
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await.map_err(backend)?;
        Ok(())
    }

    async fn update_status(
        &self,
        message_id: Uuid,
        status: GenerationStatus,
        content: Option<&str>,
    ) -> StoreResult<()> {
        let mut active = self.fetch_active(message_id).await?;
        active.status = ActiveValue::Set(status.as_str().to_string());
        if let Some(content) = content {
            active.content = ActiveValue::Set(content.to_string());
        }
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await.map_err(backend)?;
        Ok(())
    }

    async fn message(&self, message_id: Uuid) -> StoreResult<Option<MessageRecord>> {
        let model = entities::Messages::find_by_id(message_id)
            .one(&self.db)
            .await
            .map_err(backend)?;
        match model {
            Some(model) => Ok(Some(decode_record(model).map_err(backend)?)),
            None => Ok(None),
        }
    }
}
