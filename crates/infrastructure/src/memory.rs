//! 进程内持久化实现
//!
//! 所有集合放在同一把 `tokio::sync::RwLock` 之后，单次调用内的读改写是原子的。
//! 进程重启后数据丢失，适用于单机部署、演示与测试。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use application::{ChatRepository, Clock, SystemClock};
use async_trait::async_trait;
use domain::{
    ChatMessage, ConversationId, FileId, FileUpload, MessageDelivery, MessageId, NewMessage,
    ReadCursor, RepositoryError, RepositoryResult, Timestamp, UserId,
};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct ConversationRecord {
    members: HashSet<UserId>,
    last_activity_at: Timestamp,
}

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, ConversationRecord>,
    messages: HashMap<MessageId, ChatMessage>,
    receipts: HashMap<(MessageId, UserId), MessageDelivery>,
    cursors: HashMap<(ConversationId, UserId), ReadCursor>,
    files: HashMap<FileId, FileUpload>,
}

#[derive(Clone)]
pub struct InMemoryChatRepository {
    tables: Arc<RwLock<Tables>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryChatRepository {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryChatRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            clock,
        }
    }

    /// 创建会话（已存在时只追加成员）
    pub async fn create_conversation(
        &self,
        conversation_id: ConversationId,
        members: impl IntoIterator<Item = UserId>,
    ) {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        let record = tables
            .conversations
            .entry(conversation_id)
            .or_insert_with(|| ConversationRecord {
                members: HashSet::new(),
                last_activity_at: now,
            });
        record.members.extend(members);
    }

    pub async fn insert_file(&self, file: FileUpload) {
        self.tables.write().await.files.insert(file.id, file);
    }

    pub async fn find_message(&self, message_id: MessageId) -> Option<ChatMessage> {
        self.tables.read().await.messages.get(&message_id).cloned()
    }

    pub async fn last_activity_at(&self, conversation_id: ConversationId) -> Option<Timestamp> {
        self.tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map(|record| record.last_activity_at)
    }

    pub async fn delivery(&self, message_id: MessageId, user_id: UserId) -> Option<MessageDelivery> {
        self.tables
            .read()
            .await
            .receipts
            .get(&(message_id, user_id))
            .cloned()
    }

    pub async fn read_cursor(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Option<ReadCursor> {
        self.tables
            .read()
            .await
            .cursors
            .get(&(conversation_id, user_id))
            .cloned()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<ChatMessage> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&message.conversation_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(file_id) = message.file_id {
            if !tables.files.contains_key(&file_id) {
                return Err(RepositoryError::storage(format!("unknown file {file_id}")));
            }
        }

        let saved = ChatMessage::create(message, now)?;
        tables.messages.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn edit_message(
        &self,
        message_id: MessageId,
        editor_id: UserId,
        content: String,
    ) -> RepositoryResult<ChatMessage> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&message_id)
            .ok_or(RepositoryError::NotFound)?;
        message.edit(editor_id, content, now)?;
        Ok(message.clone())
    }

    async fn soft_delete_message(
        &self,
        message_id: MessageId,
        actor_id: UserId,
    ) -> RepositoryResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        let message = tables
            .messages
            .get_mut(&message_id)
            .ok_or(RepositoryError::NotFound)?;
        message.soft_delete(actor_id, now)?;
        Ok(())
    }

    async fn touch_conversation(&self, conversation_id: ConversationId) -> RepositoryResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        let record = tables
            .conversations
            .get_mut(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        record.last_activity_at = now;
        Ok(())
    }

    async fn list_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<UserId>> {
        let tables = self.tables.read().await;
        let record = tables
            .conversations
            .get(&conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(record.members.iter().copied().collect())
    }

    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversations
            .get(&conversation_id)
            .is_some_and(|record| record.members.contains(&user_id)))
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&message_id) {
            return Err(RepositoryError::NotFound);
        }
        tables
            .receipts
            .entry((message_id, user_id))
            .or_insert_with(|| MessageDelivery::delivered(message_id, user_id, now))
            .mark_read(now);
        Ok(())
    }

    async fn update_last_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        if !tables.conversations.contains_key(&conversation_id) {
            return Err(RepositoryError::NotFound);
        }
        tables
            .cursors
            .entry((conversation_id, user_id))
            .and_modify(|cursor| cursor.advance(now))
            .or_insert_with(|| ReadCursor::new(conversation_id, user_id, now));
        Ok(())
    }

    async fn upsert_delivery_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        let now = self.clock.now();
        let mut tables = self.tables.write().await;
        if !tables.messages.contains_key(&message_id) {
            return Err(RepositoryError::NotFound);
        }
        // 已存在的回执保持原送达时间
        tables
            .receipts
            .entry((message_id, user_id))
            .or_insert_with(|| MessageDelivery::delivered(message_id, user_id, now));
        Ok(())
    }

    async fn find_file(&self, file_id: FileId) -> RepositoryResult<FileUpload> {
        self.tables
            .read()
            .await
            .files
            .get(&file_id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}
