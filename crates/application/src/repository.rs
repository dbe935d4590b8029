use async_trait::async_trait;
use domain::{
    ChatMessage, ConversationId, FileId, FileUpload, MessageId, NewMessage, RepositoryResult,
    UserId,
};

/// 持久化服务契约
///
/// 单行的创建/更新/软删除由实现方保证原子性；核心不会把多个调用包进事务。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    // 创建消息，服务端分配 ID 与创建时间
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<ChatMessage>;

    // 编辑消息；编辑者不是原作者时返回 Forbidden
    async fn edit_message(
        &self,
        message_id: MessageId,
        editor_id: UserId,
        content: String,
    ) -> RepositoryResult<ChatMessage>;

    // 软删除消息；操作者不是原作者时返回 Forbidden
    async fn soft_delete_message(
        &self,
        message_id: MessageId,
        actor_id: UserId,
    ) -> RepositoryResult<()>;

    // 刷新会话的最后活动时间
    async fn touch_conversation(&self, conversation_id: ConversationId) -> RepositoryResult<()>;

    async fn list_member_ids(&self, conversation_id: ConversationId)
        -> RepositoryResult<Vec<UserId>>;

    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool>;

    async fn mark_message_read(&self, message_id: MessageId, user_id: UserId)
        -> RepositoryResult<()>;

    // 推进用户在会话中的已读游标
    async fn update_last_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()>;

    async fn upsert_delivery_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()>;

    async fn find_file(&self, file_id: FileId) -> RepositoryResult<FileUpload>;
}
