//! 尽力而为的副作用
//!
//! 这些操作失败时只记录日志：不向任何客户端报告，也不影响确认与广播主路径。
//! 返回类型中没有 `Result`，调用方无法也无需处理错误。

use std::sync::Arc;

use domain::{ConversationId, FileId, MessageId, UserId};

use crate::{ChatRepository, FileStorage};

#[derive(Clone)]
pub struct BestEffort {
    repository: Arc<dyn ChatRepository>,
    files: Arc<dyn FileStorage>,
}

impl BestEffort {
    pub fn new(repository: Arc<dyn ChatRepository>, files: Arc<dyn FileStorage>) -> Self {
        Self { repository, files }
    }

    /// 刷新会话最后活动时间
    pub async fn touch_conversation(&self, conversation_id: ConversationId) {
        if let Err(err) = self.repository.touch_conversation(conversation_id).await {
            tracing::warn!(
                error = %err,
                conversation_id = %conversation_id,
                "failed to update conversation timestamp"
            );
        }
    }

    /// 把文件 ID 解析为 URL；解析失败时返回 `None`，调用方直接省略该字段
    pub async fn resolve_file_url(&self, file_id: FileId) -> Option<String> {
        match self.repository.find_file(file_id).await {
            Ok(file) => Some(self.files.url(&file.storage_path)),
            Err(err) => {
                tracing::warn!(error = %err, file_id = %file_id, "failed to resolve file url");
                None
            }
        }
    }

    pub async fn mark_read(&self, message_id: MessageId, user_id: UserId) {
        if let Err(err) = self.repository.mark_message_read(message_id, user_id).await {
            tracing::warn!(
                error = %err,
                message_id = %message_id,
                user_id = %user_id,
                "failed to mark message read"
            );
        }
    }

    pub async fn advance_read_cursor(&self, conversation_id: ConversationId, user_id: UserId) {
        if let Err(err) = self
            .repository
            .update_last_read(conversation_id, user_id)
            .await
        {
            tracing::warn!(
                error = %err,
                conversation_id = %conversation_id,
                user_id = %user_id,
                "failed to advance read cursor"
            );
        }
    }

    pub async fn record_delivery(&self, message_id: MessageId, user_id: UserId) {
        if let Err(err) = self
            .repository
            .upsert_delivery_receipt(message_id, user_id)
            .await
        {
            tracing::warn!(
                error = %err,
                message_id = %message_id,
                user_id = %user_id,
                "failed to upsert delivery receipt"
            );
        }
    }
}
