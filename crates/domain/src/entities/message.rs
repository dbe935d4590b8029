//! 消息实体定义
//!
//! 持久化的聊天消息。实体本身由持久化服务拥有，这里只描述核心依赖的不变量：
//! 只有原作者可以编辑或删除消息，删除为软删除。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, FileId, MessageId, Timestamp, UserId};

/// 新建消息的参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub file_id: Option<FileId>,
    pub reply_to_id: Option<MessageId>,
}

/// 已持久化的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: Option<String>,
    pub file_id: Option<FileId>,
    pub reply_to_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl ChatMessage {
    /// 创建新消息，内容与文件至少要有一个
    pub fn create(new: NewMessage, now: Timestamp) -> DomainResult<Self> {
        let content = new.content.filter(|c| !c.is_empty());
        if content.is_none() && new.file_id.is_none() {
            return Err(DomainError::validation_error(
                "content",
                "message must have content or file",
            ));
        }

        Ok(Self {
            id: MessageId::generate(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content,
            file_id: new.file_id,
            reply_to_id: new.reply_to_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_edited(&self) -> bool {
        self.updated_at > self.created_at
    }

    /// 编辑消息内容
    pub fn edit(&mut self, editor: UserId, content: String, now: Timestamp) -> DomainResult<()> {
        self.ensure_mutable_by(editor, "edit message")?;
        if content.is_empty() {
            return Err(DomainError::validation_error("content", "cannot be empty"));
        }
        self.content = Some(content);
        self.updated_at = now;
        Ok(())
    }

    /// 软删除消息，保留行以维持 ID 与顺序
    pub fn soft_delete(&mut self, actor: UserId, now: Timestamp) -> DomainResult<()> {
        self.ensure_mutable_by(actor, "delete message")?;
        self.deleted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn ensure_mutable_by(&self, actor: UserId, action: &str) -> DomainResult<()> {
        if self.is_deleted() {
            return Err(DomainError::resource_not_found(
                "message",
                self.id.to_string(),
            ));
        }
        if self.sender_id != actor {
            return Err(DomainError::permission_denied(action));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn new_message(sender: UserId, content: Option<&str>, file: Option<FileId>) -> NewMessage {
        NewMessage {
            conversation_id: ConversationId::generate(),
            sender_id: sender,
            content: content.map(str::to_string),
            file_id: file,
            reply_to_id: None,
        }
    }

    #[test]
    fn test_create_requires_content_or_file() {
        let sender = UserId::generate();
        let now = Utc::now();

        assert!(ChatMessage::create(new_message(sender, None, None), now).is_err());
        assert!(ChatMessage::create(new_message(sender, Some(""), None), now).is_err());

        let with_file = ChatMessage::create(new_message(sender, None, Some(FileId::generate())), now)
            .unwrap();
        assert!(with_file.content.is_none());

        let with_text = ChatMessage::create(new_message(sender, Some("hi"), None), now).unwrap();
        assert_eq!(with_text.content.as_deref(), Some("hi"));
        assert!(!with_text.is_edited());
    }

    #[test]
    fn test_only_author_can_edit_or_delete() {
        let author = UserId::generate();
        let other = UserId::generate();
        let now = Utc::now();
        let mut msg = ChatMessage::create(new_message(author, Some("hi"), None), now).unwrap();

        let err = msg.edit(other, "x".into(), now).unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied { .. }));
        assert_eq!(msg.content.as_deref(), Some("hi"));

        let later = now + Duration::seconds(5);
        msg.edit(author, "hello".into(), later).unwrap();
        assert!(msg.is_edited());
        assert_eq!(msg.updated_at, later);

        assert!(msg.soft_delete(other, later).is_err());
        assert!(!msg.is_deleted());
        msg.soft_delete(author, later).unwrap();
        assert!(msg.is_deleted());
    }

    #[test]
    fn test_deleted_message_is_immutable() {
        let author = UserId::generate();
        let now = Utc::now();
        let mut msg = ChatMessage::create(new_message(author, Some("hi"), None), now).unwrap();
        msg.soft_delete(author, now).unwrap();

        let err = msg.edit(author, "again".into(), now).unwrap_err();
        assert!(matches!(err, DomainError::ResourceNotFound { .. }));
        assert!(msg.soft_delete(author, now).is_err());
    }
}
