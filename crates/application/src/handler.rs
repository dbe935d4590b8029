//! 协议分发器
//!
//! 把入站帧按类型映射为：校验 -> 持久化 -> 出站帧。
//! 同一连接的帧在其读任务中串行处理；不同连接并发处理。
//!
//! 发送方的确认与对其他成员的广播是两次独立的发送，二者之间没有顺序保证，
//! 只保证同一出站缓冲内的先进先出。

use std::sync::Arc;

use domain::{
    format_timestamp, ChatMessage, ConversationId, InboundFrame, MessageId, MessageKind,
    NewMessage, OutboundFrame, UserId,
};

use crate::best_effort::BestEffort;
use crate::connection::Connection;
use crate::error::ProtocolError;
use crate::hub::Hub;
use crate::{ChatRepository, FileStorage};

pub struct MessageHandlerDependencies {
    pub hub: Hub,
    pub repository: Arc<dyn ChatRepository>,
    pub files: Arc<dyn FileStorage>,
}

#[derive(Clone)]
pub struct MessageHandler {
    hub: Hub,
    repository: Arc<dyn ChatRepository>,
    side_effects: BestEffort,
}

impl MessageHandler {
    pub fn new(deps: MessageHandlerDependencies) -> Self {
        let side_effects = BestEffort::new(deps.repository.clone(), deps.files);
        Self {
            hub: deps.hub,
            repository: deps.repository,
            side_effects,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// 处理一帧原始数据；任何拒绝都只以 `error` 帧回复给发起的连接
    pub async fn handle(&self, connection: &Arc<Connection>, data: &str) {
        if let Err(rejection) = self.dispatch(connection, data).await {
            tracing::debug!(
                connection_id = %connection.id(),
                reason = %rejection,
                "frame rejected"
            );
            self.reply(connection, OutboundFrame::error(rejection.to_string()))
                .await;
        }
    }

    async fn dispatch(&self, connection: &Arc<Connection>, data: &str) -> Result<(), ProtocolError> {
        let frame = InboundFrame::decode(data).map_err(|err| {
            tracing::debug!(error = %err, "failed to decode inbound frame");
            ProtocolError::InvalidFormat
        })?;
        let kind = frame
            .message_kind()
            .map_err(|_| ProtocolError::UnknownKind)?;

        tracing::debug!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            kind = %kind,
            "dispatching frame"
        );

        match kind {
            MessageKind::Text | MessageKind::File => self.send_message(connection, kind, frame).await,
            MessageKind::Edit => self.edit_message(connection, frame).await,
            MessageKind::Delete => self.delete_message(connection, frame).await,
            MessageKind::Read => self.read_message(connection, frame).await,
            MessageKind::Typing | MessageKind::StopTyping => {
                self.typing(connection, kind).await;
                Ok(())
            }
            // 这些类型只由服务器发出
            MessageKind::Ack | MessageKind::Delivered | MessageKind::Error => {
                Err(ProtocolError::UnknownKind)
            }
        }
    }

    async fn send_message(
        &self,
        connection: &Arc<Connection>,
        kind: MessageKind,
        frame: InboundFrame,
    ) -> Result<(), ProtocolError> {
        let content = frame.non_empty_content().map(str::to_string);
        if content.is_none() && frame.file_id.is_none() {
            return Err(ProtocolError::EmptyMessage);
        }

        let conversation_id = connection.conversation_id();
        let sender_id = connection.user_id();

        // 会话与发送者都取自连接，忽略帧内的 conversation_id
        let saved = self
            .repository
            .create_message(NewMessage {
                conversation_id,
                sender_id,
                content,
                file_id: frame.file_id,
                reply_to_id: frame.reply_to_id,
            })
            .await
            .map_err(|err| {
                tracing::error!(
                    error = %err,
                    user_id = %sender_id,
                    conversation_id = %conversation_id,
                    "failed to save message"
                );
                ProtocolError::SaveFailed
            })?;

        self.side_effects.touch_conversation(conversation_id).await;

        let file_url = match saved.file_id {
            Some(file_id) => self.side_effects.resolve_file_url(file_id).await,
            None => None,
        };
        let created_at = format_timestamp(saved.created_at);

        self.reply(
            connection,
            OutboundFrame {
                created_at: Some(created_at.clone()),
                ..OutboundFrame::ack(saved.id)
            },
        )
        .await;

        let outgoing = OutboundFrame {
            message_id: Some(saved.id),
            conversation_id: Some(saved.conversation_id),
            sender_id: Some(saved.sender_id),
            content: saved.content.clone(),
            file_id: saved.file_id,
            file_url,
            reply_to_id: saved.reply_to_id,
            created_at: Some(created_at),
            ..OutboundFrame::of(kind)
        };
        self.hub
            .broadcast_to_conversation(conversation_id, sender_id, &outgoing)
            .await;

        self.mark_delivered_for_online_members(&saved).await;
        Ok(())
    }

    async fn edit_message(
        &self,
        connection: &Arc<Connection>,
        frame: InboundFrame,
    ) -> Result<(), ProtocolError> {
        let message_id = frame.message_id.ok_or(ProtocolError::MissingMessageId)?;
        let content = frame
            .non_empty_content()
            .ok_or(ProtocolError::MissingContent)?
            .to_string();

        let edited = self
            .repository
            .edit_message(message_id, connection.user_id(), content)
            .await
            .map_err(|err| {
                tracing::debug!(
                    error = %err,
                    message_id = %message_id,
                    user_id = %connection.user_id(),
                    "edit rejected"
                );
                ProtocolError::EditFailed
            })?;

        self.reply(connection, OutboundFrame::ack(edited.id)).await;

        let outgoing = OutboundFrame {
            message_id: Some(edited.id),
            conversation_id: Some(edited.conversation_id),
            sender_id: Some(edited.sender_id),
            content: edited.content,
            is_edited: true,
            created_at: Some(format_timestamp(edited.updated_at)),
            ..OutboundFrame::of(MessageKind::Edit)
        };
        self.hub
            .broadcast_to_conversation(connection.conversation_id(), connection.user_id(), &outgoing)
            .await;
        Ok(())
    }

    async fn delete_message(
        &self,
        connection: &Arc<Connection>,
        frame: InboundFrame,
    ) -> Result<(), ProtocolError> {
        let message_id = frame.message_id.ok_or(ProtocolError::MissingMessageId)?;

        self.repository
            .soft_delete_message(message_id, connection.user_id())
            .await
            .map_err(|err| {
                tracing::debug!(
                    error = %err,
                    message_id = %message_id,
                    user_id = %connection.user_id(),
                    "delete rejected"
                );
                ProtocolError::DeleteFailed
            })?;

        self.reply(connection, OutboundFrame::ack(message_id)).await;

        let outgoing = OutboundFrame {
            message_id: Some(message_id),
            conversation_id: Some(connection.conversation_id()),
            ..OutboundFrame::of(MessageKind::Delete)
        };
        self.hub
            .broadcast_to_conversation(connection.conversation_id(), connection.user_id(), &outgoing)
            .await;
        Ok(())
    }

    /// 已读：记录失败不影响广播，也不回确认
    async fn read_message(
        &self,
        connection: &Arc<Connection>,
        frame: InboundFrame,
    ) -> Result<(), ProtocolError> {
        let message_id = frame.message_id.ok_or(ProtocolError::MissingMessageId)?;
        let conversation_id = connection.conversation_id();
        let user_id = connection.user_id();

        self.side_effects.mark_read(message_id, user_id).await;
        self.side_effects
            .advance_read_cursor(conversation_id, user_id)
            .await;

        let outgoing = OutboundFrame {
            message_id: Some(message_id),
            conversation_id: Some(conversation_id),
            sender_id: Some(user_id),
            ..OutboundFrame::of(MessageKind::Read)
        };
        self.hub
            .broadcast_to_conversation(conversation_id, user_id, &outgoing)
            .await;
        Ok(())
    }

    async fn typing(&self, connection: &Arc<Connection>, kind: MessageKind) {
        let outgoing = OutboundFrame {
            conversation_id: Some(connection.conversation_id()),
            sender_id: Some(connection.user_id()),
            ..OutboundFrame::of(kind)
        };
        self.hub
            .broadcast_to_conversation(connection.conversation_id(), connection.user_id(), &outgoing)
            .await;
    }

    /// 为当前在线的其他成员写送达回执，并逐个通知发送方
    ///
    /// 遍历全部成员再逐个检查在线状态，每条消息的开销与成员数成正比。
    async fn mark_delivered_for_online_members(&self, message: &ChatMessage) {
        let conversation_id: ConversationId = message.conversation_id;
        let sender_id: UserId = message.sender_id;

        let members = match self.repository.list_member_ids(conversation_id).await {
            Ok(members) => members,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    conversation_id = %conversation_id,
                    "failed to list conversation members"
                );
                return;
            }
        };

        for member_id in members {
            if member_id == sender_id || !self.hub.is_online(conversation_id, member_id).await {
                continue;
            }
            self.side_effects.record_delivery(message.id, member_id).await;
            self.hub
                .send_to_user(conversation_id, sender_id, &delivered(message.id, member_id))
                .await;
        }
    }

    async fn reply(&self, connection: &Arc<Connection>, frame: OutboundFrame) {
        self.hub.send_to_connection(connection, &frame).await;
    }
}

/// 送达回执帧：`sender_id` 填写的是接收方
fn delivered(message_id: MessageId, recipient_id: UserId) -> OutboundFrame {
    OutboundFrame {
        message_id: Some(message_id),
        sender_id: Some(recipient_id),
        ..OutboundFrame::of(MessageKind::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundReceiver;
    use crate::file_storage::MockFileStorage;
    use crate::repository::MockChatRepository;
    use chrono::Utc;
    use domain::{RepositoryError, Timestamp};
    use serde_json::Value;

    struct Fixture {
        handler: MessageHandler,
        conversation: ConversationId,
    }

    fn fixture(repository: MockChatRepository) -> Fixture {
        let mut files = MockFileStorage::new();
        files
            .expect_url()
            .returning(|path| format!("http://files/{path}"));
        Fixture {
            handler: MessageHandler::new(MessageHandlerDependencies {
                hub: Hub::new(),
                repository: Arc::new(repository),
                files: Arc::new(files),
            }),
            conversation: ConversationId::generate(),
        }
    }

    async fn connect(fx: &Fixture, user: UserId) -> (Arc<Connection>, OutboundReceiver) {
        let (conn, rx) = Connection::new(user, fx.conversation, 16);
        fx.handler.hub().admit(conn.clone()).await;
        (conn, rx)
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            frames.push(serde_json::from_str(&raw).unwrap());
        }
        frames
    }

    fn saved(new: NewMessage, at: Timestamp) -> ChatMessage {
        ChatMessage::create(new, at).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_json_replies_error_only_to_sender() {
        let mut repository = MockChatRepository::new();
        repository.expect_create_message().never();
        let fx = fixture(repository);
        let (sender, mut sender_rx) = connect(&fx, UserId::generate()).await;
        let (_other, mut other_rx) = connect(&fx, UserId::generate()).await;

        fx.handler.handle(&sender, "{not json").await;

        let frames = drain(&mut sender_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["error"], "Invalid message format");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_server_only_kinds_are_rejected() {
        let fx = fixture(MockChatRepository::new());
        let (sender, mut rx) = connect(&fx, UserId::generate()).await;

        fx.handler.handle(&sender, r#"{"type":"reaction"}"#).await;
        fx.handler.handle(&sender, r#"{"type":"ack"}"#).await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        for frame in frames {
            assert_eq!(frame["error"], "Unknown message type");
        }
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected_before_persistence() {
        let mut repository = MockChatRepository::new();
        repository.expect_create_message().never();
        let fx = fixture(repository);
        let (sender, mut rx) = connect(&fx, UserId::generate()).await;

        fx.handler.handle(&sender, r#"{"type":"text","content":""}"#).await;

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["error"], "Message must have content or file");
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_broadcast_and_timestamp() {
        let mut repository = MockChatRepository::new();
        repository
            .expect_create_message()
            .returning(|_| Err(RepositoryError::storage("db down")));
        repository.expect_touch_conversation().never();
        repository.expect_list_member_ids().never();
        let fx = fixture(repository);
        let (sender, mut sender_rx) = connect(&fx, UserId::generate()).await;
        let (_other, mut other_rx) = connect(&fx, UserId::generate()).await;

        fx.handler
            .handle(&sender, r#"{"type":"text","content":"hi"}"#)
            .await;

        let frames = drain(&mut sender_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"], "Failed to save message");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_uses_connection_binding_and_survives_side_effect_failures() {
        let sender_id = UserId::generate();
        let recipient_id = UserId::generate();
        let mut repository = MockChatRepository::new();
        repository
            .expect_create_message()
            .returning(|new| Ok(saved(new, Utc::now())));
        repository
            .expect_touch_conversation()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("db down")));
        repository
            .expect_find_file()
            .returning(|_| Err(RepositoryError::NotFound));
        repository
            .expect_list_member_ids()
            .returning(move |_| Ok(vec![sender_id, recipient_id]));
        repository
            .expect_upsert_delivery_receipt()
            .times(1)
            .returning(|_, _| Err(RepositoryError::storage("db down")));
        let fx = fixture(repository);
        let (sender, mut sender_rx) = connect(&fx, sender_id).await;
        let (_recipient, mut recipient_rx) = connect(&fx, recipient_id).await;

        // 帧里的 conversation_id 与连接绑定不同，应被忽略
        let foreign = ConversationId::generate();
        let file = domain::FileId::generate();
        let raw = format!(
            r#"{{"type":"file","conversation_id":"{foreign}","file_id":"{file}"}}"#
        );
        fx.handler.handle(&sender, &raw).await;

        let sender_frames = drain(&mut sender_rx);
        assert_eq!(sender_frames[0]["type"], "ack");
        assert!(sender_frames[0]["created_at"].is_string());
        assert_eq!(sender_frames[1]["type"], "delivered");
        assert_eq!(sender_frames[1]["sender_id"], recipient_id.to_string());

        let recipient_frames = drain(&mut recipient_rx);
        assert_eq!(recipient_frames.len(), 1);
        let broadcast = &recipient_frames[0];
        assert_eq!(broadcast["type"], "file");
        assert_eq!(broadcast["conversation_id"], fx.conversation.to_string());
        assert_eq!(broadcast["file_id"], file.to_string());
        // 解析失败时省略 URL，但仍然发送
        assert!(broadcast.get("file_url").is_none());
        assert!(broadcast.get("content").is_none());
    }

    #[tokio::test]
    async fn test_edit_by_non_author_is_rejected() {
        let mut repository = MockChatRepository::new();
        repository
            .expect_edit_message()
            .returning(|_, _, _| Err(RepositoryError::Forbidden));
        let fx = fixture(repository);
        let (editor, mut editor_rx) = connect(&fx, UserId::generate()).await;
        let (_other, mut other_rx) = connect(&fx, UserId::generate()).await;

        let raw = format!(
            r#"{{"type":"edit","message_id":"{}","content":"x"}}"#,
            MessageId::generate()
        );
        fx.handler.handle(&editor, &raw).await;

        let frames = drain(&mut editor_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"], "Failed to edit message");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn test_edit_and_delete_validate_required_fields() {
        let mut repository = MockChatRepository::new();
        repository.expect_edit_message().never();
        repository.expect_soft_delete_message().never();
        let fx = fixture(repository);
        let (conn, mut rx) = connect(&fx, UserId::generate()).await;

        fx.handler.handle(&conn, r#"{"type":"edit","content":"x"}"#).await;
        let raw = format!(r#"{{"type":"edit","message_id":"{}"}}"#, MessageId::generate());
        fx.handler.handle(&conn, &raw).await;
        fx.handler.handle(&conn, r#"{"type":"delete"}"#).await;
        fx.handler.handle(&conn, r#"{"type":"read"}"#).await;

        let errors: Vec<_> = drain(&mut rx)
            .into_iter()
            .map(|frame| frame["error"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            errors,
            vec![
                "message_id required",
                "content required",
                "message_id required",
                "message_id required"
            ]
        );
    }

    #[tokio::test]
    async fn test_read_broadcasts_even_when_bookkeeping_fails() {
        let mut repository = MockChatRepository::new();
        repository
            .expect_mark_message_read()
            .returning(|_, _| Err(RepositoryError::storage("db down")));
        repository
            .expect_update_last_read()
            .returning(|_, _| Err(RepositoryError::storage("db down")));
        let fx = fixture(repository);
        let reader_id = UserId::generate();
        let (reader, mut reader_rx) = connect(&fx, reader_id).await;
        let (_other, mut other_rx) = connect(&fx, UserId::generate()).await;

        let message_id = MessageId::generate();
        let raw = format!(r#"{{"type":"read","message_id":"{message_id}"}}"#);
        fx.handler.handle(&reader, &raw).await;

        assert!(drain(&mut reader_rx).is_empty(), "read is never acked");
        let frames = drain(&mut other_rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "read");
        assert_eq!(frames[0]["message_id"], message_id.to_string());
        assert_eq!(frames[0]["sender_id"], reader_id.to_string());
    }

    #[tokio::test]
    async fn test_typing_is_ephemeral() {
        let mut repository = MockChatRepository::new();
        repository.expect_create_message().never();
        let fx = fixture(repository);
        let typist_id = UserId::generate();
        let (typist, mut typist_rx) = connect(&fx, typist_id).await;
        let (_other, mut other_rx) = connect(&fx, UserId::generate()).await;

        fx.handler.handle(&typist, r#"{"type":"typing"}"#).await;
        fx.handler.handle(&typist, r#"{"type":"stop_typing"}"#).await;

        assert!(drain(&mut typist_rx).is_empty());
        let kinds: Vec<_> = drain(&mut other_rx)
            .into_iter()
            .map(|frame| frame["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["typing", "stop_typing"]);
    }
}
