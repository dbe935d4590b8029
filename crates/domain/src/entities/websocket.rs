//! WebSocket 协议帧
//!
//! 帧是一个 `type` 标签加上一组稀疏的可选字段，接收方需要把当前 `type`
//! 不要求的字段都视为可能缺失。协议没有版本号、序号或重传能力，
//! 每个连接上的投递语义是至多一次。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, FileId, MessageId, UserId};

/// 消息类型（有限集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// 文本消息（客户端发送）
    Text,
    /// 文件消息（客户端发送）
    File,
    Edit,
    Delete,
    Read,
    Typing,
    StopTyping,
    /// 服务器确认持久化，只发给发送方
    Ack,
    /// 送达回执，每个接收者一条，发给原发送方
    Delivered,
    /// 错误，只发给发起的连接
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
            MessageKind::Edit => "edit",
            MessageKind::Delete => "delete",
            MessageKind::Read => "read",
            MessageKind::Typing => "typing",
            MessageKind::StopTyping => "stop_typing",
            MessageKind::Ack => "ack",
            MessageKind::Delivered => "delivered",
            MessageKind::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知的消息类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message type: {0:?}")]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "text" => MessageKind::Text,
            "file" => MessageKind::File,
            "edit" => MessageKind::Edit,
            "delete" => MessageKind::Delete,
            "read" => MessageKind::Read,
            "typing" => MessageKind::Typing,
            "stop_typing" => MessageKind::StopTyping,
            "ack" => MessageKind::Ack,
            "delivered" => MessageKind::Delivered,
            "error" => MessageKind::Error,
            other => return Err(UnknownKind(other.to_string())),
        };
        Ok(kind)
    }
}

/// 客户端发来的帧
///
/// `type` 保留为原始字符串：未知类型不算格式错误，由分发器单独回复。
/// `conversation_id` 仅供参考，权威的会话绑定来自连接本身。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// 编辑/删除/已读操作的目标消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

impl InboundFrame {
    /// 解码一帧
    pub fn decode(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    pub fn message_kind(&self) -> Result<MessageKind, UnknownKind> {
        self.kind.parse()
    }

    /// 非空内容；空字符串视为缺失
    pub fn non_empty_content(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

/// 服务器发出的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    /// 固定格式时间戳，见 [`crate::format_timestamp`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundFrame {
    /// 只带类型标签的空帧，其余字段用结构体更新语法补充
    pub fn of(kind: MessageKind) -> Self {
        Self {
            kind,
            message_id: None,
            conversation_id: None,
            sender_id: None,
            content: None,
            file_id: None,
            file_url: None,
            reply_to_id: None,
            is_edited: false,
            created_at: None,
            error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            error: Some(text.into()),
            ..Self::of(MessageKind::Error)
        }
    }

    pub fn ack(message_id: MessageId) -> Self {
        Self {
            message_id: Some(message_id),
            ..Self::of(MessageKind::Ack)
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
