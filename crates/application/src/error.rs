use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("connection registry is no longer running")]
    RegistryClosed,
}

/// 协议层拒绝，`Display` 文本即回给客户端的 `error` 字段
///
/// 只发给发起的连接，不产生任何状态变化或广播。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Unknown message type")]
    UnknownKind,
    #[error("Message must have content or file")]
    EmptyMessage,
    #[error("message_id required")]
    MissingMessageId,
    #[error("content required")]
    MissingContent,
    #[error("Failed to save message")]
    SaveFailed,
    // 不区分“不存在”与“不是作者”
    #[error("Failed to edit message")]
    EditFailed,
    #[error("Failed to delete message")]
    DeleteFailed,
}
