//! 领域实体定义
//!
//! 包含持久化消息、已上传文件以及线上协议帧。

pub mod file_upload;
pub mod message;
pub mod websocket;

// 重新导出核心实体
pub use file_upload::FileUpload;
pub use message::{ChatMessage, NewMessage};
pub use websocket::{InboundFrame, MessageKind, OutboundFrame, UnknownKind};
