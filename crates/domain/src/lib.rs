//! 实时聊天核心领域模型
//!
//! 包含标识符、持久化消息实体、送达回执以及 WebSocket 协议帧定义。

pub mod entities;
pub mod errors;
pub mod message_delivery;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use message_delivery::*;
pub use value_objects::*;
