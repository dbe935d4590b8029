//! 应用层实现。
//!
//! 连接注册表（Hub）、协议分发器，以及对持久化与文件存储的抽象。
//! 这里只依赖领域模型，不感知具体的 WebSocket 实现或存储后端。

pub mod best_effort;
pub mod clock;
pub mod connection;
pub mod error;
pub mod file_storage;
pub mod handler;
pub mod hub;
pub mod repository;

pub use best_effort::BestEffort;
pub use clock::{Clock, SystemClock};
pub use connection::{Connection, OutboundReceiver, PushError, SerializedFrame};
pub use error::{ApplicationError, ProtocolError};
pub use file_storage::FileStorage;
pub use handler::{MessageHandler, MessageHandlerDependencies};
pub use hub::{FanOut, Hub, Registrar};
pub use repository::ChatRepository;
