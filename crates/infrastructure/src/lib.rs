//! 基础设施层实现。
//!
//! 提供持久化与文件服务适配器，实现应用层定义的接口。

pub mod builder;
pub mod file_storage;
pub mod memory;
pub mod seed;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use file_storage::LocalFileStorage;
pub use memory::InMemoryChatRepository;
pub use seed::{SeedConversation, SeedData};
