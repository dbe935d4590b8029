//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 准入关口与连接读写任务，以及健康检查。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::{router, MAX_MESSAGE_SIZE};
pub use state::AppState;
