use std::sync::Arc;

use application::{ChatRepository, Hub, MessageHandler, Registrar};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub handler: MessageHandler,
    pub registrar: Registrar,
    pub repository: Arc<dyn ChatRepository>,
    pub jwt_service: Arc<JwtService>,
    /// 每个连接出站缓冲的容量
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(
        handler: MessageHandler,
        registrar: Registrar,
        repository: Arc<dyn ChatRepository>,
        jwt_service: Arc<JwtService>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            handler,
            registrar,
            repository,
            jwt_service,
            outbound_buffer,
        }
    }

    pub fn hub(&self) -> &Hub {
        self.handler.hub()
    }
}
