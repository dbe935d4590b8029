use std::net::SocketAddr;
use std::sync::Arc;

use std::time::Duration;

use application::{ChatRepository, Hub, MessageHandler, MessageHandlerDependencies};
use async_trait::async_trait;
use domain::{
    ChatMessage, ConversationId, FileId, FileUpload, MessageId, NewMessage, RepositoryResult,
    UserId,
};
use infrastructure::{InMemoryChatRepository, LocalFileStorage};
use tokio::net::TcpListener;
use web_api::{router, AppState, JwtConfig, JwtService};

pub const SECRET: &str = "integration-test-secret-with-32-chars!!";

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: Hub,
    pub repository: Arc<InMemoryChatRepository>,
    pub jwt: Arc<JwtService>,
}

impl TestServer {
    pub async fn start(outbound_buffer: usize) -> Self {
        let repository = Arc::new(InMemoryChatRepository::default());
        Self::start_with(outbound_buffer, repository.clone(), repository).await
    }

    /// `backend` 是分发器实际使用的仓储，`repository` 用于测试里准备数据与断言
    pub async fn start_with(
        outbound_buffer: usize,
        repository: Arc<InMemoryChatRepository>,
        backend: Arc<dyn ChatRepository>,
    ) -> Self {
        let hub = Hub::new();
        let (registrar, _registrar_loop) = hub.spawn_registrar();
        let handler = MessageHandler::new(MessageHandlerDependencies {
            hub: hub.clone(),
            repository: backend.clone(),
            files: Arc::new(LocalFileStorage::new("http://files.test")),
        });
        let jwt = Arc::new(JwtService::new(&JwtConfig {
            secret: SECRET.to_string(),
        }));
        let state = AppState::new(
            handler,
            registrar,
            backend,
            jwt.clone(),
            outbound_buffer,
        );

        let app = router(state, &["*".to_string()]);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.ok();
        });

        Self {
            addr,
            hub,
            repository,
            jwt,
        }
    }

    pub fn token(&self, user: UserId) -> String {
        self.jwt
            .generate_token(user, chrono::Duration::minutes(5))
            .expect("token")
    }

    pub fn ws_url(&self, conversation: ConversationId) -> String {
        format!("ws://{}/v1/ws?conversation_id={}", self.addr, conversation)
    }
}

/// 创建消息成功后再停顿一段时间的仓储，用来拉长分发过程
pub struct SlowCreateRepository {
    inner: Arc<InMemoryChatRepository>,
    delay: Duration,
}

impl SlowCreateRepository {
    pub fn new(inner: Arc<InMemoryChatRepository>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ChatRepository for SlowCreateRepository {
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<ChatMessage> {
        let saved = self.inner.create_message(message).await?;
        tokio::time::sleep(self.delay).await;
        Ok(saved)
    }

    async fn edit_message(
        &self,
        message_id: MessageId,
        editor_id: UserId,
        content: String,
    ) -> RepositoryResult<ChatMessage> {
        self.inner.edit_message(message_id, editor_id, content).await
    }

    async fn soft_delete_message(
        &self,
        message_id: MessageId,
        actor_id: UserId,
    ) -> RepositoryResult<()> {
        self.inner.soft_delete_message(message_id, actor_id).await
    }

    async fn touch_conversation(&self, conversation_id: ConversationId) -> RepositoryResult<()> {
        self.inner.touch_conversation(conversation_id).await
    }

    async fn list_member_ids(
        &self,
        conversation_id: ConversationId,
    ) -> RepositoryResult<Vec<UserId>> {
        self.inner.list_member_ids(conversation_id).await
    }

    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<bool> {
        self.inner.is_member(conversation_id, user_id).await
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        self.inner.mark_message_read(message_id, user_id).await
    }

    async fn update_last_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        self.inner.update_last_read(conversation_id, user_id).await
    }

    async fn upsert_delivery_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<()> {
        self.inner.upsert_delivery_receipt(message_id, user_id).await
    }

    async fn find_file(&self, file_id: FileId) -> RepositoryResult<FileUpload> {
        self.inner.find_file(file_id).await
    }
}
