//! 主应用程序入口
//!
//! 加载配置，装配仓储、连接注册表与分发器，启动 Axum 服务。

use std::sync::Arc;

use application::{Hub, MessageHandler, MessageHandlerDependencies};
use config::AppConfig;
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = ?config, "配置已加载");

    let infrastructure = Infrastructure::build(InfrastructureConfig {
        files_base_url: config.files.base_url.clone(),
        seed_file: config.storage.seed_file.clone(),
    })
    .await?;

    let hub = Hub::new();
    let (registrar, registrar_loop) = hub.spawn_registrar();
    let handler = MessageHandler::new(MessageHandlerDependencies {
        hub,
        repository: infrastructure.repository_trait(),
        files: infrastructure.files_trait(),
    });
    let jwt_service = Arc::new(JwtService::new(&config.jwt));

    let state = AppState::new(
        handler,
        registrar,
        infrastructure.repository_trait(),
        jwt_service,
        config.hub.outbound_buffer,
    );

    let app = router(state, &config.server.cors_origins);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registrar_loop.abort();
    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
    }
}
