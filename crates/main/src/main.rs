//! 主应用程序入口
//!
//! 加载配置，连接 PostgreSQL / Redis，启动事件分发、在线清扫与 Axum Web 服务。

use std::sync::Arc;
use std::time::Duration;

use application::{spawn_sweeper, ChatBackend, ResubscribePolicy, TokenAuthority};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, HeartbeatSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitized(), "配置已加载");

    let infrastructure = Infrastructure::connect(&config).await?;
    let backend = ChatBackend::new(infrastructure.backend_dependencies(), config.history.clone());

    let dispatchers = backend
        .start_dispatch(ResubscribePolicy::from(&config.redis))
        .await?;
    tracing::info!(count = dispatchers.len(), "事件分发任务已启动");
    let sweeper = spawn_sweeper(
        backend.sessions.clone(),
        Duration::from_secs(config.presence.sweep_interval_seconds),
    );

    let tokens = Arc::new(TokenAuthority::new(&config.jwt));
    let state = AppState::new(
        backend,
        tokens,
        HeartbeatSettings::from(&config.presence),
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        instance_id = %infrastructure.instance_id,
        "聊天室服务器启动在 http://{address}"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    for task in dispatchers {
        task.abort();
    }
    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始关闭");
}
