//! DEM Controller - 模块集群控制面
//!
//! 负责模块容器编排、健康检查、路由注册，以及把黑白名单元素分发到 egress 模块

pub mod error;
pub mod middleware;
pub mod infra;
pub mod domain;
pub mod config;
pub mod persistence;
pub mod state;
pub mod api;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::EnvConfig;
use crate::state::{get_shutdown_token, trigger_shutdown, AppState};

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖监听端口
    pub port_override: Option<u16>,
}

/// 初始化并运行控制器，直到收到 Ctrl+C / SIGTERM
pub async fn init_and_run_controller(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    let port = config.port;
    let snapshot_interval = config.timings.snapshot_interval;

    let state = AppState::initialize(config).await?;
    let shutdown = get_shutdown_token();

    // 启动时加载已持久化的模块路由，完成后生成内部 token
    let registrar = state.registrar.clone();
    tokio::spawn(async move {
        if let Err(e) = registrar.load_from_store().await {
            error!(error = %e, "Failed to load module routes from store");
        }
    });

    let flusher = services::snapshot::spawn_flusher(
        state.store.clone(),
        snapshot_interval,
        shutdown.clone(),
    );

    let app = api::router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, version = crate::config::constants::VERSION, "DEM controller listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, flushing store");
    trigger_shutdown();
    if let Err(e) = flusher.await {
        error!(error = %e, "Snapshot flusher task failed");
    }

    Ok(())
}

/// 等待 Ctrl+C、SIGTERM 或全局 shutdown
async fn shutdown_signal() {
    let shutdown = get_shutdown_token();

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
        _ = shutdown.cancelled() => info!("Shutdown requested"),
    }
}
