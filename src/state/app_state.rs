//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{EnvConfig, InternalToken};
use crate::domain::ModuleMetadata;
use crate::infra::{ContainerEngine, DockerCli, HttpModuleGateway, ModuleGateway};
use crate::persistence::{MemoryStore, Repositories};
use crate::services::{
    DistributionEngine, HealthMonitor, IngestService, Orchestrator, OrchestratorSettings,
    RouteRegistrar, RouteTable,
};

use super::event_hub::EventHub;

/// 全局 shutdown token，用于优雅关闭所有后台任务
static GLOBAL_SHUTDOWN: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();

/// 获取全局 shutdown token
pub fn get_shutdown_token() -> CancellationToken {
    GLOBAL_SHUTDOWN
        .get_or_init(CancellationToken::new)
        .clone()
}

/// 触发全局 shutdown
pub fn trigger_shutdown() {
    if let Some(token) = GLOBAL_SHUTDOWN.get() {
        token.cancel();
    }
}

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// 运维 API 密钥（用于验证 `/api` 请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,
    /// 内部注册 token
    pub token: Arc<InternalToken>,

    // ========== 存储 ==========
    pub store: Arc<MemoryStore>,
    pub repos: Repositories,

    // ========== 核心服务 ==========
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthMonitor>,
    pub registrar: Arc<RouteRegistrar>,
    pub routes: Arc<RouteTable>,
    pub distribution: Arc<DistributionEngine>,
    pub ingest: IngestService,

    // ========== 通知 ==========
    /// 事件广播中心
    pub events: Arc<EventHub>,

    // ========== 后台任务入口 ==========
    /// 模块注册消息队列（由注册 worker 串行处理）
    pub registrations: mpsc::Sender<ModuleMetadata>,
    /// 反向代理使用的 HTTP 客户端
    pub proxy_client: reqwest::Client,
}

impl AppState {
    /// 按环境配置初始化：打开存储快照、加载内部 token、接入 docker CLI 与模块 HTTP 网关
    pub async fn initialize(config: EnvConfig) -> anyhow::Result<Arc<Self>> {
        tracing::info!(
            port = config.port,
            controller = %config.controller_svc_name,
            host_domain = %config.host_domain,
            data_dir = %config.data_dir.display(),
            image_prefix = %config.docker.image_prefix,
            network = %config.docker.module_network_name,
            "Loaded configuration"
        );

        let store = Arc::new(MemoryStore::open(&config.data_dir).await?);
        let token = Arc::new(InternalToken::load(&config.data_dir).await);
        let engine: Arc<dyn ContainerEngine> = Arc::new(DockerCli::new(config.docker.clone()));
        let gateway: Arc<dyn ModuleGateway> = Arc::new(HttpModuleGateway::new(&config.timings)?);

        Ok(Self::assemble(
            config,
            store,
            token,
            engine,
            gateway,
            get_shutdown_token(),
        )?)
    }

    /// 用给定的存储、引擎与网关组装所有服务，并启动注册 worker
    pub fn assemble(
        config: EnvConfig,
        store: Arc<MemoryStore>,
        token: Arc<InternalToken>,
        engine: Arc<dyn ContainerEngine>,
        gateway: Arc<dyn ModuleGateway>,
        shutdown: CancellationToken,
    ) -> reqwest::Result<Arc<Self>> {
        let repos = Repositories::from_memory(store.clone());
        let events = Arc::new(EventHub::new());

        let orchestrator = Arc::new(Orchestrator::new(
            engine,
            repos.modules.clone(),
            token.clone(),
            OrchestratorSettings::from_config(&config),
        ));
        let health = Arc::new(HealthMonitor::new(gateway.clone(), repos.clone()));
        let routes = Arc::new(RouteTable::new());
        let registrar = Arc::new(RouteRegistrar::new(
            health.clone(),
            repos.modules.clone(),
            routes.clone(),
            token.clone(),
        ));
        let distribution = Arc::new(DistributionEngine::new(
            repos.clone(),
            gateway,
            health.clone(),
            config.timings.retry_delay,
        ));
        let ingest = IngestService::new(repos.clone(), events.clone(), distribution.clone());

        let (registrations, _worker) = registrar.clone().spawn_worker(shutdown);

        let proxy_client = reqwest::Client::builder()
            .timeout(config.timings.push_timeout)
            .build()?;

        Ok(Arc::new(Self {
            api_key: config.admin_api_key.clone(),
            started_at: Utc::now(),
            token,

            store,
            repos,

            orchestrator,
            health,
            registrar,
            routes,
            distribution,
            ingest,

            events,

            registrations,
            proxy_client,

            config,
        }))
    }
}
