//! 模块路由注册
//!
//! 健康的模块声明的每个端点都会被安装为一条反向代理路由：
//! 入站路径 = 模块路由前缀 + 端点路径，目标 = `http://{service}:{port}{endpoint}`。
//! secure 端点挂在认证路由 `/api` 下，其余挂在 `/ingress` 下。
//!
//! 路由在进程生命周期内只增不减，同一路径以第一次安装为准。
//! 已安装的路由按模块 id 记录，便于以后按模块比对、撤销。

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::InternalToken;
use crate::domain::ModuleMetadata;
use crate::error::ControllerResult;
use crate::persistence::ModuleStore;

use super::health::HealthMonitor;

/// 注册队列容量
const REGISTRATION_QUEUE_CAPACITY: usize = 64;

/// 路由挂载的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    /// `/api`，需要认证
    Api,
    /// `/ingress`，无需认证
    Ingress,
}

/// 一条已安装的路由
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledRoute {
    pub router: RouterKind,
    pub path: String,
    pub target: String,
}

#[derive(Default)]
struct RouteTableInner {
    /// (router, 入站路径) -> 目标 URL
    routes: HashMap<(RouterKind, String), String>,
    /// 模块 id -> 该模块安装的路由
    by_module: BTreeMap<i64, Vec<InstalledRoute>>,
}

/// 路由表
#[derive(Default)]
pub struct RouteTable {
    inner: RwLock<RouteTableInner>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装路由；路径已存在时保持原目标，返回 false
    pub async fn install(&self, module_id: i64, route: InstalledRoute) -> bool {
        let mut inner = self.inner.write().await;
        let key = (route.router, route.path.clone());
        if inner.routes.contains_key(&key) {
            return false;
        }
        inner.routes.insert(key, route.target.clone());
        inner.by_module.entry(module_id).or_default().push(route);
        true
    }

    /// 精确匹配入站路径
    pub async fn resolve(&self, router: RouterKind, path: &str) -> Option<String> {
        let inner = self.inner.read().await;
        inner.routes.get(&(router, path.to_string())).cloned()
    }

    /// 模块 id -> 已安装路由
    pub async fn registry(&self) -> BTreeMap<i64, Vec<InstalledRoute>> {
        self.inner.read().await.by_module.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.routes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 路由注册器
pub struct RouteRegistrar {
    health: Arc<HealthMonitor>,
    modules: Arc<dyn ModuleStore>,
    table: Arc<RouteTable>,
    token: Arc<InternalToken>,
}

impl RouteRegistrar {
    pub fn new(
        health: Arc<HealthMonitor>,
        modules: Arc<dyn ModuleStore>,
        table: Arc<RouteTable>,
        token: Arc<InternalToken>,
    ) -> Self {
        Self {
            health,
            modules,
            table,
            token,
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    /// 处理模块的自注册消息：持久化后安装路由
    pub async fn register(&self, mut metadata: ModuleMetadata) -> ControllerResult<usize> {
        info!(
            module = %metadata.module_service_name,
            display_name = %metadata.module_display_name,
            "Adding new module"
        );
        metadata.id = self.modules.upsert(&metadata).await?;
        Ok(self.add_module_routes(&metadata).await)
    }

    /// 为当前健康（200）的模块安装所有声明的端点，返回新安装的数量
    pub async fn add_module_routes(&self, module: &ModuleMetadata) -> usize {
        if !self
            .health
            .is_up(&module.module_service_name, &module.internal_port)
            .await
        {
            debug!(module = %module.module_service_name, "Module is not up, routes not installed");
            return 0;
        }

        let mut installed = 0;
        for endpoint in &module.module_endpoints {
            let router = if endpoint.secure {
                RouterKind::Api
            } else {
                RouterKind::Ingress
            };
            let route = InstalledRoute {
                router,
                path: format!("{}{}", module.inbound_route, endpoint.endpoint),
                target: format!("{}{}", module.base_url(), endpoint.endpoint),
            };

            if self.table.install(module.id, route.clone()).await {
                info!(
                    module = %module.module_service_name,
                    router = ?route.router,
                    path = %route.path,
                    target = %route.target,
                    "Installed module route"
                );
                installed += 1;
            } else {
                debug!(path = %route.path, "Route already installed");
            }
        }
        installed
    }

    /// 启动时从存储加载所有模块并安装路由，完成后确保内部 token 存在
    pub async fn load_from_store(&self) -> ControllerResult<usize> {
        info!("Adding module routes from persistence");
        let modules = self.modules.all().await?;

        let mut installed = 0;
        for module in &modules {
            installed += self.add_module_routes(module).await;
        }

        if let Err(e) = self.token.ensure().await {
            error!(error = %e, "Failed to persist internal token");
        }

        info!(modules = modules.len(), routes = installed, "Startup route load complete");
        Ok(installed)
    }

    /// 串行处理注册消息的后台任务
    pub fn spawn_worker(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> (mpsc::Sender<ModuleMetadata>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ModuleMetadata>(REGISTRATION_QUEUE_CAPACITY);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(metadata) = msg else { break };
                        let name = metadata.module_service_name.clone();
                        if let Err(e) = self.register(metadata).await {
                            warn!(module = %name, error = %e, "Module registration failed");
                        }
                    }
                }
            }
            debug!("Registration worker stopped");
        });

        (tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ElementType, ModuleEndpoint};
    use crate::persistence::{MemoryStore, Repositories};
    use crate::testing::{egress_module, FakeGateway};

    async fn registrar(
        gateway: Arc<FakeGateway>,
        store: Arc<MemoryStore>,
    ) -> (Arc<RouteRegistrar>, Arc<InternalToken>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let token = Arc::new(InternalToken::load(dir.path()).await);
        let health = Arc::new(HealthMonitor::new(
            gateway,
            Repositories::from_memory(store.clone()),
        ));
        let registrar = Arc::new(RouteRegistrar::new(
            health,
            store,
            Arc::new(RouteTable::new()),
            token.clone(),
        ));
        (registrar, token, dir)
    }

    fn with_endpoints(name: &str) -> ModuleMetadata {
        let mut module = egress_module(name, &[ElementType::Ip]);
        module.module_endpoints = vec![
            ModuleEndpoint {
                secure: true,
                endpoint: "/config".to_string(),
            },
            ModuleEndpoint {
                secure: false,
                endpoint: "/webhook".to_string(),
            },
        ];
        module
    }

    #[tokio::test]
    async fn test_register_installs_routes_for_healthy_module() {
        let (registrar, _, _dir) =
            registrar(Arc::new(FakeGateway::new()), Arc::new(MemoryStore::new())).await;

        let installed = registrar.register(with_endpoints("blocker")).await.unwrap();
        assert_eq!(installed, 2);

        let table = registrar.table();
        assert_eq!(
            table.resolve(RouterKind::Api, "/blocker/config").await.as_deref(),
            Some("http://blocker:8080/config")
        );
        assert_eq!(
            table.resolve(RouterKind::Ingress, "/blocker/webhook").await.as_deref(),
            Some("http://blocker:8080/webhook")
        );
        assert!(table.resolve(RouterKind::Ingress, "/blocker/config").await.is_none());
    }

    #[tokio::test]
    async fn test_module_must_answer_200() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_probe("teapot", Some(418));
        gateway.set_probe("gone", None);
        let (registrar, _, _dir) = registrar(gateway, Arc::new(MemoryStore::new())).await;

        assert_eq!(registrar.register(with_endpoints("teapot")).await.unwrap(), 0);
        assert_eq!(registrar.register(with_endpoints("gone")).await.unwrap(), 0);
        assert!(registrar.table().is_empty().await);
    }

    #[tokio::test]
    async fn test_first_installation_wins() {
        let (registrar, _, _dir) =
            registrar(Arc::new(FakeGateway::new()), Arc::new(MemoryStore::new())).await;

        registrar.register(with_endpoints("blocker")).await.unwrap();
        let mut clash = with_endpoints("other");
        clash.inbound_route = "/blocker".to_string();
        assert_eq!(registrar.register(clash).await.unwrap(), 0);

        assert_eq!(
            registrar
                .table()
                .resolve(RouterKind::Api, "/blocker/config")
                .await
                .as_deref(),
            Some("http://blocker:8080/config")
        );
        assert_eq!(registrar.table().registry().await.len(), 1);
    }

    #[tokio::test]
    async fn test_startup_load_generates_token() {
        let store = Arc::new(MemoryStore::new());
        store.upsert(&with_endpoints("blocker")).await.unwrap();
        let (registrar, token, _dir) = registrar(Arc::new(FakeGateway::new()), store).await;
        assert!(token.get().await.is_none());

        assert_eq!(registrar.load_from_store().await.unwrap(), 2);
        assert!(token.get().await.is_some());
    }

    #[tokio::test]
    async fn test_worker_processes_registrations() {
        let store = Arc::new(MemoryStore::new());
        let (registrar, _, _dir) = registrar(Arc::new(FakeGateway::new()), store.clone()).await;
        let shutdown = CancellationToken::new();

        let (tx, handle) = registrar.clone().spawn_worker(shutdown.clone());
        tx.send(with_endpoints("blocker")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(store.get_by_service_name("blocker").await.unwrap().is_some());
        assert_eq!(registrar.table().len().await, 2);
    }
}
