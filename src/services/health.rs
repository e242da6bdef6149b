//! 模块健康检查
//!
//! 健康状态只随 [`ModuleReport`] 返回，不写回模块元数据。
//! 每次操作都重新探测，不跨调用缓存结论。

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::module::ModuleReport;
use crate::domain::{HealthStatus, ModuleHealth, ModuleMetadata, ModuleType};
use crate::infra::ModuleGateway;
use crate::persistence::Repositories;

/// 健康监控
pub struct HealthMonitor {
    gateway: Arc<dyn ModuleGateway>,
    repos: Repositories,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<dyn ModuleGateway>, repos: Repositories) -> Self {
        Self {
            gateway,
            repos,
        }
    }

    /// 单次探测，只有 200 才算 up
    pub async fn is_up(&self, service: &str, port: &str) -> bool {
        match self.gateway.probe(service, port).await {
            Ok(code) => code == 200,
            Err(e) => {
                debug!(module = %service, error = %e, "Module is not reachable");
                false
            }
        }
    }

    /// 并发检查所有给定模块（每个模块一个任务，无并发上限）
    pub async fn batch_health_check(
        self: &Arc<Self>,
        modules: Vec<ModuleMetadata>,
    ) -> Vec<ModuleReport> {
        let tasks = modules.into_iter().map(|module| {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let health = this.check_module(&module).await;
                ModuleReport {
                    metadata: module,
                    module_health: health,
                }
            })
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(error = %e, "Health check task failed");
                    None
                }
            })
            .collect()
    }

    /// 检查单个模块
    pub async fn check_module(&self, module: &ModuleMetadata) -> ModuleHealth {
        let mut health = ModuleHealth {
            module_name: module.module_display_name.clone(),
            ..Default::default()
        };

        match self
            .gateway
            .probe(&module.module_service_name, &module.internal_port)
            .await
        {
            Ok(code) => {
                health.status_code = code;
                health.status = HealthStatus::from_status_code(code);
            }
            Err(e) => {
                warn!(module = %module.module_service_name, error = %e, "Health probe failed");
                health.status = HealthStatus::Down;
                health.status_code = 0;
            }
        }

        if health.status == HealthStatus::Healthy {
            self.refresh_last_ping(module);
        }

        if health.status_code != 0 {
            health.last_update = self.last_update(module).await.unwrap_or_default();
        }

        health
    }

    /// 控制器自身与存储的健康
    pub async fn controller_health(&self) -> Vec<ModuleHealth> {
        let controller = ModuleHealth {
            module_name: "master-controller".to_string(),
            status: HealthStatus::Healthy,
            status_code: 200,
            last_update: String::new(),
        };

        let store_status = match self.repos.modules.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                error!(error = %e, "Store ping failed");
                HealthStatus::Down
            }
        };
        let store = ModuleHealth {
            module_name: "master-database".to_string(),
            status: store_status,
            status_code: 200,
            last_update: String::new(),
        };

        vec![controller, store]
    }

    /// 刷新 last_ping 并清空端点快照后异步写回
    fn refresh_last_ping(&self, module: &ModuleMetadata) {
        let mut record = module.clone();
        record.last_ping = Some(Utc::now());
        record.module_endpoints.clear();

        let modules = self.repos.modules.clone();
        tokio::spawn(async move {
            if let Err(e) = modules.upsert(&record).await {
                error!(module = %record.module_service_name, error = %e, "Failed to persist last ping");
            }
        });
    }

    /// ingress：最近插入的元素；egress：最近的投递记录；没有记录时为 None
    async fn last_update(&self, module: &ModuleMetadata) -> Option<String> {
        let result = match module.module_type {
            ModuleType::Ingress => self
                .repos
                .elements
                .latest_for_service(&module.module_service_name)
                .await
                .map(|e| e.map(|e| e.created_at)),
            ModuleType::Egress => self
                .repos
                .statuses
                .latest_delivery(module.id)
                .await
                .map(|s| s.map(|s| s.updated_at)),
            ModuleType::Functional => return None,
        };

        match result {
            Ok(ts) => ts.map(|t| t.to_rfc3339()),
            Err(e) => {
                error!(module = %module.module_service_name, error = %e, "Failed to read last update");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryStatus, ElementType, ListElement, UpdateStatus};
    use crate::persistence::{ElementStore, MemoryStore, ModuleStore, StatusStore};
    use crate::testing::{egress_module, module, FakeGateway};
    use std::collections::HashMap;
    use std::time::Duration;

    fn monitor(gateway: Arc<FakeGateway>, store: Arc<MemoryStore>) -> Arc<HealthMonitor> {
        Arc::new(HealthMonitor::new(gateway, Repositories::from_memory(store)))
    }

    #[tokio::test]
    async fn test_is_up_only_on_200() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_probe("teapot", Some(418));
        gateway.set_probe("gone", None);
        let monitor = monitor(gateway, Arc::new(MemoryStore::new()));

        assert!(monitor.is_up("ok", "8080").await);
        assert!(!monitor.is_up("teapot", "8080").await);
        assert!(!monitor.is_up("gone", "8080").await);
    }

    #[tokio::test]
    async fn test_teapot_classified_like_ok() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_probe("teapot", Some(418));
        let monitor = monitor(gateway, Arc::new(MemoryStore::new()));

        let ok = monitor.check_module(&egress_module("ok", &[])).await;
        let teapot = monitor.check_module(&egress_module("teapot", &[])).await;
        assert_eq!(ok.status, HealthStatus::Healthy);
        assert_eq!(teapot.status, HealthStatus::Healthy);
        assert_eq!(teapot.status_code, 418);
    }

    #[tokio::test]
    async fn test_batch_health_check_classifies_each_module() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.set_probe("unhealthy", Some(501));
        gateway.set_probe("broken", Some(500));
        gateway.set_probe("gone", None);
        let store = Arc::new(MemoryStore::new());
        let monitor = monitor(gateway.clone(), store);

        let modules = vec![
            egress_module("healthy", &[]),
            egress_module("unhealthy", &[]),
            egress_module("broken", &[]),
            egress_module("gone", &[]),
        ];
        let reports = monitor.batch_health_check(modules).await;

        let status: HashMap<String, (HealthStatus, u16)> = reports
            .iter()
            .map(|r| {
                (
                    r.metadata.module_service_name.clone(),
                    (r.module_health.status, r.module_health.status_code),
                )
            })
            .collect();
        assert_eq!(status["healthy"], (HealthStatus::Healthy, 200));
        assert_eq!(status["unhealthy"], (HealthStatus::Unhealthy, 501));
        assert_eq!(status["broken"], (HealthStatus::Down, 500));
        assert_eq!(status["gone"], (HealthStatus::Down, 0));
        assert_eq!(gateway.probe_count("healthy"), 1);
    }

    #[tokio::test]
    async fn test_healthy_module_persists_last_ping() {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryStore::new());
        let id = store.upsert(&egress_module("blocker", &[ElementType::Ip])).await.unwrap();
        let module = store.get_by_service_name("blocker").await.unwrap().unwrap();
        assert_eq!(module.id, id);
        let monitor = monitor(gateway, store.clone());

        let health = monitor.check_module(&module).await;
        assert_eq!(health.status, HealthStatus::Healthy);

        let mut pinged = None;
        for _ in 0..50 {
            pinged = store.get_by_service_name("blocker").await.unwrap().unwrap().last_ping;
            if pinged.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pinged.is_some());
    }

    #[tokio::test]
    async fn test_last_update_annotation() {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryStore::new());

        let ingress_id = store
            .upsert(&module("feed", ModuleType::Ingress, &[]))
            .await
            .unwrap();
        let egress_id = store.upsert(&egress_module("blocker", &[])).await.unwrap();
        let idle_id = store.upsert(&egress_module("idle", &[])).await.unwrap();

        store
            .insert(ListElement::new(ElementType::Ip, "1.1.1.1", false).with_service("feed"))
            .await
            .unwrap();
        store
            .insert_if_absent(UpdateStatus::new(egress_id, "blocker", 1, DeliveryStatus::Pending))
            .await
            .unwrap();

        let monitor = monitor(gateway, store.clone());
        let all = ModuleStore::all(store.as_ref()).await.unwrap();
        let by_id = |id: i64| all.iter().find(|m| m.id == id).cloned().unwrap();

        assert!(!monitor.check_module(&by_id(ingress_id)).await.last_update.is_empty());
        assert!(!monitor.check_module(&by_id(egress_id)).await.last_update.is_empty());
        assert!(monitor.check_module(&by_id(idle_id)).await.last_update.is_empty());
    }

    #[tokio::test]
    async fn test_controller_health() {
        let monitor = monitor(Arc::new(FakeGateway::new()), Arc::new(MemoryStore::new()));
        let health = monitor.controller_health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|h| h.status == HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_egress_last_update_follows_latest_delivery() {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryStore::new());
        let id = store.upsert(&egress_module("blocker", &[])).await.unwrap();
        store
            .insert_if_absent(UpdateStatus::new(id, "blocker", 1, DeliveryStatus::Pending))
            .await
            .unwrap();
        store
            .insert_if_absent(UpdateStatus::new(id, "blocker", 2, DeliveryStatus::Failed))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.update_in_place(id, 2, DeliveryStatus::Pending).await.unwrap();
        let retried = store.get(id, 2).await.unwrap().unwrap();

        let monitor = monitor(gateway, store.clone());
        let module = store.get_by_service_name("blocker").await.unwrap().unwrap();
        let health = monitor.check_module(&module).await;
        assert_eq!(health.last_update, retried.updated_at.to_rfc3339());
        assert_ne!(retried.updated_at, retried.created_at);
    }
}
