//! 控制器与模块之间的 HTTP 约定
//!
//! 在本地端口上起一个 stub 模块（`/health`、`/run`），
//! 用真实的 `HttpModuleGateway` 驱动健康检查与分发。

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use dem_controller::config::Timings;
use dem_controller::domain::module::ElementTypesWrapper;
use dem_controller::domain::{
    DeliveryStatus, ElementType, HealthStatus, ListElement, ModuleMetadata, ModuleType,
    PushPayload,
};
use dem_controller::infra::HttpModuleGateway;
use dem_controller::persistence::{MemoryStore, Repositories};
use dem_controller::services::{DistributionEngine, HealthMonitor};

#[derive(Default)]
struct StubModule {
    health_code: AtomicU16,
    run_code: AtomicU16,
    received: Mutex<Vec<PushPayload>>,
}

impl StubModule {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            health_code: AtomicU16::new(200),
            run_code: AtomicU16::new(202),
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<PushPayload> {
        self.received.lock().unwrap().clone()
    }
}

async fn health(State(stub): State<Arc<StubModule>>) -> StatusCode {
    StatusCode::from_u16(stub.health_code.load(Ordering::SeqCst)).unwrap()
}

async fn run(State(stub): State<Arc<StubModule>>, Json(payload): Json<PushPayload>) -> StatusCode {
    stub.received.lock().unwrap().push(payload);
    StatusCode::from_u16(stub.run_code.load(Ordering::SeqCst)).unwrap()
}

/// 启动 stub 模块，返回监听端口
async fn spawn_stub(stub: Arc<StubModule>) -> u16 {
    let app = Router::new()
        .route("/health", get(health))
        .route("/run", post(run))
        .with_state(stub);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

fn egress(port: u16, types: &[ElementType]) -> ModuleMetadata {
    ModuleMetadata {
        id: 0,
        // 模块地址为 http://{service}:{port}
        module_service_name: "127.0.0.1".to_string(),
        module_display_name: "Stub blocker".to_string(),
        module_type: ModuleType::Egress,
        module_description: String::new(),
        inbound_route: "/stub".to_string(),
        internal_ip: String::new(),
        internal_port: port.to_string(),
        icon_url: String::new(),
        configured: true,
        configurable: true,
        last_ping: None,
        accepted_element_types: ElementTypesWrapper {
            element_types: types.to_vec(),
        },
        module_endpoints: vec![],
    }
}

struct Harness {
    repos: Repositories,
    health: Arc<HealthMonitor>,
    engine: Arc<DistributionEngine>,
}

fn harness(retry_delay: Duration) -> Harness {
    let repos = Repositories::from_memory(Arc::new(MemoryStore::new()));
    let timings = Timings {
        health_timeout: Duration::from_secs(2),
        push_timeout: Duration::from_secs(5),
        ..Timings::default()
    };
    let gateway = Arc::new(HttpModuleGateway::new(&timings).unwrap());
    let health = Arc::new(HealthMonitor::new(gateway.clone(), repos.clone()));
    let engine = Arc::new(DistributionEngine::new(
        repos.clone(),
        gateway,
        health.clone(),
        retry_delay,
    ));
    Harness {
        repos,
        health,
        engine,
    }
}

async fn add(repos: &Repositories, element_type: ElementType, value: &str, safe: bool) -> i64 {
    let batch_id = repos.elements.next_batch_id().await.unwrap();
    let mut element = ListElement::new(element_type, value, safe);
    element.batch_id = batch_id;
    repos.elements.insert(element).await.unwrap();
    batch_id
}

#[tokio::test]
async fn test_batch_is_pushed_over_http_and_recorded_pending() {
    let stub = StubModule::new();
    let port = spawn_stub(stub.clone()).await;
    let h = harness(Duration::from_secs(60));

    let mut module = egress(port, &[ElementType::Ip, ElementType::Domain]);
    module.id = h.repos.modules.upsert(&module).await.unwrap();

    let batch_id = add(&h.repos, ElementType::Ip, "10.0.0.1", false).await;
    add(&h.repos, ElementType::Url, "https://not-accepted.example/", false).await;

    let summaries = h.engine.run().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].accepted, 1);

    let received = stub.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].batch_id, batch_id);
    assert!(!received[0].safe_list);
    assert_eq!(received[0].items[0].value, "10.0.0.1");
    assert_eq!(received[0].items[0].element_type, ElementType::Ip);

    let row = h.repos.statuses.get(module.id, batch_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Pending);

    // 同一 batch 不会再推
    h.engine.run().await.unwrap();
    assert_eq!(stub.received().len(), 1);
}

#[tokio::test]
async fn test_rejected_push_is_retried_after_delay() {
    let stub = StubModule::new();
    stub.run_code.store(500, Ordering::SeqCst);
    let port = spawn_stub(stub.clone()).await;
    let h = harness(Duration::from_millis(200));

    let mut module = egress(port, &[ElementType::Domain]);
    module.id = h.repos.modules.upsert(&module).await.unwrap();
    let batch_id = add(&h.repos, ElementType::Domain, "evil.example.com", false).await;

    h.engine.run().await.unwrap();
    let row = h.repos.statuses.get(module.id, batch_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Failed);

    stub.run_code.store(202, Ordering::SeqCst);

    let mut status = DeliveryStatus::Failed;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = h.repos.statuses.get(module.id, batch_id).await.unwrap().unwrap().status;
        if status == DeliveryStatus::Pending {
            break;
        }
    }
    assert_eq!(status, DeliveryStatus::Pending);
    assert_eq!(stub.received().len(), 2);
}

#[tokio::test]
async fn test_unhealthy_module_is_not_pushed() {
    let stub = StubModule::new();
    stub.health_code.store(503, Ordering::SeqCst);
    let port = spawn_stub(stub.clone()).await;
    let h = harness(Duration::from_secs(60));

    let mut module = egress(port, &[ElementType::Ip]);
    module.id = h.repos.modules.upsert(&module).await.unwrap();
    let batch_id = add(&h.repos, ElementType::Ip, "10.0.0.2", true).await;

    assert!(!h.health.is_up(&module.module_service_name, &module.internal_port).await);
    assert!(h.engine.run().await.unwrap().is_empty());
    assert!(stub.received().is_empty());
    assert!(h.repos.statuses.get(module.id, batch_id).await.unwrap().is_none());

    let report = h.health.check_module(&module).await;
    assert_eq!(report.status_code, 503);
    assert_eq!(report.status, HealthStatus::Down);
}

#[tokio::test]
async fn test_module_acknowledgement_updates_row() {
    let stub = StubModule::new();
    let port = spawn_stub(stub.clone()).await;
    let h = harness(Duration::from_secs(60));

    let mut module = egress(port, &[ElementType::Ip]);
    module.id = h.repos.modules.upsert(&module).await.unwrap();
    let batch_id = add(&h.repos, ElementType::Ip, "10.0.0.3", false).await;

    h.engine.run().await.unwrap();
    assert!(h
        .engine
        .acknowledge("127.0.0.1", batch_id, DeliveryStatus::Success)
        .await
        .unwrap());

    let row = h.repos.statuses.get(module.id, batch_id).await.unwrap().unwrap();
    assert_eq!(row.status, DeliveryStatus::Success);
    assert!(!h
        .engine
        .acknowledge("unknown-module", batch_id, DeliveryStatus::Success)
        .await
        .unwrap());
}
