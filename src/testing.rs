//! 单元测试共用的 fake 实现
//!
//! `FakeEngine` / `FakeGateway` 记录调用顺序，供断言使用

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::module::ElementTypesWrapper;
use crate::domain::{ElementType, ModuleMetadata, ModuleType, PushPayload};
use crate::error::{ControllerError, ControllerResult};
use crate::infra::{ContainerEngine, ContainerSpec, ModuleGateway};

/// 记录调用的容器引擎
#[derive(Default)]
pub struct FakeEngine {
    networks: Vec<String>,
    containers: Vec<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    specs: Mutex<Vec<ContainerSpec>>,
}

impl FakeEngine {
    pub fn with_networks(networks: &[&str]) -> Self {
        Self {
            networks: networks.iter().map(|n| n.to_string()).collect(),
            containers: vec!["/controller".to_string(), "/fp-blocker".to_string()],
            ..Default::default()
        }
    }

    /// 每次调用前 sleep，用于制造并发窗口
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 让形如 `stop:name` 的调用失败
    pub fn fail_on(&self, call: &str) {
        self.failing.lock().unwrap().insert(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.specs.lock().unwrap().last().cloned()
    }

    async fn record(&self, call: String) -> ControllerResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self.failing.lock().unwrap().contains(&call);
        self.calls.lock().unwrap().push(call.clone());
        if failed {
            return Err(ControllerError::transport(format!("{} failed", call)));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull(&self, image: &str) -> ControllerResult<()> {
        self.record(format!("pull:{}", image)).await
    }

    async fn create(&self, spec: &ContainerSpec) -> ControllerResult<()> {
        self.specs.lock().unwrap().push(spec.clone());
        self.record(format!("create:{}", spec.name)).await
    }

    async fn pull_and_start(&self, _image: &str, name: &str) -> ControllerResult<()> {
        self.record(format!("pull_and_start:{}", name)).await
    }

    async fn start(&self, name: &str) -> ControllerResult<()> {
        self.record(format!("start:{}", name)).await
    }

    async fn stop(&self, name: &str) -> ControllerResult<()> {
        self.record(format!("stop:{}", name)).await
    }

    async fn restart(&self, name: &str) -> ControllerResult<()> {
        self.record(format!("restart:{}", name)).await
    }

    async fn remove(&self, name: &str) -> ControllerResult<()> {
        self.record(format!("remove:{}", name)).await
    }

    async fn list_networks(&self) -> ControllerResult<Vec<String>> {
        Ok(self.networks.clone())
    }

    async fn list_containers(&self) -> ControllerResult<Vec<String>> {
        self.record("list_containers".to_string()).await?;
        Ok(self.containers.clone())
    }
}

/// 一次推送记录
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub service: String,
    pub batch_id: i64,
    pub safe_list: bool,
    pub values: Vec<String>,
}

/// 可编排响应的模块网关
///
/// 未设置的服务：探测返回 200，推送返回 202
#[derive(Default)]
pub struct FakeGateway {
    probe_codes: Mutex<HashMap<String, Option<u16>>>,
    push_codes: Mutex<HashMap<String, Option<u16>>>,
    pushes: Mutex<Vec<PushRecord>>,
    probes: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` 表示传输失败
    pub fn set_probe(&self, service: &str, code: Option<u16>) {
        self.probe_codes.lock().unwrap().insert(service.to_string(), code);
    }

    /// `None` 表示传输失败
    pub fn set_push(&self, service: &str, code: Option<u16>) {
        self.push_codes.lock().unwrap().insert(service.to_string(), code);
    }

    pub fn pushes(&self) -> Vec<PushRecord> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn probe_count(&self, service: &str) -> usize {
        self.probes.lock().unwrap().iter().filter(|s| *s == service).count()
    }
}

#[async_trait]
impl ModuleGateway for FakeGateway {
    async fn probe(&self, service: &str, _port: &str) -> ControllerResult<u16> {
        self.probes.lock().unwrap().push(service.to_string());
        let code = self.probe_codes.lock().unwrap().get(service).copied().unwrap_or(Some(200));
        code.ok_or_else(|| ControllerError::transport("connection refused"))
    }

    async fn push(&self, service: &str, _port: &str, payload: &PushPayload) -> ControllerResult<u16> {
        self.pushes.lock().unwrap().push(PushRecord {
            service: service.to_string(),
            batch_id: payload.batch_id,
            safe_list: payload.safe_list,
            values: payload.items.iter().map(|e| e.value.clone()).collect(),
        });
        let code = self.push_codes.lock().unwrap().get(service).copied().unwrap_or(Some(202));
        code.ok_or_else(|| ControllerError::transport("connection reset"))
    }
}

/// 已配置的 egress 模块
pub fn egress_module(name: &str, types: &[ElementType]) -> ModuleMetadata {
    module(name, ModuleType::Egress, types)
}

pub fn module(name: &str, module_type: ModuleType, types: &[ElementType]) -> ModuleMetadata {
    ModuleMetadata {
        id: 0,
        module_service_name: name.to_string(),
        module_display_name: name.to_string(),
        module_type,
        module_description: String::new(),
        inbound_route: format!("/{}", name),
        internal_ip: String::new(),
        internal_port: "8080".to_string(),
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
