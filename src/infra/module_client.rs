//! 模块 HTTP Client
//!
//! 封装控制器对模块的两类调用：健康探测与数据推送。
//! 两个 `reqwest::Client` 分别使用短 / 长超时，各自复用连接池。

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::Timings;
use crate::domain::PushPayload;
use crate::error::{ControllerError, ControllerResult};

/// 模块网关
///
/// 返回值为 HTTP 状态码；只有无法建立连接、超时等传输问题才返回错误
#[async_trait]
pub trait ModuleGateway: Send + Sync {
    /// `GET http://{service}:{port}/health`
    async fn probe(&self, service: &str, port: &str) -> ControllerResult<u16>;

    /// `POST http://{service}:{port}/run`
    async fn push(&self, service: &str, port: &str, payload: &PushPayload) -> ControllerResult<u16>;
}

/// 基于 reqwest 的模块网关
#[derive(Clone)]
pub struct HttpModuleGateway {
    health_client: Client,
    push_client: Client,
}

impl HttpModuleGateway {
    pub fn new(timings: &Timings) -> ControllerResult<Self> {
        let health_client = Client::builder()
            .timeout(timings.health_timeout)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| ControllerError::configuration(format!("health client: {}", e)))?;

        let push_client = Client::builder()
            .timeout(timings.push_timeout)
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ControllerError::configuration(format!("push client: {}", e)))?;

        Ok(Self {
            health_client,
            push_client,
        })
    }
}

#[async_trait]
impl ModuleGateway for HttpModuleGateway {
    async fn probe(&self, service: &str, port: &str) -> ControllerResult<u16> {
        let url = format!("http://{}:{}/health", service, port);
        let resp = self.health_client.get(&url).send().await?;
        debug!(url = %url, status = resp.status().as_u16(), "Probed module");
        Ok(resp.status().as_u16())
    }

    async fn push(&self, service: &str, port: &str, payload: &PushPayload) -> ControllerResult<u16> {
        let url = format!("http://{}:{}/run", service, port);
        let resp = self.push_client.post(&url).json(payload).send().await?;
        debug!(
            url = %url,
            batch_id = payload.batch_id,
            items = payload.items.len(),
            status = resp.status().as_u16(),
            "Pushed batch"
        );
        Ok(resp.status().as_u16())
    }
}
