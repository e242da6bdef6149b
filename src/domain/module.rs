//! 模块（module）相关领域模型
//!
//! 模块通过注册消息自我登记，或在启动时从持久化存储加载

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::element::ElementType;

/// 模块方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// 产出 list element
    Ingress,
    /// 接收 list element
    Egress,
    /// 其他功能模块
    Functional,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Ingress => "ingress",
            ModuleType::Egress => "egress",
            ModuleType::Functional => "functional",
        }
    }

    /// 宽松解析（查询参数使用）
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ingress" => Some(ModuleType::Ingress),
            "egress" => Some(ModuleType::Egress),
            "functional" => Some(ModuleType::Functional),
            _ => None,
        }
    }
}

/// 模块声明的端点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEndpoint {
    #[serde(default)]
    pub secure: bool,
    pub endpoint: String,
}

/// 接受的元素类型（注册消息中的包装结构）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementTypesWrapper {
    #[serde(default)]
    pub element_types: Vec<ElementType>,
}

/// 模块元数据
///
/// 注册消息与持久化记录共用此结构；健康状态不在这里，
/// 见 [`ModuleHealth`] 与 [`ModuleReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub id: i64,
    pub module_service_name: String,
    #[serde(default)]
    pub module_display_name: String,
    pub module_type: ModuleType,
    #[serde(default)]
    pub module_description: String,
    #[serde(default)]
    pub inbound_route: String,
    #[serde(default)]
    pub internal_ip: String,
    pub internal_port: String,
    #[serde(default)]
    pub icon_url: String,
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub configurable: bool,
    #[serde(default)]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(default)]
    pub accepted_element_types: ElementTypesWrapper,
    #[serde(default, rename = "internal_endpoints")]
    pub module_endpoints: Vec<ModuleEndpoint>,
}

impl ModuleMetadata {
    /// 模块内部基础地址 `http://{service}:{port}`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.module_service_name, self.internal_port)
    }
}

/// 健康状态
///
/// 序列化为 -1 / 0 / 1，与控制台前端约定一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    #[default]
    Down,
    Unhealthy,
    Healthy,
}

impl HealthStatus {
    /// 根据 HTTP 状态码分类
    ///
    /// 200 / 418 => Healthy，501 => Unhealthy，其余 => Down
    pub fn from_status_code(code: u16) -> Self {
        match code {
            200 | 418 => HealthStatus::Healthy,
            501 => HealthStatus::Unhealthy,
            _ => HealthStatus::Down,
        }
    }

    fn as_i8(&self) -> i8 {
        match self {
            HealthStatus::Down => -1,
            HealthStatus::Unhealthy => 0,
            HealthStatus::Healthy => 1,
        }
    }
}

impl Serialize for HealthStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for HealthStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i8::deserialize(deserializer)?;
        Ok(match v {
            1 => HealthStatus::Healthy,
            0 => HealthStatus::Unhealthy,
            _ => HealthStatus::Down,
        })
    }
}

/// 模块的临时健康信息（不持久化）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHealth {
    pub module_name: String,
    pub status: HealthStatus,
    pub status_code: u16,
    /// 最近一次数据更新时间，没有记录时为空字符串
    #[serde(default)]
    pub last_update: String,
}

/// 控制器自身健康（controller + store）
#[derive(Debug, Clone, Serialize)]
pub struct ControllerHealth {
    pub modules: Vec<ModuleHealth>,
}

/// 模块元数据 + 本次检查得到的健康信息
#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    #[serde(flatten)]
    pub metadata: ModuleMetadata,
    pub module_health: ModuleHealth,
}
