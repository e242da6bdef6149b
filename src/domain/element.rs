//! List element 与投递状态领域模型

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{ControllerError, ControllerResult};

/// 元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ElementType {
    Ip,
    Domain,
    Url,
    Range,
    Snort,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Ip => "IP",
            ElementType::Domain => "DOMAIN",
            ElementType::Url => "URL",
            ElementType::Range => "RANGE",
            ElementType::Snort => "SNORT",
        }
    }

    /// 校验元素值格式
    ///
    /// SNORT 规则不做格式检查
    pub fn validate(&self, value: &str) -> ControllerResult<()> {
        let valid = match self {
            ElementType::Ip => IP_RE.is_match(value),
            ElementType::Domain => DOMAIN_RE.is_match(value),
            ElementType::Url => URL_RE.is_match(value),
            ElementType::Range => RANGE_RE.is_match(value),
            ElementType::Snort => true,
        };

        if valid {
            Ok(())
        } else {
            Err(ControllerError::validation(format!("Invalid {} Format", self.label())))
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ElementType::Ip => "IP",
            ElementType::Domain => "Domain",
            ElementType::Url => "URL",
            ElementType::Range => "Range",
            ElementType::Snort => "Snort",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const QUAD: &str = r"\b([1-9][0-9]{0,2}?|255)\.\d{1,3}\.\d{1,3}\.\d{1,3}\b";

static IP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b$").expect("valid ip regex")
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(-[a-z0-9]+)*\.)+[a-z]{2,}$").expect("valid domain regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(http(s)?://)?(www\.)?([-a-zA-Z0-9@:%_+~#=]{2,256}\.[a-z]{2,256}\b([-a-zA-Z0-9@:%_+~#?&/=]*))+(\.[a-z]{2,6}\b([-a-zA-Z0-9@:%_+~#?&/=]*))?$",
    )
    .expect("valid url regex")
});

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^({QUAD})-({QUAD})$")).expect("valid range regex")
});

/// 黑白名单元素；`value` 全局唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListElement {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub source: String,
    /// 产生该元素的 ingress 模块
    #[serde(default)]
    pub service_name: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub value: String,
    /// true = 白名单，false = 黑名单
    #[serde(default)]
    pub safe: bool,
    #[serde(rename = "batch_number", default)]
    pub batch_id: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ListElement {
    pub fn new(element_type: ElementType, value: impl Into<String>, safe: bool) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            source: String::new(),
            service_name: String::new(),
            element_type,
            value: value.into(),
            safe,
            batch_id: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Success => "success",
            DeliveryStatus::Failed => "failed",
        }
    }

    /// 解析 batch 列表的过滤条件；`incomplete` = pending + failed
    pub fn parse_filter(s: &str) -> Option<Vec<DeliveryStatus>> {
        match s {
            "pending" => Some(vec![DeliveryStatus::Pending]),
            "success" => Some(vec![DeliveryStatus::Success]),
            "failed" => Some(vec![DeliveryStatus::Failed]),
            "incomplete" => Some(vec![DeliveryStatus::Pending, DeliveryStatus::Failed]),
            _ => None,
        }
    }
}

/// 每个 (module, batch) 的投递记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    #[serde(default)]
    pub id: i64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub service_name: String,
    pub status: DeliveryStatus,
    #[serde(rename = "update_batch_id")]
    pub batch_id: i64,
    #[serde(rename = "module_metadata_id")]
    pub module_id: i64,
}

impl UpdateStatus {
    pub fn new(module_id: i64, service_name: &str, batch_id: i64, status: DeliveryStatus) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            created_at: now,
            updated_at: now,
            service_name: service_name.to_string(),
            status,
            batch_id,
            module_id,
        }
    }
}

/// 推送给 egress 模块的请求体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub safe_list: bool,
    pub items: Vec<ListElement>,
    pub batch_id: i64,
}

/// 分页元素列表
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedElements {
    pub elements: Vec<ListElement>,
    pub total_page_count: usize,
    pub page_number: usize,
}

/// 分页状态列表
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedStatus {
    pub items: Vec<UpdateStatus>,
    pub total_page_count: usize,
    pub page_number: usize,
}

/// 页数（向上取整）
pub fn page_count(total: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}
