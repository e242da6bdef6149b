//! 容器命令相关领域模型

use serde::{Deserialize, Serialize};

use super::element::ElementType;
use super::event::EntityState;
use super::module::ModuleType;

/// 容器命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    #[serde(rename = "pullstart")]
    PullAndStart,
    #[serde(rename = "pullrestart")]
    PullAndRestart,
    Start,
    Stop,
    Restart,
    Create,
    Remove,
    List,
}

impl CommandKind {
    /// 命令成功后报告的状态（仅用于通知）
    pub fn to_state(&self) -> EntityState {
        match self {
            CommandKind::Create | CommandKind::PullAndStart => EntityState::Created,
            CommandKind::Stop => EntityState::Stopped,
            CommandKind::Start | CommandKind::Restart | CommandKind::PullAndRestart => {
                EntityState::Started
            }
            CommandKind::Remove => EntityState::Deleted,
            CommandKind::List => EntityState::None,
        }
    }
}

/// 一条容器命令（只在一次编排批次内存在）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCommand {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_module_type")]
    pub module_type: ModuleType,
    #[serde(default)]
    pub accepted_data_types: Vec<ElementType>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub env_vars: Vec<String>,
    #[serde(default)]
    pub image_ref: String,
    #[serde(default)]
    pub icon_url: String,
    pub command: CommandKind,
    #[serde(default)]
    pub registration_token: String,
}

fn default_module_type() -> ModuleType {
    ModuleType::Functional
}

/// 命令批次
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerBatch {
    #[serde(default)]
    pub containers: Vec<ContainerCommand>,
}

/// 容器名称列表响应
#[derive(Debug, Clone, Serialize)]
pub struct ContainerNames {
    pub containers: Vec<String>,
}

/// 敏感关键词列表
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password", "secret", "key", "token", "credential", "auth", "private", "jwt",
];

/// 检查环境变量名是否敏感
pub fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| key_lower.contains(kw))
}

/// 用于日志输出的环境变量列表（敏感值打码）
pub fn redact_env(env_vars: &[String]) -> Vec<String> {
    env_vars
        .iter()
        .map(|kv| match kv.split_once('=') {
            Some((k, _)) if is_sensitive_key(k) => format!("{}=***", k),
            _ => kv.clone(),
        })
        .collect()
}
