//! 通知事件（只广播，不持久化）

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Log,
    Error,
    Warning,
    Success,
    Info,
}

/// 事件关联的实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "module")]
    Module,
    #[serde(rename = "listElement")]
    ListElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityState {
    None,
    Deleted,
    Created,
    Started,
    Stopped,
}

impl EntityState {
    /// 首字母大写的名称，用于事件文本
    pub fn title(&self) -> &'static str {
        match self {
            EntityState::None => "None",
            EntityState::Deleted => "Deleted",
            EntityState::Created => "Created",
            EntityState::Started => "Started",
            EntityState::Stopped => "Stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub identifier: String,
    pub state: EntityState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub value: String,
    pub context: EventContext,
}

impl Event {
    /// 模块生命周期事件
    pub fn module(
        event_type: EventType,
        value: impl Into<String>,
        identifier: impl Into<String>,
        state: EntityState,
    ) -> Self {
        Self {
            event_type,
            value: value.into(),
            context: EventContext {
                entity_type: EntityType::Module,
                identifier: identifier.into(),
                state,
            },
        }
    }

    /// list element 相关的错误事件
    pub fn element_error(value: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Error,
            value: value.into(),
            context: EventContext {
                entity_type: EntityType::ListElement,
                identifier: identifier.into(),
                state: EntityState::None,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.event_type == EventType::Error
    }
}
