//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod container;
pub mod element;
pub mod event;
pub mod module;

// Re-exports for convenience
pub use container::{CommandKind, ContainerBatch, ContainerCommand, ContainerNames};
pub use element::{DeliveryStatus, ElementType, ListElement, PushPayload, UpdateStatus};
pub use event::{EntityState, EntityType, Event, EventContext, EventType};
pub use module::{HealthStatus, ModuleEndpoint, ModuleHealth, ModuleMetadata, ModuleType};
