//! 服务层模块
//!
//! 包含核心业务逻辑：容器编排、健康检查、路由注册、分发与入库

pub mod distribution;
pub mod health;
pub mod ingest;
pub mod orchestrator;
pub mod routes;
pub mod snapshot;

pub use distribution::DistributionEngine;
pub use health::HealthMonitor;
pub use ingest::IngestService;
pub use orchestrator::{CommandOutcome, CommandStream, Orchestrator, OrchestratorSettings};
pub use routes::{RouteRegistrar, RouteTable, RouterKind};
