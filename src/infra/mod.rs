//! 基础设施模块
//!
//! 封装外部依赖（容器引擎、模块 HTTP client）

pub mod docker;
pub mod module_client;

pub use docker::{ContainerEngine, ContainerSpec, DockerCli};
pub use module_client::{HttpModuleGateway, ModuleGateway};
