//! 配置模块
//!
//! 环境变量解析与内部 token 管理

pub mod env;
pub mod token;

pub use env::{constants, DockerConfig, EnvConfig, RegistryAuth, Timings};
pub use token::InternalToken;
