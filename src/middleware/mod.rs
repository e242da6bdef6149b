//! 请求认证

pub mod auth;

pub use auth::{RequireApiKey, RequireInternalToken};
