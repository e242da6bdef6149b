//! 运行时状态模块
//!
//! 管理应用状态与事件广播

pub mod app_state;
pub mod event_hub;

pub use app_state::{get_shutdown_token, trigger_shutdown, AppState};
pub use event_hub::EventHub;
