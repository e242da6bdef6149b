//! 健康检查 API
//!
//! 包含 /health（存活探测）与 /api/health（控制器与存储健康）端点

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::config::constants::VERSION;
use crate::domain::module::ControllerHealth;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 存活检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    installed_routes: usize,
    event_subscribers: usize,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(controller_health))
}

/// 存活检查
///
/// GET /health
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    Json(HealthResponse {
        status: "ok",
        service: "dem-controller",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        installed_routes: state.routes.len().await,
        event_subscribers: state.events.subscriber_count(),
    })
}

/// 控制器与存储健康
///
/// GET /api/health
async fn controller_health(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(ControllerHealth {
        modules: state.health.controller_health().await,
    })
}
