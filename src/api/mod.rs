//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod docker;
pub mod elements;
pub mod events;
pub mod health;
pub mod internal;
pub mod modules;
pub mod proxy;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, warn};

use crate::error::{ApiError, ApiResult};
use crate::middleware::auth::ACCESS_TOKEN_HEADER;
use crate::state::AppState;

/// 通用状态响应体
#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: u16,
    pub message: String,
}

pub(crate) fn status_message(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<StatusMessage>) {
    (
        status,
        Json(StatusMessage {
            status: status.as_u16(),
            message: message.into(),
        }),
    )
}

/// 解析 JSON 请求体，失败时返回 406
pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        error!(error = %e, "Error decoding json entity");
        ApiError::not_acceptable("could not decode json into entity")
    })
}

/// CORS：配置了 HOST_DOMAIN 时只允许该来源
fn cors_layer(host_domain: &str) -> CorsLayer {
    if host_domain.is_empty() {
        return CorsLayer::permissive();
    }

    let origin = if host_domain.contains("://") {
        host_domain.to_string()
    } else {
        format!("https://{}", host_domain)
    };

    match HeaderValue::from_str(&origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::CONTENT_TYPE,
                HeaderName::from_static(ACCESS_TOKEN_HEADER),
            ]),
        Err(e) => {
            warn!(host_domain = %host_domain, error = %e, "Invalid HOST_DOMAIN for CORS, allowing any origin");
            CorsLayer::permissive()
        }
    }
}

/// 构建完整的 API 路由
///
/// 静态路由之外的 `/api/*` 与 `/ingress/*` 由模块代理处理
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.host_domain);

    Router::new()
        // Health
        .merge(health::router())
        // Modules
        .merge(modules::router())
        // Container commands
        .merge(docker::router())
        // Elements / batches / export
        .merge(elements::router())
        // Events / keys / routes
        .merge(events::router())
        // Module-facing internal API
        .merge(internal::router())
        // Module routes
        .fallback(proxy::module_proxy)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
