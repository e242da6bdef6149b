//! 事件流与注册信息 API
//!
//! 包含 /api/events（SSE）、/api/keys 与 /api/routes 端点

use axum::{
    extract::State,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::middleware::RequireApiKey;
use crate::services::routes::InstalledRoute;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct KeysResponse {
    /// 模块注册用的内部 token，尚未生成时为 null
    registration_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct RoutesResponse {
    total: usize,
    /// 模块 id -> 已安装路由
    modules: BTreeMap<i64, Vec<InstalledRoute>>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/events", get(stream_events))
        .route("/api/keys", get(registration_key))
        .route("/api/routes", get(installed_routes))
}

/// 事件流
///
/// GET /api/events
async fn stream_events(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.events.subscribe();
    debug!(subscribers = state.events.subscriber_count(), "Event subscriber connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    yield Ok(SseEvent::default().data(json));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "Event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// 模块注册 token
///
/// GET /api/keys
async fn registration_key(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Json<KeysResponse> {
    Json(KeysResponse {
        registration_token: state.token.get().await,
    })
}

/// 已安装的模块路由
///
/// GET /api/routes
async fn installed_routes(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> Json<RoutesResponse> {
    Json(RoutesResponse {
        total: state.routes.len().await,
        modules: state.routes.registry().await,
    })
}
