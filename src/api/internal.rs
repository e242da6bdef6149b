//! 模块内部 API
//!
//! 需要 `x-internal-token`，包含 /internal/register、/internal/queue、/internal/update 端点

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::{DeliveryStatus, ListElement, ModuleMetadata};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireInternalToken;
use crate::state::AppState;

use super::{decode_json, status_message};

/// ingress 模块上报的元素
#[derive(Debug, Deserialize)]
struct ProcessedItems {
    #[serde(default)]
    items: Vec<ListElement>,
}

/// egress 模块回报的 batch 结果
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatusReport {
    service_name: String,
    status: DeliveryStatus,
    update_batch_id: i64,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/internal/register", post(register_module))
        .route("/internal/queue", post(queue_elements))
        .route("/internal/update", post(update_status))
}

/// 模块自注册，交给注册 worker 串行处理
///
/// POST /internal/register
async fn register_module(
    _auth: RequireInternalToken,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let metadata: ModuleMetadata = decode_json(&body)?;
    info!(module = %metadata.module_service_name, "Received module registration");

    state
        .registrations
        .send(metadata)
        .await
        .map_err(|_| ApiError::service_unavailable("registration worker is not running"))?;

    Ok(StatusCode::ACCEPTED)
}

/// ingress 模块批量上报元素；入库并落盘后才返回 202
///
/// POST /internal/queue
async fn queue_elements(
    _auth: RequireInternalToken,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let ProcessedItems { items }: ProcessedItems = decode_json(&body)?;
    let count = items.len();

    if let Err(e) = state.ingest.add_many(items).await {
        error!(error = %e, "Failed to queue elements");
        return Err(e.into());
    }

    Ok(status_message(
        StatusCode::ACCEPTED,
        format!("Success: {} items uploaded", count),
    ))
}

/// egress 模块回报 batch 处理结果
///
/// POST /internal/update
async fn update_status(
    _auth: RequireInternalToken,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let report: StatusReport = decode_json(&body)?;
    state
        .distribution
        .acknowledge(&report.service_name, report.update_batch_id, report.status)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}
