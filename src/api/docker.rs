//! 容器命令 API
//!
//! GET /api/docker：当前容器名；POST /api/docker：提交一批容器命令。
//! 提交后立即返回，结果流在后台转发到事件中心。

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::domain::{ContainerBatch, ContainerNames, EntityState, Event, EventType};
use crate::error::ApiResult;
use crate::middleware::RequireApiKey;
use crate::services::{CommandOutcome, CommandStream};
use crate::state::{AppState, EventHub};

use super::{decode_json, status_message};

/// Created / Started 事件广播前的延迟（模块启动较慢）
const STARTUP_NOTIFY_DELAY: Duration = Duration::from_secs(1);

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/docker", get(container_names).post(run_commands))
}

/// 当前所有容器名
///
/// GET /api/docker
async fn container_names(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ContainerNames>> {
    let containers = state.orchestrator.list_containers().await?;
    Ok(Json(ContainerNames { containers }))
}

/// 提交容器命令
///
/// POST /api/docker
async fn run_commands(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let batch: ContainerBatch = decode_json(&body)?;
    info!(commands = batch.containers.len(), "Received container commands");

    let stream = state.orchestrator.run_commands(batch);
    tokio::spawn(forward_outcomes(stream, state.events.clone()));

    Ok(status_message(StatusCode::OK, "commands added to queue"))
}

/// 把结果流转发到事件中心，直到 `Done`
pub(crate) async fn forward_outcomes(mut stream: CommandStream, hub: Arc<EventHub>) {
    while let Some(outcome) = stream.next().await {
        match outcome {
            CommandOutcome::Event(event) => {
                if matches!(
                    event.context.state,
                    EntityState::Created | EntityState::Started
                ) {
                    tokio::time::sleep(STARTUP_NOTIFY_DELAY).await;
                }
                hub.publish(event);
            }
            CommandOutcome::Error(e) => {
                error!(error = %e, "Container command error");
                hub.publish(Event::module(
                    EventType::Error,
                    e.to_string(),
                    "",
                    EntityState::None,
                ));
            }
            CommandOutcome::Done => {
                info!("Container commands completed");
                break;
            }
        }
    }
}
