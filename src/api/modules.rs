//! 模块 API
//!
//! GET /api/modules?moduleType=：列出模块并附带本次健康检查结果

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::domain::module::ModuleReport;
use crate::domain::ModuleType;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModulesQuery {
    #[serde(default)]
    module_type: Option<String>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/modules", get(list_modules))
}

/// 列出模块（可按类型过滤），并发检查健康
///
/// GET /api/modules
async fn list_modules(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModulesQuery>,
) -> ApiResult<Json<Vec<ModuleReport>>> {
    let modules = match query.module_type.as_deref().filter(|t| !t.is_empty()) {
        None => state.repos.modules.all().await?,
        Some(raw) => {
            let module_type = ModuleType::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown module type '{}'", raw)))?;
            state.repos.modules.all_of_type(module_type).await?
        }
    };

    Ok(Json(state.health.batch_health_check(modules).await))
}
