//! List element API
//!
//! 包含 /api/elements（增删改查）、/api/batch（投递状态）与 /api/export 端点

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::constants::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::domain::element::{PaginatedElements, PaginatedStatus};
use crate::domain::{DeliveryStatus, ListElement};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

use super::{decode_json, status_message};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/elements",
            get(list_elements)
                .post(add_element)
                .put(update_element)
                .delete(delete_element),
        )
        .route("/api/batch", get(list_batches))
        .route("/api/export", get(export_all))
        .route("/api/export/lookup", get(lookup))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElementsQuery {
    page: Option<String>,
    page_size: Option<String>,
    #[serde(rename = "searchterm")]
    search_term: Option<String>,
    safe_list: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchQuery {
    status: Option<String>,
    page: Option<String>,
    page_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExportResults {
    results: Vec<ListElement>,
}

fn parse_page(raw: Option<&str>) -> ApiResult<usize> {
    let raw = raw
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("page number not specified"))?;
    raw.parse()
        .map_err(|_| ApiError::bad_request("could not parse page value"))
}

fn parse_page_size(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.parse().ok())
        .filter(|size| *size > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE)
}

/// 分页列出元素
///
/// GET /api/elements?page=&pageSize=&searchterm=&safeList=
async fn list_elements(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ElementsQuery>,
) -> ApiResult<Json<PaginatedElements>> {
    let page = parse_page(query.page.as_deref())?;
    let page_size = parse_page_size(query.page_size.as_deref());
    let safe = match query.safe_list.as_deref() {
        None | Some("") => false,
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::bad_request("safeList must be true or false"))?,
    };

    let result = state
        .ingest
        .list_page(page, page_size, safe, query.search_term.as_deref())
        .await?;
    Ok(Json(result))
}

/// 添加单个元素
///
/// POST /api/elements
async fn add_element(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let element: ListElement = decode_json(&body)?;
    state.ingest.add_one(element).await?;
    Ok(status_message(StatusCode::OK, "success"))
}

/// 更新元素
///
/// PUT /api/elements
async fn update_element(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let element: ListElement = decode_json(&body)?;
    state.ingest.update(element).await?;
    Ok(status_message(StatusCode::OK, "success"))
}

/// 按值删除元素
///
/// DELETE /api/elements
async fn delete_element(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let element: ListElement = decode_json(&body)?;
    state.ingest.delete(&element.value).await?;
    Ok(status_message(StatusCode::OK, "success"))
}

/// 分页列出投递状态
///
/// GET /api/batch?status=pending|failed|success|incomplete&page=&pageSize=
async fn list_batches(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchQuery>,
) -> ApiResult<Json<PaginatedStatus>> {
    let raw_status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("status not specified"))?;
    let statuses = DeliveryStatus::parse_filter(&raw_status.to_lowercase())
        .ok_or_else(|| ApiError::bad_request(format!("unknown status '{}'", raw_status)))?;
    let page = parse_page(query.page.as_deref())?;
    let page_size = parse_page_size(query.page_size.as_deref());

    Ok(Json(state.ingest.batch_page(page, page_size, &statuses).await?))
}

/// 导出全部元素
///
/// GET /api/export
async fn export_all(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ExportResults>> {
    Ok(Json(ExportResults {
        results: state.ingest.export_all().await?,
    }))
}

/// 按值精确查找
///
/// GET /api/export/lookup?key=
async fn lookup(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Vec<ListElement>>> {
    let key = query
        .key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ApiError::bad_request("no search term provided"))?;
    Ok(Json(state.ingest.lookup(&key).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_parsing() {
        assert!(parse_page(None).is_err());
        assert!(parse_page(Some("")).is_err());
        assert!(parse_page(Some("x")).is_err());
        assert_eq!(parse_page(Some("2")).unwrap(), 2);

        assert_eq!(parse_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("0")), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("50")), 50);
        assert_eq!(parse_page_size(Some("18446744073709551615")), MAX_PAGE_SIZE);
    }
}
