//! 模块反向代理
//!
//! 未被静态路由匹配的请求落到这里：
//! `/api/...` 需要认证并查找 secure 路由，`/ingress/...` 查找非 secure 路由。
//! 路径精确匹配，命中后转发 method、header（去掉 hop-by-hop 与控制器凭据）与 body。

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::constants::MAX_PROXY_BODY_BYTES;
use crate::error::ApiError;
use crate::middleware::auth::{verify_api_key, ACCESS_TOKEN_HEADER, INTERNAL_TOKEN_HEADER};
use crate::services::RouterKind;
use crate::state::AppState;

const API_PREFIX: &str = "/api";
const INGRESS_PREFIX: &str = "/ingress";

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "content-length"
    )
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// 发往模块的请求头；控制器凭据不外传
fn upstream_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = forwardable(headers);
    forwarded.remove(ACCESS_TOKEN_HEADER);
    forwarded.remove(INTERNAL_TOKEN_HEADER);
    forwarded
}

/// 拆出路由类型与模块路径
fn split_route(path: &str) -> Option<(RouterKind, &str)> {
    if let Some(rest) = path.strip_prefix(API_PREFIX) {
        if rest.starts_with('/') {
            return Some((RouterKind::Api, rest));
        }
    }
    if let Some(rest) = path.strip_prefix(INGRESS_PREFIX) {
        if rest.starts_with('/') {
            return Some((RouterKind::Ingress, rest));
        }
    }
    None
}

/// 代理入口（作为 router fallback）
pub async fn module_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    let Some((router, module_path)) = split_route(&path) else {
        return ApiError::not_found(format!("route {}", path)).into_response();
    };

    if router == RouterKind::Api {
        if let Err(e) = verify_api_key(request.headers(), &state.api_key) {
            return e.into_response();
        }
    }

    let Some(target) = state.routes.resolve(router, module_path).await else {
        debug!(path = %path, "No module route installed");
        return ApiError::not_found(format!("route {}", path)).into_response();
    };

    let url = match request.uri().query() {
        Some(query) => format!("{}?{}", target, query),
        None => target,
    };

    let method = request.method().clone();
    let headers = upstream_request_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_PROXY_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    debug!(method = %method, path = %path, target = %url, "Proxying module request");

    let upstream = match state
        .proxy_client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            warn!(target = %url, error = %e, "Module request failed");
            return (StatusCode::BAD_GATEWAY, "Module is not reachable").into_response();
        }
    };

    let status = upstream.status();
    let response_headers = forwardable(upstream.headers());
    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(target = %url, error = %e, "Failed to read module response");
            return (StatusCode::BAD_GATEWAY, "Failed to read module response").into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}
