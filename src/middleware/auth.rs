//! 认证中间件
//!
//! 两类 token 的规则相同：缺少 header 返回 403，不匹配返回 401
//!
//! - `RequireApiKey`：运维接口，校验 `x-access-token` header
//! - `RequireInternalToken`：模块内部接口，校验 `x-internal-token` header

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::config::InternalToken;
use crate::error::ApiError;
use crate::state::AppState;

/// 运维 API header
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
/// 模块内部 API header
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// 运维 API 认证 Extractor
///
/// ```ignore
/// async fn list_modules(_auth: RequireApiKey, State(state): State<Arc<AppState>>) { .. }
/// ```
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key)
    }
}

/// 读取 token header；缺少或不是合法字符串时返回 403
fn token_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!(header = name, "Missing token header");
            ApiError::forbidden()
        })
}

/// 验证运维 API key
///
/// 缺少 `x-access-token` 返回 403，不匹配返回 401
pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    let provided = token_header(headers, ACCESS_TOKEN_HEADER)?;
    if provided == expected_key {
        Ok(RequireApiKey)
    } else {
        tracing::warn!("Invalid access token provided");
        Err(ApiError::unauthorized())
    }
}

/// 内部 token 认证 Extractor
///
/// 缺少 header 返回 403，token 不匹配（或尚未生成）返回 401
#[derive(Debug, Clone)]
pub struct RequireInternalToken;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireInternalToken {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_internal_token(&parts.headers, &state.token).await
    }
}

pub async fn verify_internal_token(
    headers: &HeaderMap,
    token: &InternalToken,
) -> Result<RequireInternalToken, ApiError> {
    let provided = token_header(headers, INTERNAL_TOKEN_HEADER)?;
    if token.verify(provided).await {
        Ok(RequireInternalToken)
    } else {
        tracing::warn!("Invalid internal token provided");
        Err(ApiError::unauthorized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn test_verify_api_key_success() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, HeaderValue::from_static("test-key"));

        let result = verify_api_key(&headers, "test-key");
        assert!(result.is_ok());
    }

    #[test]
    fn test_verify_api_key_wrong_key() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN_HEADER, HeaderValue::from_static("wrong-key"));

        let err = verify_api_key(&headers, "test-key").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_verify_api_key_missing() {
        let err = verify_api_key(&HeaderMap::new(), "test-key").unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_internal_token_missing_vs_wrong() {
        let dir = tempfile::tempdir().unwrap();
        let token = InternalToken::load(dir.path()).await;
        let value = token.ensure().await.unwrap();

        let missing = verify_internal_token(&HeaderMap::new(), &token).await.unwrap_err();
        assert_eq!(missing.status_code(), StatusCode::FORBIDDEN);

        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_static("nope"));
        let wrong = verify_internal_token(&headers, &token).await.unwrap_err();
        assert_eq!(wrong.status_code(), StatusCode::UNAUTHORIZED);

        headers.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_str(&value).unwrap());
        assert!(verify_internal_token(&headers, &token).await.is_ok());
    }
}
