//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::common::{ApiError, AppState};
use crate::services::session::TOKEN_COOKIE;

/// Authenticated caller
///
/// Resolved from `Authorization: Bearer <access token>`, falling back to the
/// `token` cookie set by the browser sign-in flow. Any decode, signature or
/// expiry failure is rejected with 401 before the handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthedUser {
    pub user_id: i64,
}

/// Bearer token first, then the `token` cookie
pub fn access_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(TOKEN_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|t| !t.is_empty())
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let Some(token) = access_token_from_headers(&parts.headers) else {
            warn!("Authentication failed: no bearer token or token cookie");
            return Err(ApiError::Unauthorized("missing auth".into()));
        };

        let user_id = app_state.auth.authenticate_access_token(&token)?;
        debug!(user_id = user_id, "Request authenticated");

        Ok(AuthedUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::COOKIE;

    #[test]
    fn test_bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer from-header".parse().unwrap());
        headers.insert(COOKIE, "token=from-cookie".parse().unwrap());
        assert_eq!(
            access_token_from_headers(&headers).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_cookie_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, "other=1; token=from-cookie".parse().unwrap());
        assert_eq!(
            access_token_from_headers(&headers).as_deref(),
            Some("from-cookie")
        );
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let mut headers = HeaderMap::new();
        assert!(access_token_from_headers(&headers).is_none());

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(access_token_from_headers(&headers).is_none());

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert!(access_token_from_headers(&headers).is_none());
    }
}
