//! Authentication handlers

use axum::{
    extract::{rejection::JsonRejection, Extension, Json, Path, Query},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::extractors::AuthedUser;
use super::models::{
    AuthResponse, BeginAuthQuery, CallbackQuery, FederatedAuthRequest, LoginRequest,
    RefreshTokenRequest, RefreshTokenResponse, RegisterRequest, RegisterResponse,
    RevokeTokenRequest, User, VerifyEmailRequest,
};
use crate::common::{safe_email_log, ApiError, AppState};
use crate::services::session::REFRESH_COOKIE;
use crate::services::FederatedProvider;

/// Unwraps a JSON body, turning axum's rejection into a 400 with our
/// error shape
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        debug!(error = %rejection, "Rejected request body");
        ApiError::BadRequest(rejection.body_text())
    })
}

fn provider_from_path(raw: &str) -> Result<FederatedProvider, ApiError> {
    raw.parse().map_err(|_| {
        warn!(provider = %raw, "Unknown identity provider requested");
        ApiError::NotFound(format!("Unknown identity provider: {}", raw))
    })
}

/// 302 with a Location header; `Redirect::to` would answer 303
fn found(location: String) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

/// POST /auth/login
///
/// # Request Body
/// ```json
/// { "email": "a@x.com", "password": "abcdef" }
/// ```
///
/// # Response
/// ```json
/// { "user": { ... }, "access_token": "<jwt>", "refresh_token": "<jwt>" }
/// ```
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let payload = json_body(payload)?;
    debug!(email = %safe_email_log(&payload.email), "Received password login request");

    let response = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(response))
}

/// POST /auth/register
///
/// New addresses get a pending account plus a token pair. Repeating the
/// call for a still-pending address answers `{"resent": true, ...}`.
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let payload = json_body(payload)?;
    info!(email = %safe_email_log(&payload.email), "Received registration request");

    let response = state
        .auth
        .register(&payload.email, &payload.password)
        .await?;
    Ok(Json(response))
}

/// POST /auth/verify-email
pub async fn verify_email(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<VerifyEmailRequest>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let payload = json_body(payload)?;
    let user = state
        .auth
        .verify_email(&payload.email, &payload.code)
        .await?;
    Ok(Json(user))
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<Json<RefreshTokenResponse>, ApiError> {
    let payload = json_body(payload)?;
    let response = state.auth.refresh(&payload.refresh_token).await?;
    Ok(Json(response))
}

/// POST /auth/logout
///
/// Revokes the refresh token from the body, or failing that from the
/// `refresh_token` cookie, and clears the token cookies. Always 200.
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<RevokeTokenRequest>, JsonRejection>,
) -> (CookieJar, Json<Value>) {
    let from_body = payload.ok().and_then(|Json(body)| body.refresh_token);
    let from_cookie = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    let token = from_body.filter(|t| !t.is_empty()).or(from_cookie);

    state.auth.logout(token.as_deref()).await;

    let jar = state.auth.session().clear_token_cookies(jar);
    (jar, Json(json!({ "message": "Logout successful" })))
}

/// POST /auth/federated
///
/// # Request Body
/// ```json
/// { "id_token": "<provider id token>", "provider": "google" }
/// ```
pub async fn federated_login(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<FederatedAuthRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let payload = json_body(payload)?;
    let provider = match payload.provider.as_deref() {
        None => FederatedProvider::Google,
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("Unknown identity provider: {}", raw)))?,
    };
    info!(provider = %provider, "Received identity token sign-in");

    let response = state
        .auth
        .federated_direct(provider, &payload.id_token)
        .await?;
    Ok(Json(response))
}

/// GET /auth/:provider?redirect=URL
///
/// Stores the sign-in session in a signed cookie and sends the browser to
/// the provider's consent page.
pub async fn federated_begin(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<BeginAuthQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let provider = provider_from_path(&provider)?;
    let (authorization_url, session) = state
        .auth
        .begin_redirect(provider, query.redirect_target())?;

    let carrier = state.auth.session();
    let jar = carrier
        .remember(carrier.jar(&headers), &session)
        .map_err(|e| {
            error!(error = %e, "Failed to store sign-in session");
            ApiError::InternalServer("could not start sign-in".to_string())
        })?;

    Ok((jar, found(authorization_url)).into_response())
}

/// GET /auth/:provider/callback
///
/// Completes the handshake, sets the token cookies and redirects to the
/// remembered destination.
pub async fn federated_callback(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let provider = provider_from_path(&provider)?;
    let carrier = state.auth.session();
    let signed = carrier.jar(&headers);
    let session = carrier.recall(&signed);

    let outcome = state
        .auth
        .complete_redirect(provider, session, &query)
        .await?;

    let signed = carrier.forget(signed);
    let jar = carrier.set_token_cookies(jar, &outcome.tokens, outcome.deep_link);

    Ok((signed, jar, found(outcome.location)).into_response())
}

/// GET /users/me
pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<User>, ApiError> {
    let user = state.auth.current_user(authed.user_id).await?;
    Ok(Json(user))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
