//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /auth/login` - Email/password login
/// - `POST /auth/register` - Create (or resend verification for) an account
/// - `POST /auth/verify-email` - Activate a pending account
/// - `POST /auth/refresh` - New access token from a refresh token
/// - `POST /auth/logout` - Revoke refresh token and clear cookies
/// - `POST /auth/federated` - Sign in with a provider identity token
/// - `GET /auth/:provider` - Begin redirect sign-in
/// - `GET /auth/:provider/callback` - Finish redirect sign-in
/// - `GET /users/me` - Current user
/// - `GET /health` - Liveness
pub fn auth_routes() -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/register", post(handlers::register))
        .route("/auth/verify-email", post(handlers::verify_email))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/federated", post(handlers::federated_login))
        .route("/auth/:provider", get(handlers::federated_begin))
        .route("/auth/:provider/callback", get(handlers::federated_callback))
        .route("/users/me", get(handlers::me))
        .route("/health", get(handlers::health))
}
