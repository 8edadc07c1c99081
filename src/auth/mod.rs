//! # Auth Module
//!
//! Everything a client needs to obtain and keep a session:
//! - Email/password registration, verification and login
//! - Access/refresh token issuance, refresh and revocation
//! - Federated sign-in, both by posted identity token and by redirect
//! - `AuthedUser` extractor for protected routes

pub mod extractors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;


pub use routes::auth_routes;
