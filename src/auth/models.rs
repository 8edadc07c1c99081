//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// JWT claims structure shared by access and refresh tokens
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    /// User id, decimal
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    /// Unique per issuance so two tokens minted in the same second differ
    pub jti: String,
}

/// How an account authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountProvider {
    Email,
    Google,
    Apple,
}

impl AccountProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountProvider::Email => "email",
            AccountProvider::Google => "google",
            AccountProvider::Apple => "apple",
        }
    }
}

impl FromStr for AccountProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AccountProvider::Email),
            "google" => Ok(AccountProvider::Google),
            "apple" => Ok(AccountProvider::Apple),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Pending,
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User database model
///
/// Credentials and verification state never leave the server.
#[derive(FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
    pub google_id: Option<String>,
    pub apple_id: Option<String>,
    pub provider: String,
    pub status: String,
    #[serde(skip_serializing, default)]
    pub verify_code: Option<String>,
    #[serde(skip_serializing, default)]
    pub verify_code_expires_at: Option<String>,
    /// Wrong codes entered against the current verification code
    #[serde(skip_serializing, default)]
    pub verify_attempts: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl User {
    /// Unknown status strings are treated as inactive
    pub fn status(&self) -> UserStatus {
        self.status.parse().unwrap_or(UserStatus::Inactive)
    }

    pub fn is_active(&self) -> bool {
        self.status() == UserStatus::Active
    }
}

/// Access + refresh token pair handed to clients
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

// ---- Requests ----

#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Deserialize, Debug)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct RevokeTokenRequest {
    pub refresh_token: Option<String>,
}

/// Identity token posted directly by a mobile or SPA client
#[derive(Deserialize, Debug)]
pub struct FederatedAuthRequest {
    pub id_token: String,
    #[serde(default)]
    pub provider: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct BeginAuthQuery {
    pub redirect: Option<String>,
    pub redirect_uri: Option<String>,
}

impl BeginAuthQuery {
    /// `redirect` wins over `redirect_uri`; blanks are ignored
    pub fn redirect_target(&self) -> Option<&str> {
        [self.redirect.as_deref(), self.redirect_uri.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

// ---- Responses ----

#[derive(Serialize, Debug)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthResponse {
    pub fn new(user: User, tokens: TokenPair) -> Self {
        Self {
            user,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
pub enum RegisterResponse {
    Created(AuthResponse),
    Resent { resent: bool, message: String },
}

#[derive(Serialize, Debug)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}
