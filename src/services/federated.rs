// src/services/federated.rs
//! Third-party identity verification
//!
//! Identity tokens are introspected by the provider itself (Google's
//! tokeninfo endpoint) and then checked locally: issuer, expiry, audience
//! allow-list, and the presence of a subject and email.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::auth::models::AccountProvider;
use crate::common::config::GoogleConfig;
use crate::common::helpers::{safe_email_log, safe_token_log};

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const GOOGLE_SCOPES: &str = "openid email profile";

#[derive(Debug, Error)]
pub enum FederatedError {
    #[error("identity token rejected: {0}")]
    InvalidToken(String),

    #[error("identity token audience is not accepted: {0}")]
    UntrustedAudience(String),

    #[error("identity token is missing subject or email")]
    IncompleteProfile,

    #[error("{0} sign-in is not configured")]
    NotConfigured(FederatedProvider),

    #[error("identity provider unreachable: {0}")]
    Upstream(String),

    #[error("unsupported identity provider: {0}")]
    UnsupportedProvider(String),

    #[error("HTTP client could not be built: {0}")]
    Client(String),
}

/// Identity providers this service can federate with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FederatedProvider {
    Google,
}

impl FederatedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "google",
        }
    }

    /// Column in `users` holding this provider's subject id
    pub fn subject_column(&self) -> &'static str {
        match self {
            FederatedProvider::Google => "google_id",
        }
    }

    pub fn account_provider(&self) -> AccountProvider {
        match self {
            FederatedProvider::Google => AccountProvider::Google,
        }
    }
}

impl FromStr for FederatedProvider {
    type Err = FederatedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(FederatedProvider::Google),
            other => Err(FederatedError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for FederatedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity returned by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProfile {
    pub subject: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeExchangeResponse {
    id_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FederatedVerifier {
    client: Client,
    google: GoogleConfig,
}

impl FederatedVerifier {
    /// Every provider call is bounded by `timeout`
    pub fn new(google: GoogleConfig, timeout: Duration) -> Result<Self, FederatedError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FederatedError::Client(e.to_string()))?;

        Ok(Self { client, google })
    }

    pub fn verify_audience(&self, aud: &str) -> bool {
        self.google.allowed_audiences.iter().any(|a| a == aud)
    }

    /// Introspects an identity token with the provider and validates its claims
    pub async fn verify(
        &self,
        provider: FederatedProvider,
        id_token: &str,
    ) -> Result<FederatedProfile, FederatedError> {
        match provider {
            FederatedProvider::Google => self.verify_google(id_token).await,
        }
    }

    async fn verify_google(&self, id_token: &str) -> Result<FederatedProfile, FederatedError> {
        if id_token.trim().is_empty() {
            return Err(FederatedError::InvalidToken("empty id_token".to_string()));
        }

        debug!(
            token = %safe_token_log(id_token),
            "Validating Google identity token with tokeninfo endpoint"
        );

        let response = self
            .client
            .get(&self.google.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, endpoint = %self.google.tokeninfo_url, "HTTP error contacting Google tokeninfo endpoint");
                FederatedError::Upstream(e.to_string())
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(http_status = %status, "Google tokeninfo rejected identity token");
            return Err(FederatedError::InvalidToken(format!(
                "tokeninfo returned {}",
                status.as_u16()
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Google tokeninfo response");
            FederatedError::InvalidToken("malformed tokeninfo response".to_string())
        })?;

        self.profile_from_claims(&body)
    }

    fn profile_from_claims(&self, claims: &Value) -> Result<FederatedProfile, FederatedError> {
        let issuer = str_claim(claims, "iss").unwrap_or_default();
        if !GOOGLE_ISSUERS.contains(&issuer.as_str()) {
            warn!(issuer = %issuer, "Google token has unexpected issuer");
            return Err(FederatedError::InvalidToken("unexpected issuer".to_string()));
        }

        // tokeninfo encodes numbers as strings
        let exp = claims.get("exp").and_then(|v| match v {
            Value::String(s) => s.parse::<i64>().ok(),
            other => other.as_i64(),
        });
        let now = Utc::now().timestamp();
        match exp {
            Some(exp) if exp > now => {}
            Some(exp) => {
                warn!(token_exp = exp, current_time = now, "Google token has expired");
                return Err(FederatedError::InvalidToken("token has expired".to_string()));
            }
            None => {
                return Err(FederatedError::InvalidToken("token has no expiry".to_string()));
            }
        }

        let aud = str_claim(claims, "aud").unwrap_or_default();
        if !self.verify_audience(&aud) {
            warn!(
                token_audience = %aud,
                allowed = self.google.allowed_audiences.len(),
                "Google token audience validation failed - rejecting token"
            );
            return Err(FederatedError::UntrustedAudience(aud));
        }

        let subject = str_claim(claims, "sub").unwrap_or_default();
        let email = str_claim(claims, "email").unwrap_or_default();
        if subject.is_empty() || email.is_empty() {
            warn!(
                has_email = !email.is_empty(),
                has_sub = !subject.is_empty(),
                "Google token missing required fields (email/sub)"
            );
            return Err(FederatedError::IncompleteProfile);
        }

        let email_verified = match claims.get("email_verified") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };

        info!(
            email = %safe_email_log(&email),
            email_verified = email_verified,
            "Google identity token verified"
        );

        Ok(FederatedProfile {
            subject,
            email,
            email_verified,
            name: str_claim(claims, "name"),
            picture: str_claim(claims, "picture"),
        })
    }

    /// Where to send the browser to start the redirect handshake
    pub fn authorization_url(
        &self,
        provider: FederatedProvider,
        state: &str,
    ) -> Result<String, FederatedError> {
        match provider {
            FederatedProvider::Google => {
                let client_id = self
                    .google
                    .client_id
                    .as_deref()
                    .ok_or(FederatedError::NotConfigured(provider))?;

                let auth_url = format!(
                    "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
                    self.google.auth_url,
                    urlencoding::encode(client_id),
                    urlencoding::encode(&self.google.callback_url),
                    urlencoding::encode(GOOGLE_SCOPES),
                    urlencoding::encode(state)
                );

                debug!(scopes = GOOGLE_SCOPES, "Generated Google OAuth authorization URL");
                Ok(auth_url)
            }
        }
    }

    /// Trades an authorization code for the provider's identity token
    pub async fn exchange_code(
        &self,
        provider: FederatedProvider,
        code: &str,
    ) -> Result<String, FederatedError> {
        match provider {
            FederatedProvider::Google => {
                let (Some(client_id), Some(client_secret)) = (
                    self.google.client_id.as_deref(),
                    self.google.client_secret.as_deref(),
                ) else {
                    return Err(FederatedError::NotConfigured(provider));
                };

                let params = [
                    ("code", code),
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("redirect_uri", self.google.callback_url.as_str()),
                    ("grant_type", "authorization_code"),
                ];

                debug!("Exchanging authorization code for tokens");

                let response = self
                    .client
                    .post(&self.google.token_url)
                    .form(&params)
                    .send()
                    .await
                    .map_err(|e| {
                        error!(error = %e, "HTTP error contacting Google token endpoint");
                        FederatedError::Upstream(e.to_string())
                    })?;

                let status = response.status();
                if !status.is_success() {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    warn!(status = %status, error = %error_text, "Token exchange failed");
                    return Err(FederatedError::InvalidToken(format!(
                        "code exchange returned {}",
                        status.as_u16()
                    )));
                }

                let body = response.json::<CodeExchangeResponse>().await.map_err(|e| {
                    warn!(error = %e, "Malformed token exchange response");
                    FederatedError::InvalidToken("malformed token response".to_string())
                })?;

                body.id_token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| FederatedError::InvalidToken("no id_token in response".to_string()))
            }
        }
    }
}

fn str_claim(claims: &Value, key: &str) -> Option<String> {
    claims
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
