// src/services/credentials.rs
//! Email/password accounts
//!
//! Passwords are stored as bcrypt hashes. Hashing and comparison run on the
//! blocking pool since a single bcrypt call takes tens of milliseconds at
//! the default cost.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::models::{User, UserStatus};
use crate::common::helpers::{parse_timestamp, safe_email_log};
use crate::services::users::UserStore;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const VERIFY_CODE_TTL_MINUTES: i64 = 10;
/// Wrong codes tolerated before the current code is thrown away
pub const MAX_VERIFY_ATTEMPTS: i64 = 5;

static EMAIL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
static DUMMY_HASH: OnceLock<String> = OnceLock::new();

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no account for this email")]
    NotFound,

    #[error("password does not match")]
    WrongPassword,

    #[error("account is not active")]
    NotActive,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("password must be at least 6 characters")]
    WeakPassword,

    #[error("email is already registered")]
    AlreadyRegistered,

    #[error("verification code is invalid")]
    InvalidCode,

    #[error("verification code has expired")]
    CodeExpired,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a registration attempt
#[derive(Debug, Clone)]
pub enum Registration {
    /// A new pending account was created
    Created { user: User, code: String },
    /// The email belonged to a pending account; its code was replaced
    Resent { user: User, code: String },
}

impl Registration {
    pub fn user(&self) -> &User {
        match self {
            Registration::Created { user, .. } | Registration::Resent { user, .. } => user,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Registration::Created { code, .. } | Registration::Resent { code, .. } => code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CredentialAuthenticator {
    users: UserStore,
    bcrypt_cost: u32,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
        })
        .as_ref()
        .map_or(false, |re| re.is_match(email))
}

/// Four random digits, zero padded
pub fn generate_verify_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

fn fresh_code_unlike(previous: Option<&str>) -> String {
    loop {
        let code = generate_verify_code();
        if previous != Some(code.as_str()) {
            return code;
        }
    }
}

impl CredentialAuthenticator {
    pub fn new(users: UserStore, bcrypt_cost: u32) -> Self {
        Self { users, bcrypt_cost }
    }

    /// Checks an email/password pair. Only `active` accounts authenticate.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, CredentialError> {
        let email = normalize_email(email);
        let user = self.users.find_by_email(&email).await?;

        let Some(user) = user else {
            // Burn a comparison so unknown emails take as long as wrong passwords
            let _ = self.check_password(password, None).await;
            debug!(email = %safe_email_log(&email), "Login for unknown email");
            return Err(CredentialError::NotFound);
        };

        if !self
            .check_password(password, user.password_hash.clone())
            .await?
        {
            debug!(user_id = user.id, "Login with wrong password");
            return Err(CredentialError::WrongPassword);
        }

        if !user.is_active() {
            info!(user_id = user.id, status = %user.status(), "Login refused for inactive account");
            return Err(CredentialError::NotActive);
        }

        Ok(user)
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<Registration, CredentialError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(CredentialError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CredentialError::WeakPassword);
        }

        let expires_at = Utc::now() + Duration::minutes(VERIFY_CODE_TTL_MINUTES);

        if let Some(existing) = self.users.find_by_email(&email).await? {
            return match existing.status() {
                UserStatus::Pending => {
                    let code = fresh_code_unlike(existing.verify_code.as_deref());
                    self.users
                        .update_verification(existing.id, &code, expires_at)
                        .await?;
                    info!(
                        user_id = existing.id,
                        email = %safe_email_log(&email),
                        "Pending registration repeated, verification code regenerated"
                    );
                    let user = self.users.find_by_id(existing.id).await?.unwrap_or(existing);
                    Ok(Registration::Resent { user, code })
                }
                _ => {
                    warn!(email = %safe_email_log(&email), "Registration for an existing account");
                    Err(CredentialError::AlreadyRegistered)
                }
            };
        }

        let password_hash = self.hash_password(password).await?;
        let code = generate_verify_code();

        let user = match self
            .users
            .create_email_user(&email, &password_hash, &code, expires_at)
            .await
        {
            Ok(user) => user,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // Lost a race with a concurrent registration of the same email
                return Err(CredentialError::AlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            user_id = user.id,
            email = %safe_email_log(&email),
            "Pending account created"
        );
        Ok(Registration::Created { user, code })
    }

    /// Activates a pending account whose code matches and is unexpired
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<User, CredentialError> {
        self.verify_email_at(email, code, Utc::now()).await
    }

    pub async fn verify_email_at(
        &self,
        email: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<User, CredentialError> {
        let email = normalize_email(email);
        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(CredentialError::InvalidCode)?;

        if user.status() != UserStatus::Pending {
            return Err(CredentialError::InvalidCode);
        }
        if user.verify_code.is_none() {
            return Err(CredentialError::InvalidCode);
        }
        if user.verify_code.as_deref() != Some(code.trim()) {
            let attempts = self
                .users
                .record_failed_verification(user.id, MAX_VERIFY_ATTEMPTS)
                .await?;
            if attempts >= MAX_VERIFY_ATTEMPTS {
                warn!(
                    user_id = user.id,
                    attempts = attempts,
                    "Too many wrong verification codes, code discarded"
                );
            } else {
                debug!(user_id = user.id, attempts = attempts, "Wrong verification code");
            }
            return Err(CredentialError::InvalidCode);
        }
        let expired = user
            .verify_code_expires_at
            .as_deref()
            .and_then(parse_timestamp)
            .map_or(true, |exp| exp <= now);
        if expired {
            return Err(CredentialError::CodeExpired);
        }

        self.users.activate(user.id).await?;
        info!(user_id = user.id, "Email verified, account activated");

        self.users
            .find_by_id(user.id)
            .await?
            .ok_or(CredentialError::NotFound)
    }

    async fn hash_password(&self, password: &str) -> Result<String, CredentialError> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| CredentialError::Hash(e.to_string()))?
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    /// A missing hash (federated-only account) never matches
    async fn check_password(
        &self,
        password: &str,
        hash: Option<String>,
    ) -> Result<bool, CredentialError> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || match hash {
            Some(hash) => bcrypt::verify(password, &hash).unwrap_or(false),
            None => {
                let dummy = DUMMY_HASH
                    .get_or_init(|| bcrypt::hash("not-a-password", cost).unwrap_or_default());
                let _ = bcrypt::verify(password, dummy);
                false
            }
        })
        .await
        .map_err(|e| CredentialError::Hash(e.to_string()))
    }
}
