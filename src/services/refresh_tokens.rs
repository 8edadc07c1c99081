// src/services/refresh_tokens.rs
//! Persistent refresh-token records
//!
//! One row per issuance; rows are never deleted, only flipped to revoked.
//! Only the SHA-256 digest of a token is stored. Every call goes to the
//! database so a revocation is visible to the very next request.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use tracing::{debug, info};

use crate::common::helpers::{format_timestamp, parse_timestamp, safe_token_log};
use crate::services::tokens::{TokenCodec, TokenError};

#[derive(Debug, Error)]
pub enum RefreshTokenError {
    #[error("refresh token not found")]
    NotFound,

    #[error("refresh token has been revoked")]
    Revoked,

    #[error("refresh token has expired")]
    Expired,

    #[error("refresh token could not be minted: {0}")]
    Token(#[from] TokenError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Stored refresh-token row
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: String,
    pub revoked: bool,
    pub created_at: Option<String>,
}

impl RefreshTokenRecord {
    /// Unparseable expiry counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        parse_timestamp(&self.expires_at).map_or(true, |exp| exp <= now)
    }
}

/// A newly issued refresh token; `token` is the only copy of the value
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenStore {
    db: SqlitePool,
    codec: TokenCodec,
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl RefreshTokenStore {
    pub fn new(db: SqlitePool, codec: TokenCodec) -> Self {
        Self { db, codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn issue(&self, user_id: i64) -> Result<RefreshToken, RefreshTokenError> {
        self.issue_at(user_id, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, RefreshTokenError> {
        let issued = self.codec.issue_at(user_id, now)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at, revoked, created_at)
            VALUES (?, ?, ?, 0, ?)
            "#,
        )
        .bind(user_id)
        .bind(hash_token(&issued.token))
        .bind(format_timestamp(issued.expires_at))
        .bind(format_timestamp(now))
        .execute(&self.db)
        .await?;

        debug!(
            user_id = user_id,
            token = %safe_token_log(&issued.token),
            expires_at = %issued.expires_at,
            "Refresh token persisted"
        );

        Ok(RefreshToken {
            user_id,
            token: issued.token,
            expires_at: issued.expires_at,
            revoked: false,
        })
    }

    /// Returns the owning user id when the token exists, is not revoked and
    /// has not expired
    pub async fn validate(&self, token: &str) -> Result<i64, RefreshTokenError> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<i64, RefreshTokenError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            "SELECT * FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.db)
        .await?
        .ok_or(RefreshTokenError::NotFound)?;

        if record.revoked {
            return Err(RefreshTokenError::Revoked);
        }
        if record.is_expired_at(now) {
            return Err(RefreshTokenError::Expired);
        }

        Ok(record.user_id)
    }

    /// Marks the token revoked. Revoking an already revoked token succeeds.
    pub async fn revoke(&self, token: &str) -> Result<(), RefreshTokenError> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RefreshTokenError::NotFound);
        }

        info!(token = %safe_token_log(token), "Refresh token revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::run_migrations;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> RefreshTokenStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool, false).await.unwrap();

        sqlx::query("INSERT INTO users (id, email, provider, status) VALUES (1, 'a@x.com', 'email', 'active')")
            .execute(&pool)
            .await
            .unwrap();

        RefreshTokenStore::new(pool, TokenCodec::refresh(b"refresh-secret"))
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let store = setup_store().await;
        let issued = store.issue(1).await.unwrap();

        assert!(!issued.revoked);
        assert_eq!(store.validate(&issued.token).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_only_digest_is_stored() {
        let store = setup_store().await;
        let issued = store.issue(1).await.unwrap();

        let (stored,): (String,) = sqlx::query_as("SELECT token_hash FROM refresh_tokens")
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert_ne!(stored, issued.token);
        assert_eq!(stored, hash_token(&issued.token));
    }

    #[tokio::test]
    async fn test_multiple_tokens_per_user_stay_valid() {
        let store = setup_store().await;
        let phone = store.issue(1).await.unwrap();
        let laptop = store.issue(1).await.unwrap();

        assert_ne!(phone.token, laptop.token);
        assert_eq!(store.validate(&phone.token).await.unwrap(), 1);
        assert_eq!(store.validate(&laptop.token).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let store = setup_store().await;
        assert!(matches!(
            store.validate("never-issued").await,
            Err(RefreshTokenError::NotFound)
        ));
        assert!(matches!(
            store.revoke("never-issued").await,
            Err(RefreshTokenError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = setup_store().await;
        let issued = store.issue(1).await.unwrap();

        store.revoke(&issued.token).await.unwrap();
        assert!(matches!(
            store.validate(&issued.token).await,
            Err(RefreshTokenError::Revoked)
        ));

        store.revoke(&issued.token).await.unwrap();
        assert!(matches!(
            store.validate(&issued.token).await,
            Err(RefreshTokenError::Revoked)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let store = setup_store().await;
        let issued_at = Utc::now() - Duration::days(8);
        let issued = store.issue_at(1, issued_at).await.unwrap();

        assert!(matches!(
            store.validate(&issued.token).await,
            Err(RefreshTokenError::Expired)
        ));
        assert_eq!(
            store
                .validate_at(&issued.token, issued_at + Duration::days(6))
                .await
                .unwrap(),
            1
        );
    }
}
