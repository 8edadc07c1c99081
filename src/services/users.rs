// src/services/users.rs
//! User record store
//!
//! Plain data access over the `users` table. Policy (who may log in, how
//! accounts link) lives with the callers.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::auth::models::{AccountProvider, User, UserStatus};
use crate::common::helpers::format_timestamp;
use crate::services::federated::{FederatedProfile, FederatedProvider};

#[derive(Debug, Clone)]
pub struct UserStore {
    db: SqlitePool,
}

impl UserStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.db)
            .await
    }

    pub async fn find_by_subject(
        &self,
        provider: FederatedProvider,
        subject: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT * FROM users WHERE {} = ?", provider.subject_column());
        sqlx::query_as::<_, User>(&sql)
            .bind(subject)
            .fetch_optional(&self.db)
            .await
    }

    /// Inserts a pending email account
    pub async fn create_email_user(
        &self,
        email: &str,
        password_hash: &str,
        verify_code: &str,
        verify_code_expires_at: DateTime<Utc>,
    ) -> Result<User, sqlx::Error> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, provider, status, verify_code,
                               verify_code_expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(AccountProvider::Email.as_str())
        .bind(UserStatus::Pending.as_str())
        .bind(verify_code)
        .bind(format_timestamp(verify_code_expires_at))
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        self.fetch_inserted(result.last_insert_rowid()).await
    }

    /// Inserts an active account linked to a federated subject.
    /// Fails with a unique violation when the subject or email is taken.
    pub async fn create_federated_user(
        &self,
        provider: FederatedProvider,
        profile: &FederatedProfile,
    ) -> Result<User, sqlx::Error> {
        let now = format_timestamp(Utc::now());
        let sql = format!(
            r#"
            INSERT INTO users (email, name, avatar, {}, provider, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            provider.subject_column()
        );
        let result = sqlx::query(&sql)
            .bind(&profile.email)
            .bind(profile.name.as_deref())
            .bind(profile.picture.as_deref())
            .bind(&profile.subject)
            .bind(provider.account_provider().as_str())
            .bind(UserStatus::Active.as_str())
            .bind(&now)
            .bind(&now)
            .execute(&self.db)
            .await?;

        self.fetch_inserted(result.last_insert_rowid()).await
    }

    async fn fetch_inserted(&self, id: i64) -> Result<User, sqlx::Error> {
        debug!(user_id = id, "Inserted user, fetching record");
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await
    }

    /// Replaces the verification code of a pending account
    pub async fn update_verification(
        &self,
        id: i64,
        verify_code: &str,
        verify_code_expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET verify_code = ?, verify_code_expires_at = ?, verify_attempts = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(verify_code)
        .bind(format_timestamp(verify_code_expires_at))
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Moves an account to `active` and clears any verification code
    pub async fn activate(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET status = ?, verify_code = NULL, verify_code_expires_at = NULL,
                verify_attempts = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(UserStatus::Active.as_str())
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Counts a wrong verification code. Once `max_attempts` is reached the
    /// code is discarded, so only a resend can unlock the account.
    ///
    /// Returns the updated attempt count.
    pub async fn record_failed_verification(
        &self,
        id: i64,
        max_attempts: i64,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users
            SET verify_attempts = verify_attempts + 1,
                verify_code = CASE WHEN verify_attempts + 1 >= ? THEN NULL ELSE verify_code END,
                verify_code_expires_at = CASE WHEN verify_attempts + 1 >= ? THEN NULL
                                              ELSE verify_code_expires_at END,
                updated_at = ?
            WHERE id = ?
            RETURNING verify_attempts
            "#,
        )
        .bind(max_attempts)
        .bind(max_attempts)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .fetch_one(&self.db)
        .await
    }

    /// Turns an email account into a federated one: the password hash and
    /// any verification state are dropped
    pub async fn convert_to_federated(
        &self,
        id: i64,
        provider: FederatedProvider,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = NULL, verify_code = NULL, verify_code_expires_at = NULL,
                verify_attempts = 0, provider = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider.account_provider().as_str())
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Attaches a federated subject to an existing account and refreshes
    /// the profile fields the provider supplied
    pub async fn link_subject(
        &self,
        id: i64,
        provider: FederatedProvider,
        profile: &FederatedProfile,
    ) -> Result<(), sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE users
            SET {} = ?, name = COALESCE(?, name), avatar = COALESCE(?, avatar), updated_at = ?
            WHERE id = ?
            "#,
            provider.subject_column()
        );
        sqlx::query(&sql)
            .bind(&profile.subject)
            .bind(profile.name.as_deref())
            .bind(profile.picture.as_deref())
            .bind(format_timestamp(Utc::now()))
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::run_migrations;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> UserStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool, false).await.unwrap();
        UserStore::new(pool)
    }

    fn profile(subject: &str, email: &str) -> FederatedProfile {
        FederatedProfile {
            subject: subject.to_string(),
            email: email.to_string(),
            email_verified: true,
            name: Some("Ada".to_string()),
            picture: None,
        }
    }

    #[tokio::test]
    async fn test_create_email_user_is_pending() {
        let store = setup_store().await;
        let user = store
            .create_email_user("a@x.com", "hash", "0042", Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        assert_eq!(user.email.as_deref(), Some("a@x.com"));
        assert_eq!(user.status(), UserStatus::Pending);
        assert_eq!(user.provider, "email");
        assert_eq!(user.verify_code.as_deref(), Some("0042"));

        store.activate(user.id).await.unwrap();
        let user = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(user.is_active());
        assert!(user.verify_code.is_none());
    }

    #[tokio::test]
    async fn test_federated_subject_lookup() {
        let store = setup_store().await;
        let created = store
            .create_federated_user(FederatedProvider::Google, &profile("sub-1", "g@x.com"))
            .await
            .unwrap();
        assert_eq!(created.google_id.as_deref(), Some("sub-1"));
        assert!(created.is_active());

        let found = store
            .find_by_subject(FederatedProvider::Google, "sub-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, created.id);
        assert!(store
            .find_by_subject(FederatedProvider::Google, "sub-2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_link_subject_keeps_existing_name_when_absent() {
        let store = setup_store().await;
        let user = store
            .create_email_user("a@x.com", "hash", "0042", Utc::now())
            .await
            .unwrap();

        let mut linked = profile("sub-9", "a@x.com");
        linked.name = None;
        linked.picture = Some("https://img/p.png".to_string());
        store
            .link_subject(user.id, FederatedProvider::Google, &linked)
            .await
            .unwrap();

        let user = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(user.google_id.as_deref(), Some("sub-9"));
        assert_eq!(user.avatar.as_deref(), Some("https://img/p.png"));
        assert!(user.name.is_none());
    }
}
