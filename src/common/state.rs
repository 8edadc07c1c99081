// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::services::AuthService;
use crate::common::config::AppConfig;
use crate::services::{
    FederatedError, FederatedVerifier, LogNotifier, RefreshTokenStore, SessionCarrier,
    SessionError, TokenCodec, UserStore, VerificationNotifier,
};

/// Startup failures while wiring the services together
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Federated(#[from] FederatedError),
}

/// Read-only after startup; handlers receive it through an `Extension`
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(config: AppConfig, db: SqlitePool) -> Result<Self, StateError> {
        Self::with_notifier(config, db, Arc::new(LogNotifier))
    }

    pub fn with_notifier(
        config: AppConfig,
        db: SqlitePool,
        notifier: Arc<dyn VerificationNotifier>,
    ) -> Result<Self, StateError> {
        let users = UserStore::new(db.clone());
        let refresh_tokens =
            RefreshTokenStore::new(db.clone(), TokenCodec::refresh(&config.secrets.refresh));
        let federated = FederatedVerifier::new(config.google.clone(), config.provider_timeout)?;
        let session = SessionCarrier::new(&config)?;

        let auth = AuthService::new(&config, users, refresh_tokens, federated, session, notifier);

        Ok(Self {
            db,
            config: Arc::new(config),
            auth,
        })
    }
}
