//! Authentication flows
//!
//! `AuthService` composes the credential, token, refresh-store, federated
//! and notifier services into the flows the HTTP handlers expose. Every
//! flow is a single attempt; nothing here retries.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::models::{
    AuthResponse, CallbackQuery, RefreshTokenResponse, RegisterResponse, TokenPair, User,
};
use crate::common::config::AppConfig;
use crate::common::helpers::{safe_email_log, safe_token_log};
use crate::common::ApiError;
use crate::services::credentials::normalize_email;
use crate::services::rate_limit::{AttemptLimiter, RateLimitConfig, RateLimitResult};
use crate::services::{
    CredentialAuthenticator, CredentialError, FederatedError, FederatedProfile,
    FederatedProvider, FederatedVerifier, OAuthSession, RefreshTokenError, RefreshTokenStore,
    Registration, SessionCarrier, TokenCodec, TokenError, UserStore, VerificationNotifier,
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_TOKEN: &str = "Invalid or expired token";

/// Where a completed redirect sign-in sends the browser
#[derive(Debug, Clone)]
pub struct RedirectOutcome {
    pub user: User,
    pub tokens: TokenPair,
    pub location: String,
    pub deep_link: bool,
}

#[derive(Clone)]
pub struct AuthService {
    users: UserStore,
    credentials: CredentialAuthenticator,
    access: TokenCodec,
    refresh_tokens: RefreshTokenStore,
    federated: FederatedVerifier,
    session: SessionCarrier,
    notifier: Arc<dyn VerificationNotifier>,
    verify_limiter: AttemptLimiter,
}

impl AuthService {
    pub fn new(
        config: &AppConfig,
        users: UserStore,
        refresh_tokens: RefreshTokenStore,
        federated: FederatedVerifier,
        session: SessionCarrier,
        notifier: Arc<dyn VerificationNotifier>,
    ) -> Self {
        Self {
            credentials: CredentialAuthenticator::new(users.clone(), config.bcrypt_cost),
            access: TokenCodec::access(&config.secrets.access),
            users,
            refresh_tokens,
            federated,
            session,
            notifier,
            verify_limiter: AttemptLimiter::new(RateLimitConfig {
                enabled: config.verify_attempt_limit > 0,
                limit: config.verify_attempt_limit,
                window: config.verify_attempt_window,
            }),
        }
    }

    pub fn session(&self) -> &SessionCarrier {
        &self.session
    }

    pub fn verify_limiter(&self) -> &AttemptLimiter {
        &self.verify_limiter
    }

    /// Mints an access token and persists a fresh refresh token
    async fn issue_pair(&self, user_id: i64) -> Result<TokenPair, ApiError> {
        let access = self.access.issue(user_id).map_err(|e| {
            error!(error = %e, user_id = user_id, "Access token signing failed");
            ApiError::InternalServer("token issuance failed".to_string())
        })?;

        let refresh = self.refresh_tokens.issue(user_id).await.map_err(|e| {
            error!(error = %e, user_id = user_id, "Refresh token issuance failed");
            match e {
                RefreshTokenError::Database(db) => ApiError::DatabaseError(db),
                other => ApiError::InternalServer(other.to_string()),
            }
        })?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    // ---- Password flows ----

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let user = self
            .credentials
            .authenticate(email, password)
            .await
            .map_err(credential_error)?;

        let tokens = self.issue_pair(user.id).await?;
        info!(
            user_id = user.id,
            email = %safe_email_log(email),
            "User logged in with password"
        );
        Ok(AuthResponse::new(user, tokens))
    }

    /// New emails get a pending account and a token pair; emails that are
    /// still pending only get a new verification code
    pub async fn register(&self, email: &str, password: &str) -> Result<RegisterResponse, ApiError> {
        let registration = self
            .credentials
            .register(email, password)
            .await
            .map_err(credential_error)?;

        let address = registration
            .user()
            .email
            .clone()
            .unwrap_or_else(|| normalize_email(email));
        if let Err(e) = self
            .notifier
            .send_verification_code(&address, registration.code())
            .await
        {
            warn!(error = %e, email = %safe_email_log(&address), "Verification code delivery failed");
        }

        match registration {
            Registration::Created { user, .. } => {
                let tokens = self.issue_pair(user.id).await?;
                Ok(RegisterResponse::Created(AuthResponse::new(user, tokens)))
            }
            Registration::Resent { .. } => Ok(RegisterResponse::Resent {
                resent: true,
                message: "Verification code sent again".to_string(),
            }),
        }
    }

    /// Attempts are limited per email on top of the per-code counter the
    /// credential store keeps
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<User, ApiError> {
        let key = normalize_email(email);
        if let RateLimitResult::Limited { retry_after } = self.verify_limiter.check(&key).await {
            warn!(
                email = %safe_email_log(&key),
                retry_after = retry_after,
                "Verification attempts rate limited"
            );
            return Err(ApiError::TooManyRequests {
                message: "Too many verification attempts, try again later".to_string(),
                retry_after,
            });
        }

        let user = self
            .credentials
            .verify_email(email, code)
            .await
            .map_err(credential_error)?;
        self.verify_limiter.clear(&key).await;
        Ok(user)
    }

    // ---- Token flows ----

    /// Both the signature and the stored record must accept the token.
    /// The presented refresh token is returned unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse, ApiError> {
        let subject = self
            .refresh_tokens
            .codec()
            .verify(refresh_token)
            .map_err(|e| token_error(e, refresh_token))?;

        let owner = self
            .refresh_tokens
            .validate(refresh_token)
            .await
            .map_err(|e| refresh_error(e, refresh_token))?;

        if owner != subject {
            warn!(
                subject = subject,
                owner = owner,
                "Refresh token subject does not match stored owner"
            );
            return Err(ApiError::Unauthorized(INVALID_TOKEN.to_string()));
        }

        let access = self.access.issue(owner).map_err(|e| {
            error!(error = %e, user_id = owner, "Access token signing failed");
            ApiError::InternalServer("token issuance failed".to_string())
        })?;

        debug!(user_id = owner, "Access token refreshed");
        Ok(RefreshTokenResponse {
            access_token: access.token,
            refresh_token: refresh_token.to_string(),
        })
    }

    /// Revokes the refresh token when one is presented. Never fails.
    pub async fn logout(&self, refresh_token: Option<&str>) {
        let Some(token) = refresh_token.filter(|t| !t.is_empty()) else {
            debug!("Logout without a refresh token");
            return;
        };

        match self.refresh_tokens.revoke(token).await {
            Ok(()) => info!(token = %safe_token_log(token), "User logged out"),
            Err(RefreshTokenError::NotFound) => {
                debug!(token = %safe_token_log(token), "Logout with unknown refresh token")
            }
            Err(e) => error!(error = %e, "Refresh token revocation failed during logout"),
        }
    }

    /// Resolves a bearer access token to its user id
    pub fn authenticate_access_token(&self, token: &str) -> Result<i64, ApiError> {
        self.access.verify(token).map_err(|e| token_error(e, token))
    }

    pub async fn current_user(&self, user_id: i64) -> Result<User, ApiError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))
    }

    // ---- Federated flows ----

    /// Mobile/SPA clients post a provider identity token directly
    pub async fn federated_direct(
        &self,
        provider: FederatedProvider,
        id_token: &str,
    ) -> Result<AuthResponse, ApiError> {
        let profile = self
            .federated
            .verify(provider, id_token)
            .await
            .map_err(|e| federated_error(e, false))?;

        let user = self.link_or_create(provider, profile).await?;
        let tokens = self.issue_pair(user.id).await?;

        info!(
            user_id = user.id,
            provider = %provider,
            "User authenticated with identity token"
        );
        Ok(AuthResponse::new(user, tokens))
    }

    /// Finds the account owning the federated subject, or creates one.
    ///
    /// Creation is insert-first. A unique violation is resolved by
    /// `recover_from_conflict`.
    pub async fn link_or_create(
        &self,
        provider: FederatedProvider,
        mut profile: FederatedProfile,
    ) -> Result<User, ApiError> {
        profile.email = normalize_email(&profile.email);

        if let Some(user) = self.users.find_by_subject(provider, &profile.subject).await? {
            debug!(user_id = user.id, provider = %provider, "Found existing federated account");
            return self.refresh_linked(user, provider, &profile).await;
        }

        match self.users.create_federated_user(provider, &profile).await {
            Ok(user) => {
                info!(
                    user_id = user.id,
                    email = %safe_email_log(&profile.email),
                    provider = %provider,
                    "Created account from federated identity"
                );
                Ok(user)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                self.recover_from_conflict(provider, &profile).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The insert collided: either a concurrent sign-in created the subject
    /// row (re-select it), or the email belongs to an existing account.
    ///
    /// An email account is linked only when the provider vouches for the
    /// email. A still-pending account never proved ownership of the address,
    /// so its password and verification code are discarded and whoever
    /// registered it first keeps no way in.
    async fn recover_from_conflict(
        &self,
        provider: FederatedProvider,
        profile: &FederatedProfile,
    ) -> Result<User, ApiError> {
        if let Some(user) = self.users.find_by_subject(provider, &profile.subject).await? {
            info!(user_id = user.id, "Concurrent federated sign-in already created account");
            return Ok(user);
        }

        match self.users.find_by_email(&profile.email).await? {
            Some(user) if profile.email_verified => {
                info!(
                    user_id = user.id,
                    provider = %provider,
                    previous_status = %user.status(),
                    "Linking federated identity to existing email account"
                );
                if !user.is_active() {
                    self.users.convert_to_federated(user.id, provider).await?;
                }
                self.refresh_linked(user, provider, profile).await
            }
            Some(_) => {
                warn!(
                    email = %safe_email_log(&profile.email),
                    "Unverified provider email matches an existing account"
                );
                Err(ApiError::Conflict(
                    "An account with this email already exists".to_string(),
                ))
            }
            None => Err(ApiError::Conflict("Account could not be created".to_string())),
        }
    }

    /// Stores the subject and latest profile fields and makes sure the
    /// account is active
    async fn refresh_linked(
        &self,
        user: User,
        provider: FederatedProvider,
        profile: &FederatedProfile,
    ) -> Result<User, ApiError> {
        self.users.link_subject(user.id, provider, profile).await?;
        if !user.is_active() {
            info!(user_id = user.id, status = %user.status(), "Promoting account to active");
            self.users.activate(user.id).await?;
        }
        self.users.find_by_id(user.id).await?.ok_or_else(|| {
            ApiError::InternalServer(format!("user {} vanished during linking", user.id))
        })
    }

    /// Starts the redirect handshake. A requested redirect target outside
    /// the trusted origins is dropped.
    pub fn begin_redirect(
        &self,
        provider: FederatedProvider,
        requested_redirect: Option<&str>,
    ) -> Result<(String, OAuthSession), ApiError> {
        let redirect_url = match requested_redirect {
            Some(url) if self.session.is_allowed_redirect(url) => Some(url.to_string()),
            Some(url) => {
                warn!(redirect = %url, "Ignoring untrusted post-login redirect target");
                None
            }
            None => None,
        };

        let session = OAuthSession::new(provider, redirect_url);
        let url = self
            .federated
            .authorization_url(provider, &session.state)
            .map_err(|e| federated_error(e, true))?;

        info!(provider = %provider, has_redirect = session.redirect_url.is_some(), "Starting redirect sign-in");
        Ok((url, session))
    }

    /// Finishes the redirect handshake and computes the browser destination
    pub async fn complete_redirect(
        &self,
        provider: FederatedProvider,
        session: Option<OAuthSession>,
        query: &CallbackQuery,
    ) -> Result<RedirectOutcome, ApiError> {
        if let Some(provider_error) = &query.error {
            warn!(provider = %provider, oauth_error = %provider_error, "Identity provider returned an error");
            return Err(ApiError::Unauthorized(format!(
                "Sign-in was not completed: {}",
                provider_error
            )));
        }

        let Some(session) = session else {
            warn!(provider = %provider, "Callback without a sign-in session");
            return Err(ApiError::Unauthorized("Sign-in session missing or expired".to_string()));
        };

        if session.provider != provider.as_str() || query.state.as_deref() != Some(session.state.as_str()) {
            warn!(provider = %provider, "Callback state does not match sign-in session");
            return Err(ApiError::Unauthorized("Sign-in state mismatch".to_string()));
        }

        let code = query
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("No authorization code provided".to_string()))?;

        let id_token = self
            .federated
            .exchange_code(provider, code)
            .await
            .map_err(|e| federated_error(e, true))?;
        let profile = self
            .federated
            .verify(provider, &id_token)
            .await
            .map_err(|e| federated_error(e, true))?;

        let user = self.link_or_create(provider, profile).await?;
        let tokens = self.issue_pair(user.id).await?;

        let destination = self.session.destination(session.redirect_url.as_deref());
        let deep_link = self.session.is_deep_link(&destination);
        let location = self.session.delivery_url(&destination, &tokens, &user);

        info!(
            user_id = user.id,
            provider = %provider,
            deep_link = deep_link,
            "Redirect sign-in completed"
        );

        Ok(RedirectOutcome {
            user,
            tokens,
            location,
            deep_link,
        })
    }
}

fn credential_error(e: CredentialError) -> ApiError {
    match e {
        CredentialError::NotFound | CredentialError::WrongPassword | CredentialError::NotActive => {
            debug!(reason = %e, "Password authentication failed");
            ApiError::Unauthorized(INVALID_CREDENTIALS.to_string())
        }
        CredentialError::InvalidEmail | CredentialError::WeakPassword => {
            ApiError::ValidationError(e.to_string())
        }
        CredentialError::InvalidCode | CredentialError::CodeExpired => {
            ApiError::ValidationError("Invalid or expired verification code".to_string())
        }
        CredentialError::AlreadyRegistered => ApiError::Conflict("Email already registered".to_string()),
        CredentialError::Hash(msg) => ApiError::InternalServer(msg),
        CredentialError::Database(db) => ApiError::DatabaseError(db),
    }
}

fn token_error(e: TokenError, token: &str) -> ApiError {
    match e {
        TokenError::Signing(msg) => ApiError::InternalServer(msg),
        reason => {
            debug!(reason = %reason, token = %safe_token_log(token), "Token rejected");
            ApiError::Unauthorized(INVALID_TOKEN.to_string())
        }
    }
}

fn refresh_error(e: RefreshTokenError, token: &str) -> ApiError {
    match e {
        RefreshTokenError::Database(db) => ApiError::DatabaseError(db),
        reason => {
            debug!(reason = %reason, token = %safe_token_log(token), "Refresh token rejected by store");
            ApiError::Unauthorized(INVALID_TOKEN.to_string())
        }
    }
}

/// Identity rejections are 400 when the client posted the token itself and
/// 401 on the redirect callback
fn federated_error(e: FederatedError, on_callback: bool) -> ApiError {
    match e {
        FederatedError::InvalidToken(_)
        | FederatedError::UntrustedAudience(_)
        | FederatedError::IncompleteProfile => {
            let message = e.to_string();
            if on_callback {
                ApiError::Unauthorized(message)
            } else {
                ApiError::BadRequest(message)
            }
        }
        FederatedError::Upstream(_) => {
            ApiError::UpstreamFailure("Identity provider unavailable".to_string())
        }
        FederatedError::UnsupportedProvider(_) => ApiError::NotFound(e.to_string()),
        FederatedError::NotConfigured(_) | FederatedError::Client(_) => {
            ApiError::InternalServer(e.to_string())
        }
    }
}
