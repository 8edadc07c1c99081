// src/services/mod.rs
//
// Building blocks of the auth subsystem. Each service owns one concern and
// receives its configuration at construction time.

pub mod credentials;
pub mod federated;
pub mod monitoring;
pub mod notifier;
pub mod rate_limit;
pub mod refresh_tokens;
pub mod session;
pub mod tokens;
pub mod users;

// Re-export commonly used types for convenience
pub use credentials::{CredentialAuthenticator, CredentialError, Registration};
pub use federated::{FederatedError, FederatedProfile, FederatedProvider, FederatedVerifier};
pub use notifier::{LogNotifier, VerificationNotifier};
pub use refresh_tokens::{RefreshTokenError, RefreshTokenStore};
pub use session::{OAuthSession, SessionCarrier, SessionError};
pub use tokens::{TokenCodec, TokenError};
pub use users::UserStore;
