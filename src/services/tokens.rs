// src/services/tokens.rs
//! Signed, expiring tokens (HS256 JWT)
//!
//! Two codecs exist at runtime: access (15 minutes, secret A) and refresh
//! (7 days, secret B). Expiry is checked here rather than inside
//! `jsonwebtoken` so the boundary is exact: a token is valid strictly
//! before its `exp` second and invalid from `exp` on.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::models::Claims;

pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token could not be decoded")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("token signature does not match")]
    MalformedSignature,

    #[error("token signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// A freshly minted token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenCodec {
    kind: TokenKind,
    ttl: Duration,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("kind", &self.kind)
            .field("ttl", &self.ttl)
            .field("keys", &"<redacted>")
            .finish()
    }
}

impl TokenCodec {
    pub fn new(kind: TokenKind, secret: &[u8], ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn access(secret: &[u8]) -> Self {
        Self::new(
            TokenKind::Access,
            secret,
            Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
        )
    }

    pub fn refresh(secret: &[u8]) -> Self {
        Self::new(
            TokenKind::Refresh,
            secret,
            Duration::days(REFRESH_TOKEN_TTL_DAYS),
        )
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: i64) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<IssuedToken, TokenError> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_at: DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or(expires_at),
        })
    }

    /// Returns the subject user id of a valid token
    pub fn verify(&self, token: &str) -> Result<i64, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<i64, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::MalformedSignature
                }
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            };
            debug!(kind = self.kind.as_str(), error = %e, "Token decode failed");
            reason
        })?;

        if now.timestamp() >= data.claims.exp {
            debug!(
                kind = self.kind.as_str(),
                exp = data.claims.exp,
                now = now.timestamp(),
                "Token expired"
            );
            return Err(TokenError::Expired);
        }

        data.claims.sub.parse::<i64>().map_err(|_| TokenError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET_A: &[u8] = b"access-secret-for-tests";
    const SECRET_B: &[u8] = b"refresh-secret-for-tests";

    fn issued_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_round_trip_across_ttl_window() {
        let codec = TokenCodec::access(SECRET_A);
        let now = issued_at();
        let issued = codec.issue_at(42, now).unwrap();

        for offset in [0, 1, 60, 14 * 60, 15 * 60 - 1] {
            let at = now + Duration::seconds(offset);
            assert_eq!(codec.verify_at(&issued.token, at), Ok(42), "offset {}", offset);
        }
    }

    #[test]
    fn test_access_token_expiry_boundary() {
        let codec = TokenCodec::access(SECRET_A);
        let now = issued_at();
        let issued = codec.issue_at(7, now).unwrap();
        let boundary = now + Duration::minutes(15);

        assert_eq!(issued.expires_at, boundary);
        assert_eq!(
            codec.verify_at(&issued.token, boundary - Duration::seconds(1)),
            Ok(7)
        );
        assert_eq!(
            codec.verify_at(&issued.token, boundary),
            Err(TokenError::Expired)
        );
        assert_eq!(
            codec.verify_at(&issued.token, boundary + Duration::seconds(1)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_refresh_ttl_is_seven_days() {
        let codec = TokenCodec::refresh(SECRET_B);
        let now = issued_at();
        let issued = codec.issue_at(1, now).unwrap();

        assert_eq!(issued.expires_at, now + Duration::days(7));
        assert_eq!(
            codec.verify_at(&issued.token, now + Duration::days(7) - Duration::seconds(1)),
            Ok(1)
        );
        assert_eq!(
            codec.verify_at(&issued.token, now + Duration::days(7)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let access = TokenCodec::access(SECRET_A);
        let refresh = TokenCodec::refresh(SECRET_B);
        let issued = access.issue(5).unwrap();

        assert_eq!(
            refresh.verify(&issued.token),
            Err(TokenError::MalformedSignature)
        );
    }

    #[test]
    fn test_garbage_is_invalid() {
        let codec = TokenCodec::access(SECRET_A);
        assert_eq!(codec.verify("not-a-jwt"), Err(TokenError::Invalid));
        assert_eq!(codec.verify(""), Err(TokenError::Invalid));
    }

    #[test]
    fn test_tokens_issued_in_same_second_differ() {
        let codec = TokenCodec::refresh(SECRET_B);
        let now = issued_at();
        let first = codec.issue_at(9, now).unwrap();
        let second = codec.issue_at(9, now).unwrap();
        assert_ne!(first.token, second.token);
    }

    #[test]
    fn test_non_numeric_subject_is_invalid() {
        let codec = TokenCodec::access(SECRET_A);
        let claims = Claims {
            sub: "U_ABC123".to_string(),
            exp: (Utc::now() + Duration::minutes(5)).timestamp(),
            iat: Utc::now().timestamp(),
            jti: "x".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET_A),
        )
        .unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Invalid));
    }
}
