// src/common/config.rs
//! Process configuration, loaded once at startup
//!
//! Every secret and tunable the auth subsystem needs is read here and
//! nowhere else. Components receive the pieces they need by reference.

use axum_extra::extract::cookie::{Cookie, SameSite};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Hard-coded post-login destination used when neither the session nor
/// `FRONTEND_URL` supplies one.
pub const FALLBACK_FRONTEND_URL: &str = "https://www.ifoodme.com";

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Minimum length of the master key the session cookie key is derived from.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{name} must be at least {min} bytes long")]
    TooShort { name: &'static str, min: usize },

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Signing material for tokens and the session cookie
#[derive(Clone)]
pub struct AuthSecrets {
    pub access: Vec<u8>,
    pub refresh: Vec<u8>,
    pub session: Vec<u8>,
    /// True when `JWT_REFRESH_SECRET` was absent and the refresh secret was
    /// derived from the access secret. Degraded, never recommended.
    pub refresh_derived: bool,
    pub session_derived: bool,
}

impl std::fmt::Debug for AuthSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSecrets")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .field("session", &"<redacted>")
            .field("refresh_derived", &self.refresh_derived)
            .field("session_derived", &self.session_derived)
            .finish()
    }
}

/// Google OAuth client settings
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub callback_url: String,
    pub allowed_audiences: Vec<String>,
    pub tokeninfo_url: String,
    pub auth_url: String,
    pub token_url: String,
}

/// Attributes shared by every cookie the service sets
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl CookieSettings {
    pub fn for_environment(production: bool, domain: Option<String>) -> Self {
        if production {
            Self {
                secure: true,
                same_site: SameSite::None,
                domain,
            }
        } else {
            Self {
                secure: false,
                same_site: SameSite::Lax,
                domain: None,
            }
        }
    }

    /// Builds a root-path cookie carrying these attributes
    pub fn build(&self, name: &'static str, value: String, http_only: bool) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, value))
            .path("/")
            .http_only(http_only)
            .secure(self.secure)
            .same_site(self.same_site)
            .build();
        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    /// A cookie matching `build` closely enough for the browser to drop it
    pub fn removal(&self, name: &'static str) -> Cookie<'static> {
        self.build(name, String::new(), true)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub reset_db: bool,
    pub port: u16,
    pub production: bool,
    pub secrets: AuthSecrets,
    pub cookies: CookieSettings,
    pub frontend_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub deep_link_schemes: Vec<String>,
    pub google: GoogleConfig,
    pub provider_timeout: Duration,
    pub session_max_age: Duration,
    pub bcrypt_cost: u32,
    /// Verification attempts per email within `verify_attempt_window`; 0 disables the limit
    pub verify_attempt_limit: u32,
    pub verify_attempt_window: Duration,
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    /// Reads configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secrets = load_secrets(&get)?;

        let production = get("ENVIRONMENT").as_deref() == Some("production");
        let cookies = CookieSettings::for_environment(production, get("COOKIE_DOMAIN"));

        let google_client_id = get("GOOGLE_CLIENT_ID");
        let mut allowed_audiences = split_list(get("GOOGLE_ALLOWED_AUDIENCES").as_deref());
        if let Some(client_id) = &google_client_id {
            if !allowed_audiences.contains(client_id) {
                allowed_audiences.push(client_id.clone());
            }
        }

        let callback_url = get("GOOGLE_CALLBACK_URL").unwrap_or_else(|| {
            if production {
                "https://www.ifoodme.com/api/auth/google/callback".to_string()
            } else {
                "http://localhost:8080/auth/google/callback".to_string()
            }
        });

        let google = GoogleConfig {
            client_id: google_client_id,
            client_secret: get("GOOGLE_CLIENT_SECRET"),
            callback_url,
            allowed_audiences,
            tokeninfo_url: get("GOOGLE_TOKENINFO_URL")
                .unwrap_or_else(|| GOOGLE_TOKENINFO_URL.to_string()),
            auth_url: get("GOOGLE_AUTH_URL").unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_url: get("GOOGLE_TOKEN_URL").unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
        };

        let cors_origins = match get("CORS_ORIGINS") {
            Some(raw) => split_list(Some(&raw)),
            None => vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
        };

        let deep_link_schemes = match get("DEEP_LINK_SCHEMES") {
            Some(raw) => split_list(Some(&raw)),
            None => vec!["travelview://".to_string()],
        };

        Ok(Self {
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://ar_backend.db".to_string()),
            reset_db: get("RESET_DB").as_deref() == Some("true"),
            port: parse_or("PORT", get("PORT"), 8080)?,
            production,
            secrets,
            cookies,
            frontend_url: get("FRONTEND_URL"),
            cors_origins,
            deep_link_schemes,
            google,
            provider_timeout: Duration::from_secs(parse_or(
                "IDENTITY_PROVIDER_TIMEOUT_SECS",
                get("IDENTITY_PROVIDER_TIMEOUT_SECS"),
                10,
            )?),
            session_max_age: Duration::from_secs(parse_or(
                "SESSION_MAX_AGE_SECS",
                get("SESSION_MAX_AGE_SECS"),
                3600,
            )?),
            bcrypt_cost: parse_or("BCRYPT_COST", get("BCRYPT_COST"), bcrypt::DEFAULT_COST)?,
            verify_attempt_limit: parse_or(
                "VERIFY_ATTEMPT_LIMIT",
                get("VERIFY_ATTEMPT_LIMIT"),
                10,
            )?,
            verify_attempt_window: Duration::from_secs(parse_or(
                "VERIFY_ATTEMPT_WINDOW_SECS",
                get("VERIFY_ATTEMPT_WINDOW_SECS"),
                900,
            )?),
            sentry_dsn: get("SENTRY_DSN"),
        })
    }
}

fn load_secrets<G>(get: &G) -> Result<AuthSecrets, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let access = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

    let (refresh, refresh_derived) = match get("JWT_REFRESH_SECRET") {
        Some(secret) => (secret, false),
        None => (format!("{}_refresh", access), true),
    };

    let (session, session_derived) = match get("SESSION_SECRET") {
        Some(secret) => (secret, false),
        None => (format!("{}_session", access), true),
    };
    if session.len() < MIN_SESSION_SECRET_LEN {
        return Err(ConfigError::TooShort {
            name: if session_derived { "JWT_SECRET" } else { "SESSION_SECRET" },
            min: MIN_SESSION_SECRET_LEN,
        });
    }

    Ok(AuthSecrets {
        access: access.into_bytes(),
        refresh: refresh.into_bytes(),
        session: session.into_bytes(),
        refresh_derived,
        session_derived,
    })
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_jwt_secret_is_fatal() {
        let result = AppConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn test_blank_jwt_secret_counts_as_missing() {
        let result = AppConfig::from_lookup(lookup(&[("JWT_SECRET", "   ")]));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn test_refresh_secret_falls_back_to_derivation() {
        let config = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert!(config.secrets.refresh_derived);
        assert_eq!(config.secrets.refresh, format!("{}_refresh", SECRET).into_bytes());
        assert_ne!(config.secrets.refresh, config.secrets.access);
    }

    #[test]
    fn test_explicit_refresh_secret_is_used() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("JWT_REFRESH_SECRET", "another-secret"),
        ]))
        .unwrap();
        assert!(!config.secrets.refresh_derived);
        assert_eq!(config.secrets.refresh, b"another-secret".to_vec());
    }

    #[test]
    fn test_short_session_secret_is_rejected() {
        let result = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("SESSION_SECRET", "short"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::TooShort { name: "SESSION_SECRET", .. })
        ));
    }

    #[test]
    fn test_client_id_joins_audience_allow_list() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("GOOGLE_CLIENT_ID", "web.apps"),
            ("GOOGLE_ALLOWED_AUDIENCES", "ios.apps, android.apps"),
        ]))
        .unwrap();
        assert_eq!(
            config.google.allowed_audiences,
            vec!["ios.apps", "android.apps", "web.apps"]
        );
    }

    #[test]
    fn test_production_cookie_attributes() {
        let config = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("ENVIRONMENT", "production"),
            ("COOKIE_DOMAIN", ".example.com"),
        ]))
        .unwrap();
        assert!(config.cookies.secure);
        assert_eq!(config.cookies.same_site, SameSite::None);
        assert_eq!(config.cookies.domain.as_deref(), Some(".example.com"));

        let dev = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("COOKIE_DOMAIN", ".example.com"),
        ]))
        .unwrap();
        assert!(!dev.cookies.secure);
        assert_eq!(dev.cookies.same_site, SameSite::Lax);
        assert!(dev.cookies.domain.is_none());
    }

    #[test]
    fn test_invalid_port_is_reported() {
        let result = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), ("PORT", "http")]));
        assert!(matches!(result, Err(ConfigError::Invalid { name: "PORT", .. })));
    }

    #[test]
    fn test_verify_attempt_limit_defaults_and_overrides() {
        let defaults = AppConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(defaults.verify_attempt_limit, 10);
        assert_eq!(defaults.verify_attempt_window, Duration::from_secs(900));

        let tuned = AppConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("VERIFY_ATTEMPT_LIMIT", "3"),
            ("VERIFY_ATTEMPT_WINDOW_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(tuned.verify_attempt_limit, 3);
        assert_eq!(tuned.verify_attempt_window, Duration::from_secs(60));
    }
}
