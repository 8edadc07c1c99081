// Monitoring with Sentry integration
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::common::config::AppConfig;

/// Keeps the Sentry client alive for the lifetime of the process
pub struct Monitoring {
    sentry_guard: Option<sentry::ClientInitGuard>,
}

impl Monitoring {
    /// Initializes Sentry when a DSN is configured. Must run before
    /// `init_tracing` so the tracing layer has a client to report to.
    pub fn init(config: &AppConfig) -> Self {
        let sentry_guard = config.sentry_dsn.as_deref().map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(
                        if config.production {
                            "production"
                        } else {
                            "development"
                        }
                        .into(),
                    ),
                    traces_sample_rate: 0.0,
                    ..Default::default()
                },
            ))
        });

        Self { sentry_guard }
    }

    pub fn is_enabled(&self) -> bool {
        self.sentry_guard.is_some()
    }
}

impl Drop for Monitoring {
    fn drop(&mut self) {
        if self.sentry_guard.is_some() {
            info!("Shutting down Sentry");
        }
    }
}

/// fmt output filtered by `RUST_LOG` (default `info`), with error events
/// forwarded to Sentry when it is enabled
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_tracing::layer())
        .init();
}
