// src/services/rate_limit.rs
//! Fixed-window attempt limiter
//!
//! Keeps one counter per key in process memory. Used to slow down guessing
//! of verification codes; counters are lost on restart.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Attempts allowed per key within one window
    pub limit: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
struct RateLimitState {
    count: u32,
    window_start: Instant,
}

impl RateLimitState {
    fn new() -> Self {
        Self {
            count: 1,
            window_start: Instant::now(),
        }
    }

    fn increment(&mut self) {
        self.count += 1;
    }

    fn reset(&mut self) {
        self.count = 1;
        self.window_start = Instant::now();
    }

    fn is_expired(&self, window: Duration) -> bool {
        self.window_start.elapsed() > window
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed,
    Limited { retry_after: u64 },
}

#[derive(Debug, Clone)]
pub struct AttemptLimiter {
    config: RateLimitConfig,
    attempts: Arc<RwLock<HashMap<String, RateLimitState>>>,
}

impl AttemptLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            enabled = config.enabled,
            limit = config.limit,
            window_seconds = config.window.as_secs(),
            "Initializing attempt limiter"
        );
        Self {
            config,
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Counts one attempt for `key`
    pub async fn check(&self, key: &str) -> RateLimitResult {
        if !self.config.enabled {
            return RateLimitResult::Allowed;
        }

        let window = self.config.window;
        let mut attempts = self.attempts.write().await;

        let Some(state) = attempts.get_mut(key) else {
            attempts.insert(key.to_string(), RateLimitState::new());
            return RateLimitResult::Allowed;
        };

        if state.is_expired(window) {
            state.reset();
            return RateLimitResult::Allowed;
        }

        if state.count >= self.config.limit {
            let elapsed = state.window_start.elapsed().as_secs();
            let retry_after = window.as_secs().saturating_sub(elapsed).max(1);
            warn!(retry_after, "Attempt limit reached");
            return RateLimitResult::Limited { retry_after };
        }

        state.increment();
        RateLimitResult::Allowed
    }

    /// Drops the counter for `key`, e.g. after a successful attempt
    pub async fn clear(&self, key: &str) {
        self.attempts.write().await.remove(key);
    }

    /// Removes counters whose window has passed
    pub async fn cleanup_expired(&self) {
        let window = self.config.window;
        let mut attempts = self.attempts.write().await;
        attempts.retain(|_, state| !state.is_expired(window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window: Duration) -> AttemptLimiter {
        AttemptLimiter::new(RateLimitConfig {
            enabled: true,
            limit,
            window,
        })
    }

    #[tokio::test]
    async fn test_limit_blocks_after_allowed_attempts() {
        let limiter = limiter(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);
        }
        let RateLimitResult::Limited { retry_after } = limiter.check("a@x.com").await else {
            panic!("fourth attempt should be limited");
        };
        assert!(retry_after > 0 && retry_after <= 60);
    }

    #[tokio::test]
    async fn test_keys_have_separate_counters() {
        let limiter = limiter(1, Duration::from_secs(60));

        assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);
        assert!(matches!(limiter.check("a@x.com").await, RateLimitResult::Limited { .. }));
        assert_eq!(limiter.check("b@x.com").await, RateLimitResult::Allowed);
    }

    #[tokio::test]
    async fn test_clear_and_expiry_reopen_the_window() {
        let limiter = limiter(1, Duration::from_millis(20));

        assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);
        limiter.clear("a@x.com").await;
        assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);

        tokio::time::sleep(Duration::from_millis(40)).await;
        limiter.cleanup_expired().await;
        assert!(limiter.attempts.read().await.is_empty());
        assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);
    }

    #[tokio::test]
    async fn test_disabled_limiter_allows_everything() {
        let limiter = AttemptLimiter::new(RateLimitConfig {
            enabled: false,
            limit: 0,
            window: Duration::from_secs(60),
        });
        for _ in 0..5 {
            assert_eq!(limiter.check("a@x.com").await, RateLimitResult::Allowed);
        }
    }
}
