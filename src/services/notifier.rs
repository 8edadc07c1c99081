// src/services/notifier.rs
//! Delivery of email verification codes

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::common::helpers::safe_email_log;

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("verification code could not be delivered: {0}")]
    Delivery(String),
}

/// Sends a verification code to the owner of an email address
#[async_trait]
pub trait VerificationNotifier: Send + Sync {
    async fn send_verification_code(&self, email: &str, code: &str) -> Result<(), NotifierError>;
}

/// Records that a code was issued without delivering it anywhere
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl VerificationNotifier for LogNotifier {
    async fn send_verification_code(&self, email: &str, _code: &str) -> Result<(), NotifierError> {
        info!(
            email = %safe_email_log(email),
            "Verification code issued (no delivery channel configured)"
        );
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Keeps the last code sent to each address
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<HashMap<String, String>>,
    }

    impl RecordingNotifier {
        pub fn last_code(&self, email: &str) -> Option<String> {
            self.sent.lock().unwrap().get(email).cloned()
        }
    }

    #[async_trait]
    impl VerificationNotifier for RecordingNotifier {
        async fn send_verification_code(&self, email: &str, code: &str) -> Result<(), NotifierError> {
            self.sent
                .lock()
                .unwrap()
                .insert(email.to_string(), code.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_succeeds() {
        assert!(LogNotifier
            .send_verification_code("a@x.com", "0042")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_latest_code() {
        let notifier = RecordingNotifier::default();
        notifier.send_verification_code("a@x.com", "1111").await.unwrap();
        notifier.send_verification_code("a@x.com", "2222").await.unwrap();
        assert_eq!(notifier.last_code("a@x.com").as_deref(), Some("2222"));
        assert!(notifier.last_code("b@x.com").is_none());
    }
}
