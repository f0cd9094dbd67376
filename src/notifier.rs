//! Delivery of activation tokens to newly registered users

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Token, User};

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Sends account messages to users
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an activation token to `user`
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), NotifyError>;
}

/// Notifier that only records the dispatch in the log
///
/// The token itself is never written out.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = user.id,
            email = %user.email,
            expiry = %token.expiry,
            "Activation message dispatched"
        );
        Ok(())
    }
}
