//! End-of-run notification sinks.
//!
//! Sending is best-effort: by the time a message goes out the transfer work
//! is finished, so a failed send is logged and never turns into a failed run.

pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

pub use smtp::{SmtpNotifier, SmtpSettings};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid mail address {address:?}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },

    #[error("Failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Notification task failed: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes the message to the log. Used when no mail relay is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(subject, "Notification (no mail relay configured):\n{}", body);
        Ok(())
    }
}

/// Send and swallow any failure. Returns whether the message went out.
pub async fn notify_best_effort(notifier: &dyn Notifier, subject: &str, body: &str) -> bool {
    match notifier.send(subject, body).await {
        Ok(()) => {
            tracing::debug!(subject, "Notification sent");
            true
        }
        Err(e) => {
            tracing::error!(subject, error = %e, "Failed to send notification");
            false
        }
    }
}
