//! Notification contract.

use async_trait::async_trait;

use crate::error::ClientResult;

/// A published alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub subject: String,
    pub message: String,
}

/// Fire-and-forget alert channel.
///
/// Callers treat delivery as best-effort and only log a returned error.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: &str, subject: &str, message: &str) -> ClientResult<()>;
}
