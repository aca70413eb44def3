//! Notification port.
//!
//! The orchestrator tells a `Notifier` about terminal executions. Delivery is
//! best effort: errors are logged by the caller and never change execution
//! state.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event type sent when an execution exhausts its retries.
pub const EXECUTION_FAILED: &str = "execution.failed";

/// Event type sent when an execution completes successfully.
pub const EXECUTION_COMPLETED: &str = "execution.completed";

/// Receipt returned by a notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Channels the notification was handed to.
    pub channels: Vec<String>,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected: {0}")]
    Rejected(String),
}

/// Sends execution notifications to some external channel.
pub trait Notifier: Send + Sync {
    fn notify(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<DeliveryResult, NotificationError>> + Send;
}

/// Object-safe version of [`Notifier`] with boxed futures.
pub trait NotifierDyn: Send + Sync {
    fn notify_boxed<'a>(
        &'a self,
        event_type: &'a str,
        payload: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResult, NotificationError>> + Send + 'a>>;
}

impl<T: Notifier> NotifierDyn for T {
    fn notify_boxed<'a>(
        &'a self,
        event_type: &'a str,
        payload: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryResult, NotificationError>> + Send + 'a>> {
        Box::pin(self.notify(event_type, payload))
    }
}

/// Type-erased notifier held by the orchestrator.
pub struct BoxNotifier {
    inner: Box<dyn NotifierDyn>,
}

impl BoxNotifier {
    pub fn new<T: Notifier + 'static>(notifier: T) -> Self {
        Self {
            inner: Box::new(notifier),
        }
    }

    pub async fn notify(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryResult, NotificationError> {
        self.inner.notify_boxed(event_type, payload).await
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _event_type: &str,
        _payload: &serde_json::Value,
    ) -> Result<DeliveryResult, NotificationError> {
        Ok(DeliveryResult {
            channels: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl Notifier for Failing {
        async fn notify(
            &self,
            _event_type: &str,
            _payload: &serde_json::Value,
        ) -> Result<DeliveryResult, NotificationError> {
            Err(NotificationError::Transport("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn boxed_notifier_delegates() {
        let noop = BoxNotifier::new(NoopNotifier);
        let receipt = noop
            .notify(EXECUTION_COMPLETED, &serde_json::json!({}))
            .await
            .unwrap();
        assert!(receipt.channels.is_empty());

        let failing = BoxNotifier::new(Failing);
        let err = failing
            .notify(EXECUTION_FAILED, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("smtp down"));
    }
}
