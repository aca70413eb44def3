//! Notification adapters.

use assayer_core::notify::{DeliveryResult, NotificationError, Notifier};

/// Emits notifications as structured `tracing` events on the
/// `assayer::notify` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn notify(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryResult, NotificationError> {
        let job = payload.get("job_name").and_then(|v| v.as_str()).unwrap_or("");
        let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
        tracing::info!(
            target: "assayer::notify",
            event_type,
            job,
            status,
            payload = %payload,
            "notification"
        );
        Ok(DeliveryResult {
            channels: vec!["log".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        let result = LogNotifier
            .notify("execution.failed", &json!({"job_name": "nightly", "status": "failed"}))
            .await
            .unwrap();
        assert_eq!(result.channels, vec!["log"]);
    }
}
