use crate::domain::ports::{NotificationEvent, Notifier, NotifyError};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Posts settlement events as JSON to the panel's registered endpoint.
pub struct WebhookNotifier {
    endpoint: String,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SettlementError::Validation(format!("webhook client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, event: &NotificationEvent) -> std::result::Result<(), NotifyError> {
        self.client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| NotifyError(e.to_string()))?;
        Ok(())
    }
}

/// Writes events to the log instead of sending them anywhere.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, event: &NotificationEvent) -> std::result::Result<(), NotifyError> {
        info!(
            event = %event.event,
            txn_id = %event.txn_id,
            status = event.status.as_str(),
            message = %event.message,
            "settlement notification"
        );
        Ok(())
    }
}
