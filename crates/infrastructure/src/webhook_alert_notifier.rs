use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use trailguard_application::{AlertNotifier, OperationalAlert};
use trailguard_core::{AppError, AppResult};

/// Alert notifier posting JSON payloads to an operations webhook.
#[derive(Clone)]
pub struct WebhookAlertNotifier {
    http_client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    severity: &'a str,
    source: &'a str,
    message: &'a str,
}

impl WebhookAlertNotifier {
    /// Creates a notifier for the given webhook URL.
    pub fn new(endpoint: &str) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| AppError::Validation(format!("invalid ALERT_WEBHOOK_URL: {error}")))?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| {
                AppError::Internal(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            http_client,
            endpoint,
        })
    }
}

#[async_trait]
impl AlertNotifier for WebhookAlertNotifier {
    async fn notify(&self, alert: OperationalAlert) -> AppResult<()> {
        let response = self
            .http_client
            .post(self.endpoint.clone())
            .json(&AlertPayload {
                severity: alert.severity.as_str(),
                source: alert.source.as_str(),
                message: alert.message.as_str(),
            })
            .send()
            .await
            .map_err(|error| AppError::Internal(format!("failed to call alert webhook: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_owned());
            return Err(AppError::Internal(format!(
                "alert webhook returned status {}: {body}",
                status.as_u16()
            )));
        }

        Ok(())
    }
}
