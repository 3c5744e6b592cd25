use async_trait::async_trait;
use tracing::{error, warn};

use trailguard_application::{AlertNotifier, OperationalAlert};
use trailguard_core::AppResult;
use trailguard_domain::Severity;

/// Alert notifier emitting structured log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertNotifier;

impl TracingAlertNotifier {
    /// Creates the notifier.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AlertNotifier for TracingAlertNotifier {
    async fn notify(&self, alert: OperationalAlert) -> AppResult<()> {
        match alert.severity {
            Severity::Error | Severity::Critical => {
                error!(
                    source = %alert.source,
                    severity = alert.severity.as_str(),
                    "{}",
                    alert.message
                );
            }
            _ => {
                warn!(
                    source = %alert.source,
                    severity = alert.severity.as_str(),
                    "{}",
                    alert.message
                );
            }
        }
        Ok(())
    }
}
