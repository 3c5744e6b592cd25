mod api;
mod database;
mod frontend;
mod system;

pub use api::{ApiCaptureConfig, ApiRequestCapture, ApiRequestRecord};
pub use database::DatabaseMutationCapture;
pub use frontend::{FrontendCaptureConfig, FrontendInteraction, FrontendInteractionCapture, FrontendInteractionKind};
pub use system::{SystemMonitor, SystemMonitorConfig};

use trailguard_core::CorrelationId;

/// Caller context shared by every capture adapter.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Session identifier.
    pub session_id: String,
    /// Caller IP address.
    pub ip_address: String,
    /// Upstream correlation identifier; generated downstream when absent.
    pub correlation_id: Option<CorrelationId>,
}

#[cfg(test)]
mod tests;
