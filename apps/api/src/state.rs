use std::sync::Arc;

use trailguard_application::{
    ApiRequestCapture, AuditConfigGenerator, AuditConfigRegistry, AuditQueryService, Clock,
    EventProcessor, FrontendInteractionCapture,
};
use trailguard_domain::{AuditLevel, RetentionPolicy};

/// Shared application state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Read-path query service.
    pub query_service: AuditQueryService,
    /// Redaction and persistence pipeline.
    pub processor: Arc<EventProcessor>,
    /// Active entity configurations.
    pub registry: Arc<AuditConfigRegistry>,
    /// Configuration generator for schema onboarding.
    pub generator: AuditConfigGenerator,
    /// Deployment retention policy applied at generation time.
    pub retention_policy: RetentionPolicy,
    /// Floor for generated audit levels.
    pub minimum_level: AuditLevel,
    /// API-boundary capture adapter.
    pub api_capture: Arc<ApiRequestCapture>,
    /// Frontend-interaction capture adapter.
    pub frontend_capture: Arc<FrontendInteractionCapture>,
    /// Time source shared with the pipeline.
    pub clock: Arc<dyn Clock>,
    /// Shared secret guarding the ingestion endpoints.
    pub ingest_shared_secret: String,
}
