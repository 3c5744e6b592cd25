//! Application services and ports for the audit trail.

#![forbid(unsafe_code)]

mod audit_ports;
mod capture;
mod config_service;
mod pipeline;
mod query_service;

pub use audit_ports::{
    AggregateBucket, AggregatePeriod, AggregateQuery, AlertNotifier, AppendOutcome, AuditEventStore,
    AuditQuery, Clock, ConfigSnapshotSource, DeadLetterEntry, DeadLetterSink, KeyManagementService,
    OperationalAlert, OrderBy, OrderDirection, PurgeOutcome, QueryPage, ResourceSampler,
    SchemaSource, StoredAuditRecord,
};
pub use capture::{
    ApiCaptureConfig, ApiRequestCapture, ApiRequestRecord, CaptureContext, DatabaseMutationCapture,
    FrontendCaptureConfig, FrontendInteraction, FrontendInteractionCapture, FrontendInteractionKind,
    SystemMonitor, SystemMonitorConfig,
};
pub use config_service::{AuditConfigGenerator, AuditConfigInput, AuditConfigRegistry};
pub use pipeline::{
    DropPolicy, EventProcessor, MetricsSnapshot, ProcessorConfig, ProcessorMetrics,
    REDACTION_MARKER, decode_payload, hash_digest, search_terms,
};
pub use query_service::AuditQueryService;
