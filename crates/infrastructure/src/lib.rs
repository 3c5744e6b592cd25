//! Infrastructure adapters for the audit trail ports.

#![forbid(unsafe_code)]

mod aes_key_management;
mod env_snapshot_source;
mod in_memory_audit_store;
mod in_memory_dead_letter;
mod postgres_audit_store;
mod proc_resource_sampler;
mod system_clock;
mod tracing_alert_notifier;
mod webhook_alert_notifier;

pub use aes_key_management::AesKeyManagementService;
pub use env_snapshot_source::EnvSnapshotSource;
pub use in_memory_audit_store::InMemoryAuditStore;
pub use in_memory_dead_letter::InMemoryDeadLetterSink;
pub use postgres_audit_store::PostgresAuditStore;
pub use proc_resource_sampler::ProcResourceSampler;
pub use system_clock::SystemClock;
pub use tracing_alert_notifier::TracingAlertNotifier;
pub use webhook_alert_notifier::WebhookAlertNotifier;
