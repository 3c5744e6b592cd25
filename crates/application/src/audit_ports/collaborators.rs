use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use trailguard_core::AppResult;
use trailguard_domain::{EntitySchema, Severity};

/// Key management collaborator protecting payloads at rest.
///
/// Key rotation changes the active key for new writes only; previously
/// written records stay readable through their recorded key id.
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Encrypts a payload under the named key.
    async fn encrypt(&self, plaintext: &[u8], key_id: &str) -> AppResult<Vec<u8>>;

    /// Decrypts a payload under the named key.
    async fn decrypt(&self, ciphertext: &[u8], key_id: &str) -> AppResult<Vec<u8>>;

    /// Returns the key id used for new writes.
    fn active_key_id(&self) -> String;
}

/// Injectable time source so retention behavior is testable.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// One event routed to manual reconciliation after exhausted retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    /// Identifier of the event that failed to persist.
    pub event_id: Uuid,
    /// Entity type of the failed event.
    pub entity_type: String,
    /// Final error message.
    pub error: String,
    /// Number of persistence attempts made.
    pub attempts: u32,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
}

/// Sink for events that exhausted their persistence retries.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Records one failed event for manual reconciliation.
    async fn push(&self, entry: DeadLetterEntry) -> AppResult<()>;
}

/// Operational alert raised outside the regular event flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalAlert {
    /// Alert severity.
    pub severity: Severity,
    /// Component that raised the alert.
    pub source: String,
    /// Human-readable description.
    pub message: String,
}

/// Notifier for operational alerts (key unavailable, buffer saturation).
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Delivers one alert.
    async fn notify(&self, alert: OperationalAlert) -> AppResult<()>;
}

/// Source of entity schemas for configuration generation.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Lists all entity schemas to audit.
    async fn list_entities(&self) -> AppResult<Vec<EntitySchema>>;
}

/// Sampler for host resource usage observed by the system monitor.
pub trait ResourceSampler: Send + Sync {
    /// Returns the memory usage ratio in the 0.0-1.0 range.
    fn memory_usage_ratio(&self) -> AppResult<f64>;
}

/// Source of non-secret configuration values for drift detection.
pub trait ConfigSnapshotSource: Send + Sync {
    /// Returns the current non-secret configuration snapshot.
    fn snapshot(&self) -> Map<String, Value>;
}
