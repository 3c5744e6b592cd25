use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use trailguard_core::{AppError, AppResult, CorrelationId};
use trailguard_domain::{
    AuditLevel, AuditOperation, EntitySchema, RetentionPolicy, SchemaField, SchemaFieldType,
    Severity,
};

use crate::audit_ports::{
    AggregateBucket, AggregateQuery, AlertNotifier, AppendOutcome, AuditEventStore, AuditQuery,
    Clock, ConfigSnapshotSource, DeadLetterEntry, DeadLetterSink, KeyManagementService,
    OperationalAlert, PurgeOutcome, QueryPage, ResourceSampler, StoredAuditRecord,
};
use crate::config_service::{AuditConfigGenerator, AuditConfigInput, AuditConfigRegistry};
use crate::pipeline::{
    EventProcessor, ProcessorConfig, REDACTION_MARKER, decode_payload, hash_digest,
};

use super::{
    ApiCaptureConfig, ApiRequestCapture, ApiRequestRecord, CaptureContext, DatabaseMutationCapture,
    FrontendCaptureConfig, FrontendInteraction, FrontendInteractionCapture,
    FrontendInteractionKind, SystemMonitor, SystemMonitorConfig,
};

#[derive(Default)]
struct FakeStore {
    records: Mutex<Vec<StoredAuditRecord>>,
    failures_remaining: AtomicU32,
    append_delay: Option<Duration>,
}

impl FakeStore {
    fn failing(attempts: u32) -> Self {
        let store = Self::default();
        store.failures_remaining.store(attempts, Ordering::SeqCst);
        store
    }

    fn slow(delay: Duration) -> Self {
        Self {
            append_delay: Some(delay),
            ..Self::default()
        }
    }

    async fn stored(&self) -> Vec<StoredAuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditEventStore for FakeStore {
    async fn append(&self, record: StoredAuditRecord) -> AppResult<AppendOutcome> {
        if let Some(delay) = self.append_delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Persistence("store unavailable".to_owned()));
        }

        let mut records = self.records.lock().await;
        if records.iter().any(|stored| stored.id == record.id) {
            return Ok(AppendOutcome::Duplicate);
        }
        records.push(record);
        Ok(AppendOutcome::Inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoredAuditRecord>> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned())
    }

    async fn query(&self, _query: AuditQuery) -> AppResult<QueryPage> {
        let records = self.records.lock().await.clone();
        let total_count = records.len();
        Ok(QueryPage {
            records,
            total_count,
        })
    }

    async fn aggregate(&self, _query: AggregateQuery) -> AppResult<Vec<AggregateBucket>> {
        Ok(Vec::new())
    }

    async fn set_legal_hold(&self, _id: Uuid, _held: bool) -> AppResult<()> {
        Ok(())
    }

    async fn set_entity_legal_hold(&self, _entity_type: &str, _held: bool) -> AppResult<()> {
        Ok(())
    }

    async fn archive_before(&self, _cutoff: DateTime<Utc>) -> AppResult<usize> {
        Ok(0)
    }

    async fn purge_expired(&self) -> AppResult<PurgeOutcome> {
        Ok(PurgeOutcome::default())
    }
}

struct PlainKms;

#[async_trait]
impl KeyManagementService for PlainKms {
    async fn encrypt(&self, plaintext: &[u8], _key_id: &str) -> AppResult<Vec<u8>> {
        Ok(plaintext.iter().map(|byte| byte ^ 0x5a).collect())
    }

    async fn decrypt(&self, ciphertext: &[u8], _key_id: &str) -> AppResult<Vec<u8>> {
        Ok(ciphertext.iter().map(|byte| byte ^ 0x5a).collect())
    }

    fn active_key_id(&self) -> String {
        "key-1".to_owned()
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct NullDeadLetter;

#[async_trait]
impl DeadLetterSink for NullDeadLetter {
    async fn push(&self, _entry: DeadLetterEntry) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct NullAlerts;

#[async_trait]
impl AlertNotifier for NullAlerts {
    async fn notify(&self, _alert: OperationalAlert) -> AppResult<()> {
        Ok(())
    }
}

struct FakeSampler {
    ratio_bits: AtomicU64,
}

impl FakeSampler {
    fn at(ratio: f64) -> Self {
        Self {
            ratio_bits: AtomicU64::new(ratio.to_bits()),
        }
    }
}

impl ResourceSampler for FakeSampler {
    fn memory_usage_ratio(&self) -> AppResult<f64> {
        Ok(f64::from_bits(self.ratio_bits.load(Ordering::SeqCst)))
    }
}

#[derive(Default)]
struct FakeSnapshot {
    values: std::sync::Mutex<Map<String, Value>>,
}

impl FakeSnapshot {
    fn set(&self, key: &str, value: Value) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_owned(), value);
        }
    }
}

impl ConfigSnapshotSource for FakeSnapshot {
    fn snapshot(&self) -> Map<String, Value> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

fn fixed_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn context() -> CaptureContext {
    CaptureContext {
        user_id: Some("alice".to_owned()),
        session_id: "session-1".to_owned(),
        ip_address: "10.0.0.1".to_owned(),
        correlation_id: None,
    }
}

async fn user_registry() -> Arc<AuditConfigRegistry> {
    let schema = EntitySchema::new(
        "user",
        "users",
        vec![
            SchemaField::new("id", SchemaFieldType::Text, None, true)
                .unwrap_or_else(|_| unreachable!()),
            SchemaField::new("password", SchemaFieldType::Text, None, false)
                .unwrap_or_else(|_| unreachable!()),
            SchemaField::new("email", SchemaFieldType::Text, None, false)
                .unwrap_or_else(|_| unreachable!()),
            SchemaField::new("plan", SchemaFieldType::Text, None, false)
                .unwrap_or_else(|_| unreachable!()),
        ],
    )
    .unwrap_or_else(|_| unreachable!());

    let config = AuditConfigGenerator::new()
        .generate(&AuditConfigInput {
            schema,
            minimum_level: AuditLevel::None,
            policy: RetentionPolicy::new(),
        })
        .unwrap_or_else(|_| unreachable!());

    let registry = Arc::new(AuditConfigRegistry::new());
    registry.register(config).await;
    registry
}

async fn basic_registry() -> Arc<AuditConfigRegistry> {
    let schema = EntitySchema::new(
        "shipment",
        "shipments",
        vec![
            SchemaField::new("id", SchemaFieldType::Text, None, true)
                .unwrap_or_else(|_| unreachable!()),
            SchemaField::new("status", SchemaFieldType::Text, None, false)
                .unwrap_or_else(|_| unreachable!()),
        ],
    )
    .unwrap_or_else(|_| unreachable!());

    let config = AuditConfigGenerator::new()
        .generate(&AuditConfigInput {
            schema,
            minimum_level: AuditLevel::None,
            policy: RetentionPolicy::new(),
        })
        .unwrap_or_else(|_| unreachable!());

    let registry = Arc::new(AuditConfigRegistry::new());
    registry.register(config).await;
    registry
}

struct Harness {
    processor: Arc<EventProcessor>,
    store: Arc<FakeStore>,
    kms: Arc<PlainKms>,
    clock: Arc<FixedClock>,
}

async fn harness_with(
    registry: Arc<AuditConfigRegistry>,
    store: FakeStore,
    config: ProcessorConfig,
) -> Harness {
    let store = Arc::new(store);
    let kms = Arc::new(PlainKms);
    let clock = Arc::new(FixedClock(fixed_instant()));

    let processor = Arc::new(EventProcessor::start(
        registry,
        Arc::clone(&store) as Arc<dyn AuditEventStore>,
        Arc::clone(&kms) as Arc<dyn KeyManagementService>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::new(NullDeadLetter) as Arc<dyn DeadLetterSink>,
        Arc::new(NullAlerts) as Arc<dyn AlertNotifier>,
        config,
    ));

    Harness {
        processor,
        store,
        kms,
        clock,
    }
}

fn fast_config() -> ProcessorConfig {
    ProcessorConfig {
        workers: 2,
        max_attempts: 3,
        initial_backoff: Duration::from_millis(2),
        ..ProcessorConfig::default()
    }
}

#[tokio::test]
async fn authorization_header_is_stored_as_redaction_marker() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;
    let capture = ApiRequestCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        ApiCaptureConfig::default(),
    );

    capture
        .record(
            ApiRequestRecord {
                method: "POST".to_owned(),
                path: "/api/orders".to_owned(),
                status_code: 201,
                duration_ms: 12,
                request_headers: vec![
                    ("Authorization".to_owned(), "Bearer raw-token".to_owned()),
                    ("Accept".to_owned(), "application/json".to_owned()),
                ],
                request_body: None,
                response_body: None,
            },
            context(),
        )
        .await;

    harness.processor.drain().await;
    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 1);

    let payload = decode_payload(&stored[0], harness.kms.as_ref() as &dyn KeyManagementService)
        .await
        .unwrap_or_default();
    let headers = &payload["metadata"]["request_headers"];
    assert_eq!(
        headers["Authorization"],
        Value::String(REDACTION_MARKER.to_owned())
    );
    assert_eq!(
        headers["Accept"],
        Value::String("application/json".to_owned())
    );
}

#[tokio::test]
async fn api_capture_propagates_upstream_correlation_id() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;
    let capture = ApiRequestCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        ApiCaptureConfig::default(),
    );

    let correlation_id = CorrelationId::new();
    let mut upstream_context = context();
    upstream_context.correlation_id = Some(correlation_id);

    capture
        .record(
            ApiRequestRecord {
                method: "GET".to_owned(),
                path: "/api/orders".to_owned(),
                status_code: 200,
                duration_ms: 3,
                request_headers: Vec::new(),
                request_body: None,
                response_body: None,
            },
            upstream_context,
        )
        .await;

    harness.processor.drain().await;
    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].correlation_id, correlation_id);
    assert_eq!(stored[0].operation, AuditOperation::Select);
}

#[tokio::test]
async fn api_capture_redacts_nested_body_fields() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;
    let capture = ApiRequestCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        ApiCaptureConfig {
            capture_bodies: true,
            ..ApiCaptureConfig::default()
        },
    );

    let redacted = capture.redact_body(&json!({
        "user": {"name": "alice", "password": "hunter2"},
        "items": [{"token": "abc"}]
    }));

    assert_eq!(
        redacted["user"]["password"],
        Value::String(REDACTION_MARKER.to_owned())
    );
    assert_eq!(
        redacted["items"][0]["token"],
        Value::String(REDACTION_MARKER.to_owned())
    );
    assert_eq!(redacted["user"]["name"], Value::String("alice".to_owned()));
}

#[tokio::test]
async fn full_level_sensitive_change_propagates_store_failure() {
    let registry = user_registry().await;
    let harness = harness_with(registry, FakeStore::failing(u32::MAX), fast_config()).await;
    let capture = DatabaseMutationCapture::new(
        user_registry().await,
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
    );

    let old_values = json!({"password": "old-secret"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let new_values = json!({"password": "new-secret"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    let outcome = capture
        .record_update("user", "user-1", &old_values, &new_values, context())
        .await;
    assert!(matches!(outcome, Err(AppError::Persistence(_))));
}

#[tokio::test]
async fn non_sensitive_change_never_blocks_the_mutation() {
    let registry = user_registry().await;
    let harness = harness_with(Arc::clone(&registry), FakeStore::failing(u32::MAX), fast_config())
        .await;
    let capture = DatabaseMutationCapture::new(
        registry,
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
    );

    let old_values = json!({"plan": "pro"}).as_object().cloned().unwrap_or_default();
    let new_values = json!({"plan": "max"}).as_object().cloned().unwrap_or_default();

    let outcome = capture
        .record_update("user", "user-1", &old_values, &new_values, context())
        .await;
    assert!(outcome.is_ok());
}

#[tokio::test]
async fn sensitive_new_values_are_never_captured() {
    let registry = user_registry().await;
    let harness = harness_with(Arc::clone(&registry), FakeStore::default(), fast_config()).await;
    let capture = DatabaseMutationCapture::new(
        registry,
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
    );

    let old_values = json!({"password": "old-secret", "plan": "pro"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let new_values = json!({"password": "new-secret", "plan": "max"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    let outcome = capture
        .record_update("user", "user-1", &old_values, &new_values, context())
        .await;
    assert!(outcome.is_ok());

    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 1);

    let payload = decode_payload(&stored[0], harness.kms.as_ref() as &dyn KeyManagementService)
        .await
        .unwrap_or_default();
    assert!(payload["new_values"].get("password").is_none());
    assert_eq!(payload["new_values"]["plan"], Value::String("max".to_owned()));
    // The old value survives only as its deterministic digest.
    assert_eq!(
        payload["old_values"]["password"],
        Value::String(hash_digest("old-secret"))
    );
}

#[tokio::test]
async fn unconfigured_entity_emits_nothing() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(Arc::clone(&registry), FakeStore::default(), fast_config()).await;
    let capture = DatabaseMutationCapture::new(
        registry,
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
    );

    let new_values = json!({"plan": "pro"}).as_object().cloned().unwrap_or_default();
    let outcome = capture
        .record_create("order", "order-1", &new_values, context())
        .await;
    assert!(outcome.is_ok());

    harness.processor.drain().await;
    assert!(harness.store.stored().await.is_empty());
}

#[tokio::test]
async fn basic_level_entity_captures_only_identifier_deletes() {
    let registry = basic_registry().await;
    let harness = harness_with(Arc::clone(&registry), FakeStore::default(), fast_config()).await;
    let capture = DatabaseMutationCapture::new(
        registry,
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
    );

    let old_values = json!({"id": "shipment-1", "status": "open"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let new_values = json!({"id": "shipment-1", "status": "closed"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    let update_outcome = capture
        .record_update("shipment", "shipment-1", &old_values, &new_values, context())
        .await;
    assert!(update_outcome.is_ok());

    let delete_outcome = capture
        .record_delete("shipment", "shipment-1", &old_values, context())
        .await;
    assert!(delete_outcome.is_ok());

    harness.processor.drain().await;
    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].operation, AuditOperation::Delete);

    let payload = decode_payload(&stored[0], harness.kms.as_ref() as &dyn KeyManagementService)
        .await
        .unwrap_or_default();
    assert_eq!(
        payload["old_values"],
        json!({"id": "shipment-1"})
    );
}

#[tokio::test]
async fn frontend_buffer_flushes_at_batch_size() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;
    let capture = FrontendInteractionCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        FrontendCaptureConfig {
            max_batch: 3,
            flush_interval: Duration::from_secs(600),
            ..FrontendCaptureConfig::default()
        },
    );

    for index in 0..3 {
        let outcome = capture
            .record(
                FrontendInteraction {
                    kind: FrontendInteractionKind::Click,
                    target: format!("button-{index}"),
                    occurred_at: None,
                    detail: Map::new(),
                },
                context(),
            )
            .await;
        assert!(outcome.is_ok());
    }

    assert_eq!(capture.buffered_count().await, 0);
    harness.processor.drain().await;
    assert_eq!(harness.store.stored().await.len(), 3);
}

#[tokio::test]
async fn failed_frontend_batch_requeues_at_head() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(
        registry,
        FakeStore::slow(Duration::from_millis(300)),
        ProcessorConfig {
            workers: 1,
            queue_capacity: 1,
            ..fast_config()
        },
    )
    .await;

    // Saturate the single worker queue so frontend hand-off is rejected.
    let filler = |target: &str| FrontendInteraction {
        kind: FrontendInteractionKind::Navigation,
        target: target.to_owned(),
        occurred_at: None,
        detail: Map::new(),
    };

    let capture = FrontendInteractionCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        FrontendCaptureConfig {
            max_batch: 10,
            flush_interval: Duration::from_secs(600),
            ..FrontendCaptureConfig::default()
        },
    );

    let first = capture.record(filler("route-a"), context()).await;
    assert!(first.is_ok());
    capture.flush().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = capture.record(filler("route-b"), context()).await;
    assert!(second.is_ok());
    capture.flush().await;

    let third = capture.record(filler("route-c"), context()).await;
    assert!(third.is_ok());
    capture.flush().await;

    // route-a is processing, route-b fills the queue, route-c bounced back.
    assert_eq!(capture.buffered_count().await, 1);

    harness.processor.drain().await;
    capture.flush().await;
    harness.processor.drain().await;

    assert_eq!(harness.store.stored().await.len(), 3);
    assert_eq!(capture.buffered_count().await, 0);
}

#[tokio::test]
async fn frontend_stop_performs_final_flush() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;
    let capture = Arc::new(FrontendInteractionCapture::new(
        Arc::clone(&harness.processor),
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        FrontendCaptureConfig {
            flush_interval: Duration::from_secs(600),
            ..FrontendCaptureConfig::default()
        },
    ));
    capture.start().await;

    let outcome = capture
        .record(
            FrontendInteraction {
                kind: FrontendInteractionKind::ClientError,
                target: "checkout".to_owned(),
                occurred_at: None,
                detail: Map::new(),
            },
            context(),
        )
        .await;
    assert!(outcome.is_ok());

    capture.stop().await;
    harness.processor.drain().await;

    assert_eq!(capture.buffered_count().await, 0);
    assert_eq!(harness.store.stored().await.len(), 1);
}

#[tokio::test]
async fn system_monitor_detects_config_drift() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;

    let snapshot = Arc::new(FakeSnapshot::default());
    snapshot.set("log_level", Value::String("info".to_owned()));

    let monitor = Arc::new(SystemMonitor::new(
        Arc::clone(&harness.processor),
        Arc::new(FakeSampler::at(0.2)),
        Arc::clone(&snapshot) as Arc<dyn ConfigSnapshotSource>,
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        SystemMonitorConfig {
            interval: Duration::from_secs(600),
            ..SystemMonitorConfig::default()
        },
    ));

    let started = monitor.start().await;
    assert!(started.is_ok());

    snapshot.set("log_level", Value::String("debug".to_owned()));
    monitor.observe_once().await;
    monitor.stop().await;
    harness.processor.drain().await;

    let stored = harness.store.stored().await;
    let drift: Vec<_> = stored
        .iter()
        .filter(|record| record.entity_type == "system_config")
        .collect();
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].operation, AuditOperation::Update);

    let lifecycle: Vec<_> = stored
        .iter()
        .filter(|record| record.entity_type == "system_process")
        .collect();
    assert_eq!(lifecycle.len(), 2);

    let payload = decode_payload(drift[0], harness.kms.as_ref() as &dyn KeyManagementService)
        .await
        .unwrap_or_default();
    assert_eq!(
        payload["old_values"]["log_level"],
        Value::String("info".to_owned())
    );
    assert_eq!(
        payload["new_values"]["log_level"],
        Value::String("debug".to_owned())
    );
}

#[tokio::test]
async fn memory_pressure_emits_severity_classified_events() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), fast_config()).await;

    let monitor = Arc::new(SystemMonitor::new(
        Arc::clone(&harness.processor),
        Arc::new(FakeSampler::at(0.96)),
        Arc::new(FakeSnapshot::default()) as Arc<dyn ConfigSnapshotSource>,
        Arc::clone(&harness.clock) as Arc<dyn Clock>,
        SystemMonitorConfig {
            interval: Duration::from_secs(600),
            ..SystemMonitorConfig::default()
        },
    ));

    monitor.observe_once().await;
    harness.processor.drain().await;

    let stored = harness.store.stored().await;
    let resource: Vec<_> = stored
        .iter()
        .filter(|record| record.entity_type == "system_resource")
        .collect();
    assert_eq!(resource.len(), 1);

    let payload = decode_payload(resource[0], harness.kms.as_ref() as &dyn KeyManagementService)
        .await
        .unwrap_or_default();
    assert_eq!(
        payload["kind"]["severity"],
        Value::String(
            serde_json::to_value(Severity::Critical)
                .ok()
                .and_then(|value| value.as_str().map(str::to_owned))
                .unwrap_or_default()
        )
    );
}
