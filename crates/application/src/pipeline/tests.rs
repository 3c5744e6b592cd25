use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use trailguard_core::{AppError, AppResult};
use trailguard_domain::{
    AuditEvent, AuditEventInput, AuditLevel, AuditOperation, EntitySchema, RetentionPolicy,
    SchemaField, SchemaFieldType,
};

use crate::audit_ports::{
    AggregateBucket, AggregateQuery, AlertNotifier, AppendOutcome, AuditEventStore, AuditQuery,
    Clock, DeadLetterEntry, DeadLetterSink, KeyManagementService, OperationalAlert, PurgeOutcome,
    QueryPage, StoredAuditRecord,
};
use crate::config_service::{AuditConfigGenerator, AuditConfigInput, AuditConfigRegistry};

use super::masking::{hash_digest, mask_partial};
use super::serializer::{compress, decode_payload, decompress};
use super::tokens::search_tokens;
use super::{DropPolicy, EventProcessor, ProcessorConfig};

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

struct FakeKms {
    fail: AtomicBool,
}

impl FakeKms {
    fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }

    fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl KeyManagementService for FakeKms {
    async fn encrypt(&self, plaintext: &[u8], _key_id: &str) -> AppResult<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Encryption("key unavailable".to_owned()));
        }
        Ok(plaintext.iter().map(|byte| byte ^ 0x5a).collect())
    }

    async fn decrypt(&self, ciphertext: &[u8], _key_id: &str) -> AppResult<Vec<u8>> {
        Ok(ciphertext.iter().map(|byte| byte ^ 0x5a).collect())
    }

    fn active_key_id(&self) -> String {
        "key-1".to_owned()
    }
}

struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    fn at(instant: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(instant.timestamp_millis()),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.millis.load(Ordering::SeqCst))
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Default)]
struct FakeDeadLetter {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

#[async_trait]
impl DeadLetterSink for FakeDeadLetter {
    async fn push(&self, entry: DeadLetterEntry) -> AppResult<()> {
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

#[derive(Default)]
struct FakeAlerts {
    alerts: Mutex<Vec<OperationalAlert>>,
}

#[async_trait]
impl AlertNotifier for FakeAlerts {
    async fn notify(&self, alert: OperationalAlert) -> AppResult<()> {
        self.alerts.lock().await.push(alert);
        Ok(())
    }
}

fn fixed_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
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

struct Harness {
    processor: EventProcessor,
    store: Arc<FakeStore>,
    kms: Arc<FakeKms>,
    dead_letter: Arc<FakeDeadLetter>,
    alerts: Arc<FakeAlerts>,
}

async fn harness_with(
    registry: Arc<AuditConfigRegistry>,
    store: FakeStore,
    kms: FakeKms,
    config: ProcessorConfig,
) -> Harness {
    let store = Arc::new(store);
    let kms = Arc::new(kms);
    let dead_letter = Arc::new(FakeDeadLetter::default());
    let alerts = Arc::new(FakeAlerts::default());
    let clock = Arc::new(ManualClock::at(fixed_instant()));

    let processor = EventProcessor::start(
        registry,
        Arc::clone(&store) as Arc<dyn AuditEventStore>,
        Arc::clone(&kms) as Arc<dyn KeyManagementService>,
        clock,
        Arc::clone(&dead_letter) as Arc<dyn DeadLetterSink>,
        Arc::clone(&alerts) as Arc<dyn AlertNotifier>,
        config,
    );

    Harness {
        processor,
        store,
        kms,
        dead_letter,
        alerts,
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

fn update_event(entity_id: &str, old_values: Value, new_values: Value) -> AuditEvent {
    AuditEvent::new(AuditEventInput {
        timestamp: Some(fixed_instant()),
        entity_type: "user".to_owned(),
        entity_id: entity_id.to_owned(),
        operation: Some(AuditOperation::Update),
        user_id: Some("alice".to_owned()),
        session_id: "session-1".to_owned(),
        ip_address: "10.0.0.1".to_owned(),
        old_values: old_values.as_object().cloned(),
        new_values: new_values.as_object().cloned(),
        ..AuditEventInput::default()
    })
    .unwrap_or_else(|_| unreachable!())
}

#[test]
fn hash_digest_is_short_and_deterministic() {
    let first = hash_digest("hunter2");
    let second = hash_digest("hunter2");
    assert_eq!(first, second);
    assert_eq!(first.len(), 16);
    assert_ne!(first, hash_digest("hunter3"));
}

#[test]
fn partial_mask_keeps_email_domain() {
    assert_eq!(mask_partial("alice@example.com"), "a***@example.com");
    assert_eq!(mask_partial("ab"), "***");
    assert_eq!(mask_partial("summary"), "s***y");
}

#[test]
fn compression_round_trips() {
    let payload = br#"{"entity":"user","operation":"update"}"#;
    let compressed = compress(payload).unwrap_or_default();
    let restored = decompress(compressed.as_slice()).unwrap_or_default();
    assert_eq!(restored.as_slice(), payload);
}

#[tokio::test]
async fn sensitive_fields_are_masked_deterministically() {
    let registry = user_registry().await;
    let harness = harness_with(registry, FakeStore::default(), FakeKms::new(), fast_config()).await;

    let first = update_event(
        "user-1",
        json!({"password": "hunter2", "email": "alice@example.com", "plan": "pro"}),
        json!({"plan": "max"}),
    );
    let second = update_event(
        "user-1",
        json!({"password": "hunter2", "email": "alice@example.com", "plan": "pro"}),
        json!({"plan": "max"}),
    );

    let first_outcome = harness.processor.process_now(first).await;
    assert!(first_outcome.is_ok());
    let second_outcome = harness.processor.process_now(second).await;
    assert!(second_outcome.is_ok());

    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 2);

    let mut decoded = Vec::new();
    for record in &stored {
        assert!(record.is_encrypted);
        let payload = decode_payload(record, harness.kms.as_ref() as &dyn KeyManagementService)
            .await
            .unwrap_or_default();
        decoded.push(payload);
    }

    let first_old = &decoded[0]["old_values"];
    let second_old = &decoded[1]["old_values"];
    assert_eq!(first_old["password"], second_old["password"]);
    assert_eq!(
        first_old["password"],
        Value::String(hash_digest("hunter2"))
    );
    assert_eq!(
        first_old["email"],
        Value::String("a***@example.com".to_owned())
    );
    // Non-sensitive fields survive unchanged.
    assert_eq!(first_old["plan"], Value::String("pro".to_owned()));
}

#[tokio::test]
async fn unconfigured_entity_payload_stays_unencrypted() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), FakeKms::new(), fast_config()).await;

    let event = AuditEvent::new(AuditEventInput {
        timestamp: Some(fixed_instant()),
        entity_type: "ping".to_owned(),
        entity_id: "ping-1".to_owned(),
        operation: Some(AuditOperation::Select),
        session_id: "session-1".to_owned(),
        ip_address: "10.0.0.1".to_owned(),
        ..AuditEventInput::default()
    })
    .unwrap_or_else(|_| unreachable!());

    let outcome = harness.processor.process_now(event).await;
    assert!(outcome.is_ok());

    let stored = harness.store.stored().await;
    assert_eq!(stored.len(), 1);
    assert!(!stored[0].is_encrypted);
    assert!(stored[0].risk_score <= 100);
}

#[tokio::test]
async fn search_tokens_hash_sensitive_facets() {
    let registry = user_registry().await;
    let config = registry.get("user").await.unwrap_or_else(|| unreachable!());

    let mut metadata = Map::new();
    metadata.insert(
        "email".to_owned(),
        Value::String("alice@example.com".to_owned()),
    );
    let event = AuditEvent::new(AuditEventInput {
        timestamp: Some(fixed_instant()),
        entity_type: "user".to_owned(),
        entity_id: "user-1".to_owned(),
        operation: Some(AuditOperation::Update),
        user_id: Some("Alice".to_owned()),
        session_id: "session-1".to_owned(),
        ip_address: "10.0.0.1".to_owned(),
        metadata,
        tags: vec!["Admin-Action".to_owned()],
        ..AuditEventInput::default()
    })
    .unwrap_or_else(|_| unreachable!());

    let tokens = search_tokens(&event, Some(config.as_ref()), &["email".to_owned()]);

    assert!(tokens.contains(&"user".to_owned()));
    assert!(tokens.contains(&"update".to_owned()));
    assert!(tokens.contains(&"user:alice".to_owned()));
    assert!(tokens.contains(&"ip:10.0.0.1".to_owned()));
    assert!(tokens.contains(&"admin".to_owned()));
    assert!(tokens.contains(&hash_digest("alice@example.com")));
    assert!(!tokens.iter().any(|token| token.contains("example.com")));
}

#[tokio::test]
async fn exhausted_retries_route_to_dead_letter() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(
        registry,
        FakeStore::failing(u32::MAX),
        FakeKms::new(),
        fast_config(),
    )
    .await;

    let event = update_event("user-9", json!({"plan": "pro"}), json!({"plan": "max"}));
    assert!(harness.processor.enqueue(event).await);
    harness.processor.drain().await;

    let entries = harness.dead_letter.entries.lock().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attempts, 3);

    let metrics = harness.processor.metrics();
    assert_eq!(metrics.dead_lettered, 1);
    assert_eq!(metrics.retried, 2);
    assert_eq!(metrics.processed, 0);
}

#[tokio::test]
async fn transient_store_failure_is_retried_to_success() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(
        registry,
        FakeStore::failing(2),
        FakeKms::new(),
        fast_config(),
    )
    .await;

    let event = update_event("user-2", json!({"plan": "pro"}), json!({"plan": "max"}));
    let outcome = harness.processor.process_now(event).await;
    assert!(outcome.is_ok());

    assert_eq!(harness.store.stored().await.len(), 1);
    assert_eq!(harness.processor.metrics().retried, 2);
}

#[tokio::test]
async fn process_now_propagates_persistence_failure() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(
        registry,
        FakeStore::failing(u32::MAX),
        FakeKms::new(),
        fast_config(),
    )
    .await;

    let event = update_event("user-3", json!({"plan": "pro"}), json!({"plan": "max"}));
    let outcome = harness.processor.process_now(event).await;
    assert!(matches!(outcome, Err(AppError::Persistence(_))));
}

#[tokio::test]
async fn encryption_failure_holds_event_and_raises_alert() {
    let registry = user_registry().await;
    let harness = harness_with(
        registry,
        FakeStore::default(),
        FakeKms::failing(),
        fast_config(),
    )
    .await;

    let event = update_event(
        "user-4",
        json!({"password": "hunter2"}),
        json!({"plan": "max"}),
    );
    assert!(harness.processor.enqueue(event).await);
    harness.processor.drain().await;

    // Never persisted in plaintext.
    assert!(harness.store.stored().await.is_empty());
    assert_eq!(harness.alerts.alerts.lock().await.len(), 1);
    assert_eq!(harness.processor.take_held_events().await.len(), 1);
    assert_eq!(harness.processor.metrics().held_for_encryption, 1);
}

#[tokio::test]
async fn duplicate_event_id_is_absorbed() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(registry, FakeStore::default(), FakeKms::new(), fast_config()).await;

    let event = update_event("user-5", json!({"plan": "pro"}), json!({"plan": "max"}));
    let first = harness.processor.process_now(event.clone()).await;
    assert!(matches!(first, Ok(AppendOutcome::Inserted)));

    let second = harness.processor.process_now(event).await;
    assert!(matches!(second, Ok(AppendOutcome::Duplicate)));
    assert_eq!(harness.store.stored().await.len(), 1);
}

#[tokio::test]
async fn saturated_queue_rejects_newest_event() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let config = ProcessorConfig {
        workers: 1,
        queue_capacity: 1,
        drop_policy: DropPolicy::RejectNewest,
        ..fast_config()
    };
    let harness = harness_with(
        registry,
        FakeStore::slow(Duration::from_millis(400)),
        FakeKms::new(),
        config,
    )
    .await;

    let first = update_event("user-6", json!({"plan": "a"}), json!({"plan": "b"}));
    assert!(harness.processor.enqueue(first).await);
    // Let the single worker pick the first event up and block in the store.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = update_event("user-6", json!({"plan": "b"}), json!({"plan": "c"}));
    assert!(harness.processor.enqueue(second).await);

    let third = update_event("user-6", json!({"plan": "c"}), json!({"plan": "d"}));
    assert!(!harness.processor.enqueue(third).await);
    assert_eq!(harness.processor.metrics().dropped, 1);

    harness.processor.drain().await;
    assert_eq!(harness.store.stored().await.len(), 2);
}

#[tokio::test]
async fn same_entity_events_preserve_order() {
    let registry = Arc::new(AuditConfigRegistry::new());
    let harness = harness_with(
        registry,
        FakeStore::default(),
        FakeKms::new(),
        ProcessorConfig {
            workers: 4,
            ..fast_config()
        },
    )
    .await;

    let mut expected = Vec::new();
    for sequence in 0..8 {
        let event = update_event(
            "user-7",
            json!({"counter": sequence}),
            json!({"counter": sequence + 1}),
        );
        expected.push(event.id());
        assert!(harness.processor.enqueue(event).await);
    }

    harness.processor.drain().await;

    let stored_ids: Vec<Uuid> = harness
        .store
        .stored()
        .await
        .iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(stored_ids, expected);
}
