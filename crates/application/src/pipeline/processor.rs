use std::collections::VecDeque;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Timelike;
use ipnet::IpNet;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};
use tracing::{error, warn};

use trailguard_core::{AppError, AppResult};
use trailguard_domain::{
    AuditEntityConfig, AuditEvent, AuditEventInput, AuditEventKind, AuditLevel, MaskingStrategy,
    RecordState, RiskSignals, Severity, score_event,
};

use crate::audit_ports::{
    AlertNotifier, AppendOutcome, AuditEventStore, Clock, DeadLetterEntry, DeadLetterSink,
    KeyManagementService, OperationalAlert, StoredAuditRecord,
};
use crate::config_service::AuditConfigRegistry;

use super::masking::{apply_sync_strategy, value_as_text};
use super::serializer::compress;
use super::tokens::search_tokens;

/// Behavior of a bounded queue under saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropPolicy {
    /// Reject the incoming event, keeping the oldest evidence.
    RejectNewest,
    /// Evict the oldest queued event to admit the incoming one.
    DropOldest,
}

/// Tuning for the event processor worker pool.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Number of pipeline workers; defaults to available concurrency.
    pub workers: usize,
    /// Bounded capacity of each worker queue.
    pub queue_capacity: usize,
    /// Maximum persistence attempts before dead-lettering.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
    /// Saturation behavior for worker queues.
    pub drop_policy: DropPolicy,
    /// Metadata facet names tokenized for search.
    pub searchable_facets: Vec<String>,
    /// Networks considered ordinary for risk scoring.
    pub trusted_networks: Vec<IpNet>,
    /// Inclusive start and exclusive end of business hours, UTC.
    pub business_hours: (u32, u32),
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
            queue_capacity: 1024,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            drop_policy: DropPolicy::RejectNewest,
            searchable_facets: Vec::new(),
            trusted_networks: Vec::new(),
            business_hours: (8, 18),
        }
    }
}

/// Counters exposed by the processor; drops are counted, never silent.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    processed: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    held_for_encryption: AtomicU64,
}

/// Point-in-time copy of the processor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events processed and persisted.
    pub processed: u64,
    /// Events dropped under queue saturation.
    pub dropped: u64,
    /// Persistence attempts retried.
    pub retried: u64,
    /// Events routed to the dead-letter sink.
    pub dead_lettered: u64,
    /// Events held back by encryption failures.
    pub held_for_encryption: u64,
}

impl ProcessorMetrics {
    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            held_for_encryption: self.held_for_encryption.load(Ordering::Relaxed),
        }
    }
}

struct WorkerQueue {
    events: Mutex<VecDeque<AuditEvent>>,
    notify: Notify,
}

struct PipelineCore {
    registry: Arc<AuditConfigRegistry>,
    store: Arc<dyn AuditEventStore>,
    kms: Arc<dyn KeyManagementService>,
    clock: Arc<dyn Clock>,
    dead_letter: Arc<dyn DeadLetterSink>,
    alerts: Arc<dyn AlertNotifier>,
    config: ProcessorConfig,
    metrics: Arc<ProcessorMetrics>,
    encryption_hold: Mutex<Vec<AuditEvent>>,
}

/// Redaction, scoring, serialization, and persistence pipeline.
///
/// Events are dispatched to workers by entity identity so processing for a
/// given entity is never reordered; no ordering is guaranteed across
/// entities or adapters.
pub struct EventProcessor {
    core: Arc<PipelineCore>,
    queues: Vec<Arc<WorkerQueue>>,
    in_flight: Arc<AtomicUsize>,
}

impl EventProcessor {
    /// Builds the pipeline and spawns its worker pool.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        registry: Arc<AuditConfigRegistry>,
        store: Arc<dyn AuditEventStore>,
        kms: Arc<dyn KeyManagementService>,
        clock: Arc<dyn Clock>,
        dead_letter: Arc<dyn DeadLetterSink>,
        alerts: Arc<dyn AlertNotifier>,
        config: ProcessorConfig,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let core = Arc::new(PipelineCore {
            registry,
            store,
            kms,
            clock,
            dead_letter,
            alerts,
            config,
            metrics: Arc::new(ProcessorMetrics::default()),
            encryption_hold: Mutex::new(Vec::new()),
        });

        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut queues = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let queue = Arc::new(WorkerQueue {
                events: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            });
            queues.push(Arc::clone(&queue));

            let worker_core = Arc::clone(&core);
            let worker_in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut events = queue.events.lock().await;
                        let event = events.pop_front();
                        if event.is_some() {
                            worker_in_flight.fetch_add(1, Ordering::SeqCst);
                        }
                        event
                    };

                    match next {
                        Some(event) => {
                            worker_core.process_async(event).await;
                            worker_in_flight.fetch_sub(1, Ordering::SeqCst);
                        }
                        None => queue.notify.notified().await,
                    }
                }
            });
        }

        Self {
            core,
            queues,
            in_flight,
        }
    }

    /// Returns the processor counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Enqueues one event for asynchronous processing.
    ///
    /// Never blocks the caller. Returns `false` when the event was rejected
    /// under saturation with the reject-newest policy; the drop is counted.
    pub async fn enqueue(&self, event: AuditEvent) -> bool {
        let shard = self.shard_for(&event);
        let queue = &self.queues[shard];
        let mut events = queue.events.lock().await;

        if events.len() >= self.core.config.queue_capacity {
            self.core.metrics.dropped.fetch_add(1, Ordering::Relaxed);
            match self.core.config.drop_policy {
                DropPolicy::RejectNewest => {
                    warn!(
                        entity_type = %event.entity_type().as_str(),
                        "audit event rejected under queue saturation"
                    );
                    return false;
                }
                DropPolicy::DropOldest => {
                    events.pop_front();
                    warn!(
                        entity_type = %event.entity_type().as_str(),
                        "oldest audit event evicted under queue saturation"
                    );
                }
            }
        }

        events.push_back(event);
        drop(events);
        queue.notify.notify_one();
        true
    }

    /// Processes one event synchronously, propagating failures.
    ///
    /// This is the compliance path for full-level sensitive mutations: the
    /// caller aborts its own operation on `Persistence` or `Encryption`
    /// errors.
    pub async fn process_now(&self, event: AuditEvent) -> AppResult<AppendOutcome> {
        let outcome = self.core.process_and_store(event).await?;
        self.core.metrics.processed.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Waits until all queued and in-flight events are drained.
    pub async fn drain(&self) {
        loop {
            let mut pending = self.in_flight.load(Ordering::SeqCst);
            for queue in &self.queues {
                pending += queue.events.lock().await.len();
            }
            if pending == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Drains the events held back by encryption failures.
    pub async fn take_held_events(&self) -> Vec<AuditEvent> {
        std::mem::take(&mut *self.core.encryption_hold.lock().await)
    }

    fn shard_for(&self, event: &AuditEvent) -> usize {
        let mut hasher = DefaultHasher::new();
        event.entity_type().as_str().hash(&mut hasher);
        event.entity_id().as_str().hash(&mut hasher);
        (hasher.finish() as usize) % self.queues.len()
    }
}

impl PipelineCore {
    async fn process_async(&self, event: AuditEvent) {
        match self.process_and_store(event.clone()).await {
            Ok(_) => {
                self.metrics.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(AppError::Encryption(message)) => {
                // Never persist in plaintext: hold the event and alert.
                self.metrics
                    .held_for_encryption
                    .fetch_add(1, Ordering::Relaxed);
                self.encryption_hold.lock().await.push(event);
                error!(error = %message, "audit event held back by encryption failure");
                let alert = OperationalAlert {
                    severity: Severity::Critical,
                    source: "event-processor".to_owned(),
                    message,
                };
                if let Err(alert_error) = self.alerts.notify(alert).await {
                    error!(error = %alert_error, "failed to deliver encryption alert");
                }
            }
            Err(error) => {
                self.metrics.dead_lettered.fetch_add(1, Ordering::Relaxed);
                let entry = DeadLetterEntry {
                    event_id: event.id(),
                    entity_type: event.entity_type().as_str().to_owned(),
                    error: error.to_string(),
                    attempts: self.config.max_attempts,
                    failed_at: self.clock.now(),
                };
                warn!(
                    event_id = %entry.event_id,
                    error = %entry.error,
                    "audit event routed to dead-letter sink"
                );
                if let Err(sink_error) = self.dead_letter.push(entry).await {
                    error!(error = %sink_error, "failed to record dead-letter entry");
                }
            }
        }
    }

    async fn process_and_store(&self, event: AuditEvent) -> AppResult<AppendOutcome> {
        let config = self
            .registry
            .get(event.entity_type().as_str())
            .await;
        let record = self.build_record(event, config.as_deref()).await?;
        self.append_with_retry(record).await
    }

    async fn build_record(
        &self,
        event: AuditEvent,
        config: Option<&AuditEntityConfig>,
    ) -> AppResult<StoredAuditRecord> {
        let entity_level = config
            .map(AuditEntityConfig::audit_level)
            .unwrap_or(AuditLevel::Basic);

        let risk_score = match event.risk_score() {
            Some(score) => score,
            None => score_event(event.operation(), entity_level, self.risk_signals(&event)),
        };

        let search_tokens = search_tokens(&event, config, &self.config.searchable_facets);
        let captured_fields = event.captured_field_names();
        let retention_days = config
            .map(|config| config.effective_retention_days(&captured_fields))
            .unwrap_or_else(|| {
                trailguard_domain::default_retention_days(trailguard_domain::PiiType::None)
            });
        let expires_at = event.timestamp() + chrono::Duration::days(i64::from(retention_days));

        let (masked_event, retained_sensitive) = self.mask_event(&event, config).await?;
        let (duration_ms, kind_error) = match masked_event.kind() {
            AuditEventKind::Performance { duration_ms, error } => {
                (Some(*duration_ms), error.is_some())
            }
            _ => (None, false),
        };
        let is_error = kind_error
            || masked_event
                .metadata()
                .get("outcome")
                .and_then(Value::as_str)
                .map(|outcome| outcome == "failure")
                .unwrap_or(false);

        let serialized = serde_json::to_vec(&masked_event).map_err(|error| {
            AppError::Internal(format!("failed to serialize audit payload: {error}"))
        })?;
        let compressed = compress(serialized.as_slice())?;

        let (payload, is_encrypted, encryption_key_id) = if retained_sensitive {
            let key_id = self.kms.active_key_id();
            let ciphertext = self.kms.encrypt(compressed.as_slice(), key_id.as_str()).await?;
            (ciphertext, true, Some(key_id))
        } else {
            (compressed, false, None)
        };

        Ok(StoredAuditRecord {
            id: event.id(),
            timestamp: event.timestamp(),
            entity_type: event.entity_type().as_str().to_owned(),
            entity_id: event.entity_id().as_str().to_owned(),
            operation: event.operation(),
            user_id: event.user_id().map(str::to_owned),
            correlation_id: event.correlation_id(),
            ip_address: event.ip_address().as_str().to_owned(),
            tags: event.tags().to_vec(),
            search_tokens,
            risk_score,
            payload,
            is_encrypted,
            encryption_key_id,
            duration_ms,
            is_error,
            state: RecordState::Persisted,
            expires_at,
            legal_hold: false,
        })
    }

    /// Applies each field's masking strategy and rebuilds the event from the
    /// masked values. Returns whether any hashed or encrypted content
    /// remains, which decides payload encryption.
    async fn mask_event(
        &self,
        event: &AuditEvent,
        config: Option<&AuditEntityConfig>,
    ) -> AppResult<(AuditEvent, bool)> {
        let mut retained_sensitive = false;

        let old_values = match event.old_values() {
            Some(map) => Some(self.mask_map(map, config, &mut retained_sensitive).await?),
            None => None,
        };
        let new_values = match event.new_values() {
            Some(map) => Some(self.mask_map(map, config, &mut retained_sensitive).await?),
            None => None,
        };
        let metadata = self
            .mask_map(event.metadata(), config, &mut retained_sensitive)
            .await?;

        let masked = AuditEvent::new(AuditEventInput {
            id: Some(event.id()),
            timestamp: Some(event.timestamp()),
            entity_type: event.entity_type().as_str().to_owned(),
            entity_id: event.entity_id().as_str().to_owned(),
            operation: Some(event.operation()),
            user_id: event.user_id().map(str::to_owned),
            session_id: event.session_id().as_str().to_owned(),
            ip_address: event.ip_address().as_str().to_owned(),
            correlation_id: Some(event.correlation_id()),
            old_values,
            new_values,
            metadata,
            tags: event.tags().to_vec(),
            risk_score: event.risk_score(),
            kind: Some(event.kind().clone()),
        })?;

        Ok((masked, retained_sensitive))
    }

    async fn mask_map(
        &self,
        map: &Map<String, Value>,
        config: Option<&AuditEntityConfig>,
        retained_sensitive: &mut bool,
    ) -> AppResult<Map<String, Value>> {
        let mut masked = Map::new();

        for (field_name, value) in map {
            let strategy = config
                .and_then(|config| config.field(field_name.as_str()))
                .filter(|field| field.is_sensitive())
                .map(|field| field.masking_strategy())
                .unwrap_or(MaskingStrategy::None);

            let masked_value = match strategy {
                MaskingStrategy::Encrypt => {
                    *retained_sensitive = true;
                    let key_id = self.kms.active_key_id();
                    let ciphertext = self
                        .kms
                        .encrypt(value_as_text(value).as_bytes(), key_id.as_str())
                        .await?;
                    Value::String(format!("enc:{key_id}:{}", BASE64.encode(ciphertext)))
                }
                MaskingStrategy::Hash => {
                    *retained_sensitive = true;
                    apply_sync_strategy(strategy, value)
                }
                other => apply_sync_strategy(other, value),
            };

            masked.insert(field_name.clone(), masked_value);
        }

        Ok(masked)
    }

    fn risk_signals(&self, event: &AuditEvent) -> RiskSignals {
        let hour = event.timestamp().hour();
        let (open, close) = self.config.business_hours;
        let off_hours = hour < open || hour >= close;

        let unusual_ip = if self.config.trusted_networks.is_empty() {
            false
        } else {
            match event.ip_address().as_str().parse::<IpAddr>() {
                Ok(address) => !self
                    .config
                    .trusted_networks
                    .iter()
                    .any(|network| network.contains(&address)),
                Err(_) => true,
            }
        };

        let failed_outcome = match event.kind() {
            AuditEventKind::Performance { error, .. } => error.is_some(),
            AuditEventKind::Security { severity, .. } => *severity >= Severity::Error,
            _ => false,
        } || event
            .metadata()
            .get("outcome")
            .and_then(Value::as_str)
            .map(|outcome| outcome == "failure")
            .unwrap_or(false);

        RiskSignals {
            off_hours,
            unusual_ip,
            failed_outcome,
        }
    }

    async fn append_with_retry(&self, record: StoredAuditRecord) -> AppResult<AppendOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append(record.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    if !matches!(error, AppError::Persistence(_))
                        || attempt >= self.config.max_attempts
                    {
                        return Err(error);
                    }
                    self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.config.initial_backoff * 2_u32.pow(attempt - 1);
                    warn!(
                        event_id = %record.id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "audit store append failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
