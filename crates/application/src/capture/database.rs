use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::warn;

use trailguard_core::AppResult;
use trailguard_domain::{
    AuditEntityConfig, AuditEvent, AuditEventInput, AuditLevel, AuditOperation, AuditTrigger,
};

use crate::audit_ports::Clock;
use crate::config_service::AuditConfigRegistry;
use crate::pipeline::EventProcessor;

use super::CaptureContext;

/// Application-level change-capture adapter for entity mutations.
///
/// One implementation of the change-capture seam; trigger-based or
/// WAL-tailing adapters can replace it per deployment. Hooks run before
/// the mutation commits. Under `full` audit level a sensitive-field change
/// is processed synchronously so the mutation and its audit record succeed
/// or fail together; every other path enqueues asynchronously and never
/// blocks the caller.
pub struct DatabaseMutationCapture {
    registry: Arc<AuditConfigRegistry>,
    processor: Arc<EventProcessor>,
    clock: Arc<dyn Clock>,
    dropped: AtomicU64,
}

impl DatabaseMutationCapture {
    /// Creates the adapter.
    #[must_use]
    pub fn new(
        registry: Arc<AuditConfigRegistry>,
        processor: Arc<EventProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            processor,
            clock,
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the count of events this adapter failed to hand off.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records a pending record creation.
    pub async fn record_create(
        &self,
        entity_type: &str,
        entity_id: &str,
        new_values: &Map<String, Value>,
        context: CaptureContext,
    ) -> AppResult<()> {
        let Some(config) = self.registry.get(entity_type).await else {
            return Ok(());
        };

        let triggers = config.triggers_for(AuditOperation::Create);
        let captured_new =
            captured_values(&triggers, new_values, new_values, &config, true);
        if captured_new.is_empty() {
            return Ok(());
        }

        let event = self.build_event(
            &config,
            entity_id,
            AuditOperation::Create,
            None,
            Some(captured_new),
            context,
        )?;
        self.emit(event, false).await
    }

    /// Records a pending record update.
    ///
    /// Diffs the changed fields against each update trigger's capture list.
    /// Sensitive new values are never emitted; only the old value flows on
    /// to the redactor.
    pub async fn record_update(
        &self,
        entity_type: &str,
        entity_id: &str,
        old_values: &Map<String, Value>,
        new_values: &Map<String, Value>,
        context: CaptureContext,
    ) -> AppResult<()> {
        let Some(config) = self.registry.get(entity_type).await else {
            return Ok(());
        };

        let changed: Vec<String> = changed_fields(old_values, new_values);
        if changed.is_empty() {
            return Ok(());
        }

        let triggers = config.triggers_for(AuditOperation::Update);
        let mut captured_old = Map::new();
        let mut captured_new = Map::new();

        for trigger in &triggers {
            if !condition_matches(trigger, new_values, old_values) {
                continue;
            }
            for field_name in &changed {
                if !trigger.captures(field_name.as_str()) {
                    continue;
                }
                if trigger.capture_old_values() {
                    if let Some(value) = old_values.get(field_name.as_str()) {
                        captured_old.insert(field_name.clone(), value.clone());
                    }
                }
                if trigger.capture_new_values() && !is_sensitive(&config, field_name.as_str()) {
                    if let Some(value) = new_values.get(field_name.as_str()) {
                        captured_new.insert(field_name.clone(), value.clone());
                    }
                }
            }
        }

        if captured_old.is_empty() && captured_new.is_empty() {
            return Ok(());
        }

        let sensitive_changed = changed
            .iter()
            .any(|field_name| is_sensitive(&config, field_name.as_str()));

        let event = self.build_event(
            &config,
            entity_id,
            AuditOperation::Update,
            (!captured_old.is_empty()).then_some(captured_old),
            (!captured_new.is_empty()).then_some(captured_new),
            context,
        )?;

        let synchronous = config.audit_level() == AuditLevel::Full && sensitive_changed;
        self.emit(event, synchronous).await
    }

    /// Records a pending record deletion.
    pub async fn record_delete(
        &self,
        entity_type: &str,
        entity_id: &str,
        old_values: &Map<String, Value>,
        context: CaptureContext,
    ) -> AppResult<()> {
        let Some(config) = self.registry.get(entity_type).await else {
            return Ok(());
        };

        let triggers = config.triggers_for(AuditOperation::Delete);
        let mut captured_old = Map::new();
        for trigger in &triggers {
            if !condition_matches(trigger, old_values, old_values) {
                continue;
            }
            for captured in trigger.capture_fields() {
                if trigger.capture_old_values() {
                    if let Some(value) = old_values.get(captured.as_str()) {
                        captured_old.insert(captured.as_str().to_owned(), value.clone());
                    }
                }
            }
        }

        if captured_old.is_empty() {
            return Ok(());
        }

        let event = self.build_event(
            &config,
            entity_id,
            AuditOperation::Delete,
            Some(captured_old),
            None,
            context,
        )?;
        self.emit(event, false).await
    }

    fn build_event(
        &self,
        config: &AuditEntityConfig,
        entity_id: &str,
        operation: AuditOperation,
        old_values: Option<Map<String, Value>>,
        new_values: Option<Map<String, Value>>,
        context: CaptureContext,
    ) -> AppResult<AuditEvent> {
        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("database".to_owned()));
        metadata.insert(
            "storage_name".to_owned(),
            Value::String(config.storage_name().as_str().to_owned()),
        );

        AuditEvent::new(AuditEventInput {
            timestamp: Some(self.clock.now()),
            entity_type: config.entity_name().as_str().to_owned(),
            entity_id: entity_id.to_owned(),
            operation: Some(operation),
            user_id: context.user_id,
            session_id: context.session_id,
            ip_address: context.ip_address,
            correlation_id: context.correlation_id,
            old_values,
            new_values,
            metadata,
            tags: vec!["database".to_owned()],
            ..AuditEventInput::default()
        })
    }

    async fn emit(&self, event: AuditEvent, synchronous: bool) -> AppResult<()> {
        if synchronous {
            // Compliance path: failure aborts the originating mutation.
            self.processor.process_now(event).await?;
            return Ok(());
        }

        if !self.processor.enqueue(event).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("database mutation event dropped under backpressure");
        }
        Ok(())
    }
}

fn changed_fields(
    old_values: &Map<String, Value>,
    new_values: &Map<String, Value>,
) -> Vec<String> {
    let mut changed: Vec<String> = old_values
        .iter()
        .filter(|(field_name, old_value)| new_values.get(field_name.as_str()) != Some(old_value))
        .map(|(field_name, _)| field_name.clone())
        .collect();

    for field_name in new_values.keys() {
        if !old_values.contains_key(field_name.as_str()) && !changed.contains(field_name) {
            changed.push(field_name.clone());
        }
    }

    changed
}

fn captured_values(
    triggers: &[&AuditTrigger],
    record: &Map<String, Value>,
    condition_scope: &Map<String, Value>,
    config: &AuditEntityConfig,
    exclude_sensitive: bool,
) -> Map<String, Value> {
    let mut captured = Map::new();
    for trigger in triggers {
        if !condition_matches(trigger, condition_scope, condition_scope) {
            continue;
        }
        for field in trigger.capture_fields() {
            if exclude_sensitive && is_sensitive(config, field.as_str()) {
                continue;
            }
            if let Some(value) = record.get(field.as_str()) {
                captured.insert(field.as_str().to_owned(), value.clone());
            }
        }
    }
    captured
}

fn condition_matches(
    trigger: &AuditTrigger,
    primary: &Map<String, Value>,
    fallback: &Map<String, Value>,
) -> bool {
    match trigger.condition() {
        Some(condition) => {
            let record = if primary.contains_key(condition.field_name.as_str()) {
                primary
            } else {
                fallback
            };
            condition.matches(&Value::Object(record.clone()))
        }
        None => true,
    }
}

fn is_sensitive(config: &AuditEntityConfig, field_name: &str) -> bool {
    config
        .field(field_name)
        .map(|field| field.is_sensitive())
        .unwrap_or(false)
}
