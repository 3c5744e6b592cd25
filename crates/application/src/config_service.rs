use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use trailguard_core::AppResult;
use trailguard_domain::{
    AuditEntityConfig, AuditFieldConfig, AuditLevel, AuditOperation, AuditTrigger, EntitySchema,
    MaskingStrategy, RetentionPolicy, classify_field, default_masking_strategy,
};

use crate::audit_ports::SchemaSource;

/// Input for one configuration generation run.
#[derive(Debug, Clone)]
pub struct AuditConfigInput {
    /// Entity schema supplied by the schema source.
    pub schema: EntitySchema,
    /// Floor for the derived audit level.
    pub minimum_level: AuditLevel,
    /// Deployment retention policy.
    pub policy: RetentionPolicy,
}

/// Generates per-entity audit configurations from entity schemas.
///
/// Generation is deterministic: classification walks the ordered rule
/// table, masking and retention follow the classified PII type, and the
/// audit level is derived from the share and criticality of sensitive
/// fields, floored by the caller-supplied minimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditConfigGenerator;

impl AuditConfigGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produces a complete entity configuration from a schema.
    pub fn generate(&self, input: &AuditConfigInput) -> AppResult<AuditEntityConfig> {
        let schema = &input.schema;

        let mut fields = Vec::with_capacity(schema.fields().len());
        for schema_field in schema.fields() {
            let pii_type = classify_field(schema_field.name().as_str(), schema_field.annotation());
            let field = AuditFieldConfig::new(
                schema_field.name().as_str(),
                pii_type,
                default_masking_strategy(pii_type),
                input.policy.retention_days(pii_type),
            )?;
            fields.push(field);
        }

        let audit_level = derive_audit_level(&fields, input.minimum_level);
        let triggers = generate_triggers(schema, &fields, audit_level)?;

        AuditEntityConfig::new(
            schema.entity_name().as_str(),
            schema.storage_name().as_str(),
            audit_level,
            fields,
            triggers,
        )
    }
}

fn derive_audit_level(fields: &[AuditFieldConfig], minimum_level: AuditLevel) -> AuditLevel {
    let sensitive_count = fields.iter().filter(|field| field.is_sensitive()).count();
    let has_critical = fields
        .iter()
        .any(|field| field.masking_strategy() == MaskingStrategy::Encrypt);

    let derived = if sensitive_count * 2 >= fields.len() && sensitive_count > 0 {
        AuditLevel::Full
    } else if has_critical {
        AuditLevel::Full
    } else if sensitive_count > 0 {
        AuditLevel::Detailed
    } else {
        AuditLevel::Basic
    };

    derived.max(minimum_level)
}

fn generate_triggers(
    schema: &EntitySchema,
    fields: &[AuditFieldConfig],
    audit_level: AuditLevel,
) -> AppResult<Vec<AuditTrigger>> {
    let mut triggers = Vec::new();

    if audit_level == AuditLevel::None {
        return Ok(triggers);
    }

    if audit_level == AuditLevel::Basic {
        triggers.push(AuditTrigger::new(
            AuditOperation::Delete,
            vec![schema.identifier_field().name().as_str().to_owned()],
            true,
            false,
            None,
            fields,
        )?);
        return Ok(triggers);
    }

    let sensitive_names: Vec<String> = fields
        .iter()
        .filter(|field| field.is_sensitive())
        .map(|field| field.field_name().as_str().to_owned())
        .collect();
    let non_sensitive_names: Vec<String> = fields
        .iter()
        .filter(|field| !field.is_sensitive())
        .map(|field| field.field_name().as_str().to_owned())
        .collect();

    // Sensitive changes capture old values only, never new ones.
    if !sensitive_names.is_empty() {
        triggers.push(AuditTrigger::new(
            AuditOperation::Update,
            sensitive_names,
            true,
            false,
            None,
            fields,
        )?);
    }

    if !non_sensitive_names.is_empty() {
        if audit_level == AuditLevel::Full {
            triggers.push(AuditTrigger::new(
                AuditOperation::Create,
                non_sensitive_names.clone(),
                false,
                true,
                None,
                fields,
            )?);
        }

        triggers.push(AuditTrigger::new(
            AuditOperation::Update,
            non_sensitive_names.clone(),
            true,
            true,
            None,
            fields,
        )?);

        triggers.push(AuditTrigger::new(
            AuditOperation::Delete,
            non_sensitive_names,
            true,
            false,
            None,
            fields,
        )?);
    }

    Ok(triggers)
}

/// Concurrent registry of active entity configurations.
///
/// Regeneration replaces an entry wholesale; configurations are shared
/// immutably with the capture adapters.
#[derive(Debug, Default)]
pub struct AuditConfigRegistry {
    configs: RwLock<HashMap<String, Arc<AuditEntityConfig>>>,
}

impl AuditConfigRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces the configuration for an entity.
    pub async fn register(&self, config: AuditEntityConfig) {
        let entity_name = config.entity_name().as_str().to_owned();
        self.configs
            .write()
            .await
            .insert(entity_name.clone(), Arc::new(config));
        info!(entity = %entity_name, "audit configuration registered");
    }

    /// Returns the active configuration for an entity, when present.
    pub async fn get(&self, entity_name: &str) -> Option<Arc<AuditEntityConfig>> {
        self.configs.read().await.get(entity_name).cloned()
    }

    /// Lists the entity names with active configurations.
    pub async fn entity_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Regenerates configurations for every entity in the schema source.
    pub async fn load_from(
        &self,
        source: &dyn SchemaSource,
        minimum_level: AuditLevel,
        policy: &RetentionPolicy,
    ) -> AppResult<usize> {
        let generator = AuditConfigGenerator::new();
        let schemas = source.list_entities().await?;
        let count = schemas.len();

        for schema in schemas {
            let config = generator.generate(&AuditConfigInput {
                schema,
                minimum_level,
                policy: policy.clone(),
            })?;
            self.register(config).await;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use trailguard_domain::{
        AuditLevel, AuditOperation, EntitySchema, MaskingStrategy, PiiType, RetentionPolicy,
        SchemaField, SchemaFieldType,
    };

    use super::{AuditConfigGenerator, AuditConfigInput, AuditConfigRegistry};

    fn schema_field(name: &str, is_identifier: bool) -> SchemaField {
        SchemaField::new(name, SchemaFieldType::Text, None, is_identifier)
            .unwrap_or_else(|_| unreachable!())
    }

    fn user_schema() -> EntitySchema {
        EntitySchema::new(
            "user",
            "users",
            vec![
                schema_field("id", true),
                schema_field("password", false),
                schema_field("display_label", false),
                schema_field("plan", false),
            ],
        )
        .unwrap_or_else(|_| unreachable!())
    }

    fn generate(schema: EntitySchema, minimum_level: AuditLevel) -> super::AuditEntityConfig {
        AuditConfigGenerator::new()
            .generate(&AuditConfigInput {
                schema,
                minimum_level,
                policy: RetentionPolicy::new(),
            })
            .unwrap_or_else(|_| unreachable!())
    }

    #[test]
    fn password_field_gets_credential_hash_and_ninety_days() {
        let config = generate(user_schema(), AuditLevel::None);
        let field = config.field("password").unwrap_or_else(|| unreachable!());

        assert!(field.is_sensitive());
        assert_eq!(field.pii_type(), PiiType::Credential);
        assert_eq!(field.masking_strategy(), MaskingStrategy::Hash);
        assert_eq!(field.retention_period_days(), 90);
    }

    #[test]
    fn sensitive_update_trigger_never_captures_new_values() {
        let config = generate(user_schema(), AuditLevel::None);

        let sensitive_triggers: Vec<_> = config
            .triggers_for(AuditOperation::Update)
            .into_iter()
            .filter(|trigger| trigger.captures("password"))
            .collect();

        assert!(!sensitive_triggers.is_empty());
        for trigger in sensitive_triggers {
            assert!(trigger.capture_old_values());
            assert!(!trigger.capture_new_values());
        }
    }

    #[test]
    fn entity_without_sensitive_fields_derives_basic_level() {
        let schema = EntitySchema::new(
            "shipment",
            "shipments",
            vec![schema_field("id", true), schema_field("status", false)],
        )
        .unwrap_or_else(|_| unreachable!());

        let config = generate(schema, AuditLevel::None);
        assert_eq!(config.audit_level(), AuditLevel::Basic);
    }

    #[test]
    fn basic_level_generates_only_identifier_delete_trigger() {
        let schema = EntitySchema::new(
            "shipment",
            "shipments",
            vec![schema_field("id", true), schema_field("status", false)],
        )
        .unwrap_or_else(|_| unreachable!());

        let config = generate(schema, AuditLevel::None);
        assert_eq!(config.triggers().len(), 1);

        let trigger = &config.triggers()[0];
        assert_eq!(trigger.operation(), AuditOperation::Delete);
        assert_eq!(trigger.capture_fields().len(), 1);
        assert_eq!(trigger.capture_fields()[0].as_str(), "id");
        assert!(config.triggers_for(AuditOperation::Create).is_empty());
        assert!(config.triggers_for(AuditOperation::Update).is_empty());
    }

    #[test]
    fn encrypt_class_field_forces_full_level() {
        let schema = EntitySchema::new(
            "payment",
            "payments",
            vec![
                schema_field("id", true),
                schema_field("card_number", false),
                schema_field("amount", false),
                schema_field("currency", false),
                schema_field("status", false),
            ],
        )
        .unwrap_or_else(|_| unreachable!());

        let config = generate(schema, AuditLevel::None);
        assert_eq!(config.audit_level(), AuditLevel::Full);
        assert!(!config.triggers_for(AuditOperation::Create).is_empty());
    }

    #[test]
    fn minimum_level_floors_the_derived_level() {
        let schema = EntitySchema::new(
            "shipment",
            "shipments",
            vec![schema_field("id", true), schema_field("status", false)],
        )
        .unwrap_or_else(|_| unreachable!());

        let config = generate(schema, AuditLevel::Full);
        assert_eq!(config.audit_level(), AuditLevel::Full);
    }

    #[test]
    fn detailed_level_omits_create_capture_of_non_sensitive_fields() {
        // One sensitive field out of four derives detailed, not full.
        let schema = EntitySchema::new(
            "profile",
            "profiles",
            vec![
                schema_field("id", true),
                schema_field("phone", false),
                schema_field("plan", false),
                schema_field("status", false),
                schema_field("region", false),
            ],
        )
        .unwrap_or_else(|_| unreachable!());

        let config = generate(schema, AuditLevel::None);
        assert_eq!(config.audit_level(), AuditLevel::Detailed);
        assert!(config.triggers_for(AuditOperation::Create).is_empty());
        assert!(!config.triggers_for(AuditOperation::Update).is_empty());
        assert!(!config.triggers_for(AuditOperation::Delete).is_empty());
    }

    #[tokio::test]
    async fn registry_replaces_configurations_wholesale() {
        let registry = AuditConfigRegistry::new();

        let first = generate(user_schema(), AuditLevel::None);
        registry.register(first).await;

        let replacement_schema = EntitySchema::new(
            "user",
            "users",
            vec![schema_field("id", true), schema_field("plan", false)],
        )
        .unwrap_or_else(|_| unreachable!());
        let replacement = generate(replacement_schema, AuditLevel::None);
        registry.register(replacement).await;

        let active = registry.get("user").await.unwrap_or_else(|| unreachable!());
        assert_eq!(active.fields().len(), 2);
        assert_eq!(registry.entity_names().await, vec!["user".to_owned()]);
    }
}
