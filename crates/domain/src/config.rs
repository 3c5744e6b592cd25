use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trailguard_core::{AppError, AppResult, NonEmptyString};

use crate::classification::{MaskingStrategy, PiiType};

/// Granularity of change capture configured per entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// No capture at all.
    None,
    /// Deletions of the identifier only.
    Basic,
    /// Sensitive changes plus update/delete capture of other fields.
    Detailed,
    /// Full before/after capture, synchronous for sensitive changes.
    Full,
}

impl AuditLevel {
    /// Returns a stable storage value for the audit level.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Detailed => "detailed",
            Self::Full => "full",
        }
    }
}

impl FromStr for AuditLevel {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "basic" => Ok(Self::Basic),
            "detailed" => Ok(Self::Detailed),
            "full" => Ok(Self::Full),
            _ => Err(AppError::Configuration(format!(
                "unknown audit level '{value}'"
            ))),
        }
    }
}

/// Operation kinds observed by the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    /// Record creation.
    Create,
    /// Record mutation.
    Update,
    /// Record removal.
    Delete,
    /// Read access.
    Select,
}

impl AuditOperation {
    /// Returns a stable storage value for the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Select => "select",
        }
    }
}

impl FromStr for AuditOperation {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "select" => Ok(Self::Select),
            _ => Err(AppError::Validation(format!("unknown operation '{value}'"))),
        }
    }
}

/// Audit configuration for a single entity field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFieldConfig {
    field_name: NonEmptyString,
    is_sensitive: bool,
    pii_type: PiiType,
    masking_strategy: MaskingStrategy,
    retention_period_days: u32,
}

impl AuditFieldConfig {
    /// Creates a validated field configuration.
    pub fn new(
        field_name: impl Into<String>,
        pii_type: PiiType,
        masking_strategy: MaskingStrategy,
        retention_period_days: u32,
    ) -> AppResult<Self> {
        let field_name = NonEmptyString::new(field_name)?;
        let is_sensitive = pii_type.is_sensitive();

        if is_sensitive && masking_strategy == MaskingStrategy::None {
            return Err(AppError::Configuration(format!(
                "sensitive field '{}' requires a masking strategy",
                field_name.as_str()
            )));
        }

        if retention_period_days == 0 {
            return Err(AppError::Configuration(format!(
                "field '{}' requires a positive retention period",
                field_name.as_str()
            )));
        }

        Ok(Self {
            field_name,
            is_sensitive,
            pii_type,
            masking_strategy,
            retention_period_days,
        })
    }

    /// Returns the field name.
    #[must_use]
    pub fn field_name(&self) -> &NonEmptyString {
        &self.field_name
    }

    /// Returns whether the field holds sensitive data.
    #[must_use]
    pub fn is_sensitive(&self) -> bool {
        self.is_sensitive
    }

    /// Returns the classified PII type.
    #[must_use]
    pub fn pii_type(&self) -> PiiType {
        self.pii_type
    }

    /// Returns the masking strategy applied before storage.
    #[must_use]
    pub fn masking_strategy(&self) -> MaskingStrategy {
        self.masking_strategy
    }

    /// Returns the retention period in days.
    #[must_use]
    pub fn retention_period_days(&self) -> u32 {
        self.retention_period_days
    }
}

/// Optional predicate restricting when a trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    /// Field the predicate inspects.
    pub field_name: String,
    /// Value the field must equal for the trigger to fire.
    pub equals: Value,
}

impl TriggerCondition {
    /// Evaluates the predicate against a record payload.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        record
            .get(self.field_name.as_str())
            .map(|value| value == &self.equals)
            .unwrap_or(false)
    }
}

/// Specification of one change-capture trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrigger {
    operation: AuditOperation,
    capture_fields: Vec<NonEmptyString>,
    capture_old_values: bool,
    capture_new_values: bool,
    condition: Option<TriggerCondition>,
}

impl AuditTrigger {
    /// Creates a trigger, rejecting new-value capture over sensitive fields.
    pub fn new(
        operation: AuditOperation,
        capture_fields: Vec<String>,
        capture_old_values: bool,
        capture_new_values: bool,
        condition: Option<TriggerCondition>,
        field_configs: &[AuditFieldConfig],
    ) -> AppResult<Self> {
        let capture_fields = capture_fields
            .into_iter()
            .map(NonEmptyString::new)
            .collect::<AppResult<Vec<_>>>()?;

        if capture_new_values {
            let sensitive = capture_fields.iter().find(|captured| {
                field_configs.iter().any(|field| {
                    field.is_sensitive() && field.field_name().as_str() == captured.as_str()
                })
            });

            if let Some(captured) = sensitive {
                return Err(AppError::Configuration(format!(
                    "trigger on '{}' must not capture new values of sensitive field '{}'",
                    operation.as_str(),
                    captured.as_str()
                )));
            }
        }

        Ok(Self {
            operation,
            capture_fields,
            capture_old_values,
            capture_new_values,
            condition,
        })
    }

    /// Returns the operation this trigger observes.
    #[must_use]
    pub fn operation(&self) -> AuditOperation {
        self.operation
    }

    /// Returns the captured field names.
    #[must_use]
    pub fn capture_fields(&self) -> &[NonEmptyString] {
        &self.capture_fields
    }

    /// Returns whether old values are captured.
    #[must_use]
    pub fn capture_old_values(&self) -> bool {
        self.capture_old_values
    }

    /// Returns whether new values are captured.
    #[must_use]
    pub fn capture_new_values(&self) -> bool {
        self.capture_new_values
    }

    /// Returns the optional firing condition.
    #[must_use]
    pub fn condition(&self) -> Option<&TriggerCondition> {
        self.condition.as_ref()
    }

    /// Returns whether this trigger captures the given field.
    #[must_use]
    pub fn captures(&self, field_name: &str) -> bool {
        self.capture_fields
            .iter()
            .any(|captured| captured.as_str() == field_name)
    }
}

/// Complete audit configuration for one entity.
///
/// Regenerated wholesale whenever the source schema changes; never mutated
/// in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntityConfig {
    entity_name: NonEmptyString,
    storage_name: NonEmptyString,
    audit_level: AuditLevel,
    fields: Vec<AuditFieldConfig>,
    triggers: Vec<AuditTrigger>,
}

impl AuditEntityConfig {
    /// Creates a validated entity configuration.
    pub fn new(
        entity_name: impl Into<String>,
        storage_name: impl Into<String>,
        audit_level: AuditLevel,
        fields: Vec<AuditFieldConfig>,
        triggers: Vec<AuditTrigger>,
    ) -> AppResult<Self> {
        let entity_name = NonEmptyString::new(entity_name)?;
        let storage_name = NonEmptyString::new(storage_name)?;

        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.field_name().as_str().to_owned()) {
                return Err(AppError::Configuration(format!(
                    "duplicate field '{}' in configuration for entity '{}'",
                    field.field_name().as_str(),
                    entity_name.as_str()
                )));
            }
        }

        for trigger in &triggers {
            if trigger.capture_new_values() {
                for captured in trigger.capture_fields() {
                    let is_sensitive = fields.iter().any(|field| {
                        field.is_sensitive() && field.field_name().as_str() == captured.as_str()
                    });
                    if is_sensitive {
                        return Err(AppError::Configuration(format!(
                            "trigger captures new values of sensitive field '{}'",
                            captured.as_str()
                        )));
                    }
                }
            }
        }

        Ok(Self {
            entity_name,
            storage_name,
            audit_level,
            fields,
            triggers,
        })
    }

    /// Returns the entity logical name.
    #[must_use]
    pub fn entity_name(&self) -> &NonEmptyString {
        &self.entity_name
    }

    /// Returns the physical storage name.
    #[must_use]
    pub fn storage_name(&self) -> &NonEmptyString {
        &self.storage_name
    }

    /// Returns the configured audit level.
    #[must_use]
    pub fn audit_level(&self) -> AuditLevel {
        self.audit_level
    }

    /// Returns the ordered field configurations.
    #[must_use]
    pub fn fields(&self) -> &[AuditFieldConfig] {
        &self.fields
    }

    /// Returns the generated triggers.
    #[must_use]
    pub fn triggers(&self) -> &[AuditTrigger] {
        &self.triggers
    }

    /// Returns the configuration for one field, when present.
    #[must_use]
    pub fn field(&self, field_name: &str) -> Option<&AuditFieldConfig> {
        self.fields
            .iter()
            .find(|field| field.field_name().as_str() == field_name)
    }

    /// Returns triggers registered for one operation.
    #[must_use]
    pub fn triggers_for(&self, operation: AuditOperation) -> Vec<&AuditTrigger> {
        self.triggers
            .iter()
            .filter(|trigger| trigger.operation() == operation)
            .collect()
    }

    /// Returns the effective retention for a set of captured fields.
    ///
    /// The effective TTL of a record is the minimum retention among its
    /// captured fields; fields without configuration fall back to the
    /// non-sensitive default.
    #[must_use]
    pub fn effective_retention_days(&self, captured_fields: &[String]) -> u32 {
        captured_fields
            .iter()
            .map(|name| {
                self.field(name.as_str())
                    .map(AuditFieldConfig::retention_period_days)
                    .unwrap_or_else(|| crate::classification::default_retention_days(PiiType::None))
            })
            .min()
            .unwrap_or_else(|| crate::classification::default_retention_days(PiiType::None))
    }
}
