use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use trailguard_core::{AppError, AppResult, CorrelationId, NonEmptyString};

use crate::config::AuditOperation;

/// Severity classification for system-level events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational event.
    Info,
    /// Degraded but functioning.
    Warning,
    /// A failed operation.
    Error,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// Returns a stable storage value for the severity.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Typed specialization attached to an audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Plain audit record without specialization.
    Base,
    /// Security-relevant event.
    Security {
        /// Severity of the observation.
        severity: Severity,
        /// Optional threat indicator label.
        threat_indicator: Option<String>,
    },
    /// Compliance-relevant event.
    Compliance {
        /// Regulatory framework label.
        framework: String,
        /// Optional control identifier within the framework.
        control_id: Option<String>,
    },
    /// Performance observation.
    Performance {
        /// Observed duration in milliseconds.
        duration_ms: u64,
        /// Error label when the observed operation failed.
        error: Option<String>,
    },
}

/// One changed field within a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Name of the changed field.
    pub field_name: String,
    /// Value before the mutation, when captured.
    pub old_value: Option<Value>,
    /// Value after the mutation, when captured.
    pub new_value: Option<Value>,
}

/// Input payload for constructing an [`AuditEvent`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditEventInput {
    /// Stable event identifier; generated when absent.
    pub id: Option<Uuid>,
    /// Event timestamp; defaults to the moment of construction upstream.
    pub timestamp: Option<DateTime<Utc>>,
    /// Entity type label.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Observed operation.
    pub operation: Option<AuditOperation>,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Session identifier.
    pub session_id: String,
    /// Caller IP address.
    pub ip_address: String,
    /// Upstream correlation identifier; generated when absent.
    pub correlation_id: Option<CorrelationId>,
    /// Field values before the mutation.
    pub old_values: Option<Map<String, Value>>,
    /// Field values after the mutation.
    pub new_values: Option<Map<String, Value>>,
    /// Free-form metadata facets.
    pub metadata: Map<String, Value>,
    /// Search tags.
    pub tags: Vec<String>,
    /// Pre-computed risk score, when supplied upstream.
    pub risk_score: Option<u8>,
    /// Typed specialization.
    pub kind: Option<AuditEventKind>,
}

/// Normalized audit event shared by all capture adapters.
///
/// Immutable once persisted; the public store contract offers insert and
/// TTL-based purge only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    id: Uuid,
    timestamp: DateTime<Utc>,
    entity_type: NonEmptyString,
    entity_id: NonEmptyString,
    operation: AuditOperation,
    user_id: Option<String>,
    session_id: NonEmptyString,
    ip_address: NonEmptyString,
    correlation_id: CorrelationId,
    old_values: Option<Map<String, Value>>,
    new_values: Option<Map<String, Value>>,
    change_set: Option<Vec<FieldChange>>,
    metadata: Map<String, Value>,
    tags: Vec<String>,
    risk_score: Option<u8>,
    kind: AuditEventKind,
}

impl AuditEvent {
    /// Creates a validated audit event.
    ///
    /// The change set is computed only when both old and new values are
    /// present; a missing correlation id is generated here so every event
    /// carries one.
    pub fn new(input: AuditEventInput) -> AppResult<Self> {
        let operation = input.operation.ok_or_else(|| {
            AppError::Capture("audit event requires an operation".to_owned())
        })?;

        if let Some(score) = input.risk_score {
            if score > 100 {
                return Err(AppError::Capture(format!(
                    "risk score {score} is outside the 0-100 range"
                )));
            }
        }

        let timestamp = input.timestamp.ok_or_else(|| {
            AppError::Capture("audit event requires a timestamp".to_owned())
        })?;

        let change_set = match (&input.old_values, &input.new_values) {
            (Some(old_values), Some(new_values)) => {
                Some(compute_change_set(old_values, new_values))
            }
            _ => None,
        };

        Ok(Self {
            id: input.id.unwrap_or_else(Uuid::new_v4),
            timestamp,
            entity_type: NonEmptyString::new(input.entity_type)?,
            entity_id: NonEmptyString::new(input.entity_id)?,
            operation,
            user_id: input.user_id,
            session_id: NonEmptyString::new(input.session_id)?,
            ip_address: NonEmptyString::new(input.ip_address)?,
            correlation_id: input.correlation_id.unwrap_or_default(),
            old_values: input.old_values,
            new_values: input.new_values,
            change_set,
            metadata: input.metadata,
            tags: input.tags,
            risk_score: input.risk_score,
            kind: input.kind.unwrap_or(AuditEventKind::Base),
        })
    }

    /// Returns the stable event identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the event timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the entity type label.
    #[must_use]
    pub fn entity_type(&self) -> &NonEmptyString {
        &self.entity_type
    }

    /// Returns the entity identifier.
    #[must_use]
    pub fn entity_id(&self) -> &NonEmptyString {
        &self.entity_id
    }

    /// Returns the observed operation.
    #[must_use]
    pub fn operation(&self) -> AuditOperation {
        self.operation
    }

    /// Returns the acting user, when known.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the session identifier.
    #[must_use]
    pub fn session_id(&self) -> &NonEmptyString {
        &self.session_id
    }

    /// Returns the caller IP address.
    #[must_use]
    pub fn ip_address(&self) -> &NonEmptyString {
        &self.ip_address
    }

    /// Returns the correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the captured old values.
    #[must_use]
    pub fn old_values(&self) -> Option<&Map<String, Value>> {
        self.old_values.as_ref()
    }

    /// Returns the captured new values.
    #[must_use]
    pub fn new_values(&self) -> Option<&Map<String, Value>> {
        self.new_values.as_ref()
    }

    /// Returns the computed change set.
    #[must_use]
    pub fn change_set(&self) -> Option<&[FieldChange]> {
        self.change_set.as_deref()
    }

    /// Returns the metadata facets.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the search tags.
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Returns the risk score, when assigned.
    #[must_use]
    pub fn risk_score(&self) -> Option<u8> {
        self.risk_score
    }

    /// Returns the typed specialization.
    #[must_use]
    pub fn kind(&self) -> &AuditEventKind {
        &self.kind
    }

    /// Returns a copy carrying the given risk score.
    pub fn with_risk_score(mut self, score: u8) -> AppResult<Self> {
        if score > 100 {
            return Err(AppError::Capture(format!(
                "risk score {score} is outside the 0-100 range"
            )));
        }
        self.risk_score = Some(score);
        Ok(self)
    }

    /// Returns the names of all fields this event captured values for.
    #[must_use]
    pub fn captured_field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if let Some(old_values) = &self.old_values {
            names.extend(old_values.keys().cloned());
        }
        if let Some(new_values) = &self.new_values {
            for key in new_values.keys() {
                if !names.contains(key) {
                    names.push(key.clone());
                }
            }
        }
        names
    }
}

fn compute_change_set(
    old_values: &Map<String, Value>,
    new_values: &Map<String, Value>,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for (field_name, old_value) in old_values {
        match new_values.get(field_name) {
            Some(new_value) if new_value != old_value => changes.push(FieldChange {
                field_name: field_name.clone(),
                old_value: Some(old_value.clone()),
                new_value: Some(new_value.clone()),
            }),
            None => changes.push(FieldChange {
                field_name: field_name.clone(),
                old_value: Some(old_value.clone()),
                new_value: None,
            }),
            Some(_) => {}
        }
    }

    for (field_name, new_value) in new_values {
        if !old_values.contains_key(field_name) {
            changes.push(FieldChange {
                field_name: field_name.clone(),
                old_value: None,
                new_value: Some(new_value.clone()),
            });
        }
    }

    changes
}

/// Lifecycle state of a persisted audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Built at the point of capture.
    Created,
    /// Held in an adapter-local queue.
    Buffered,
    /// Durably stored and queryable.
    Persisted,
    /// Moved to a cold tier.
    Archived,
    /// Removed after TTL expiry; terminal.
    Purged,
}

impl RecordState {
    /// Returns whether a transition into `next` is legal.
    ///
    /// Transitions only move forward; `Purged` is terminal and irreversible.
    #[must_use]
    pub fn can_transition_to(&self, next: RecordState) -> bool {
        if *self == Self::Purged {
            return false;
        }
        *self < next
    }

    /// Returns a stable storage value for the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Buffered => "buffered",
            Self::Persisted => "persisted",
            Self::Archived => "archived",
            Self::Purged => "purged",
        }
    }
}

impl std::str::FromStr for RecordState {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "created" => Ok(Self::Created),
            "buffered" => Ok(Self::Buffered),
            "persisted" => Ok(Self::Persisted),
            "archived" => Ok(Self::Archived),
            "purged" => Ok(Self::Purged),
            _ => Err(AppError::Validation(format!(
                "unknown record state '{value}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{Map, json};

    use trailguard_core::CorrelationId;

    use super::{AuditEvent, AuditEventInput, AuditOperation, RecordState};

    fn base_input() -> AuditEventInput {
        AuditEventInput {
            timestamp: Some(Utc::now()),
            entity_type: "user".to_owned(),
            entity_id: "user-1".to_owned(),
            operation: Some(AuditOperation::Update),
            session_id: "session-1".to_owned(),
            ip_address: "10.0.0.1".to_owned(),
            ..AuditEventInput::default()
        }
    }

    #[test]
    fn correlation_id_is_generated_when_absent() {
        let event = AuditEvent::new(base_input());
        assert!(event.is_ok());
        let event = event.unwrap_or_else(|_| unreachable!());
        assert_eq!(event.correlation_id().to_string().len(), 36);
    }

    #[test]
    fn upstream_correlation_id_is_preserved() {
        let correlation_id = CorrelationId::new();
        let mut input = base_input();
        input.correlation_id = Some(correlation_id);

        let event = AuditEvent::new(input).unwrap_or_else(|_| unreachable!());
        assert_eq!(event.correlation_id(), correlation_id);
    }

    #[test]
    fn change_set_requires_both_value_sets() {
        let mut input = base_input();
        let mut old_values = Map::new();
        old_values.insert("status".to_owned(), json!("active"));
        input.old_values = Some(old_values);

        let event = AuditEvent::new(input).unwrap_or_else(|_| unreachable!());
        assert!(event.change_set().is_none());
    }

    #[test]
    fn change_set_lists_only_changed_fields() {
        let mut input = base_input();
        let mut old_values = Map::new();
        old_values.insert("status".to_owned(), json!("active"));
        old_values.insert("plan".to_owned(), json!("pro"));
        let mut new_values = Map::new();
        new_values.insert("status".to_owned(), json!("disabled"));
        new_values.insert("plan".to_owned(), json!("pro"));
        input.old_values = Some(old_values);
        input.new_values = Some(new_values);

        let event = AuditEvent::new(input).unwrap_or_else(|_| unreachable!());
        let change_set = event.change_set().unwrap_or_default();
        assert_eq!(change_set.len(), 1);
        assert_eq!(change_set[0].field_name, "status");
    }

    #[test]
    fn risk_score_above_bound_is_rejected() {
        let mut input = base_input();
        input.risk_score = Some(101);
        assert!(AuditEvent::new(input).is_err());
    }

    #[test]
    fn record_state_never_re_enters_earlier_state() {
        assert!(RecordState::Created.can_transition_to(RecordState::Persisted));
        assert!(RecordState::Persisted.can_transition_to(RecordState::Archived));
        assert!(RecordState::Persisted.can_transition_to(RecordState::Purged));
        assert!(!RecordState::Persisted.can_transition_to(RecordState::Created));
        assert!(!RecordState::Purged.can_transition_to(RecordState::Archived));
    }
}
