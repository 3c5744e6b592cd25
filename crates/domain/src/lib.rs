//! Domain entities and invariants for the audit trail.

#![forbid(unsafe_code)]

mod classification;
mod config;
mod event;
mod risk;
mod schema;

pub use classification::{
    MaskingStrategy, PiiType, RetentionPolicy, classify_field, default_masking_strategy,
    default_retention_days,
};
pub use config::{
    AuditEntityConfig, AuditFieldConfig, AuditLevel, AuditOperation, AuditTrigger,
    TriggerCondition,
};
pub use event::{
    AuditEvent, AuditEventInput, AuditEventKind, FieldChange, RecordState, Severity,
};
pub use risk::{RiskSignals, score_event};
pub use schema::{EntitySchema, SchemaField, SchemaFieldType};
