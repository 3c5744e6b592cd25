use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;
use uuid::Uuid;

use trailguard_application::{
    AggregateBucket, AuditQuery, OrderBy, OrderDirection, QueryPage, StoredAuditRecord,
};
use trailguard_core::{AppError, AppResult, CorrelationId};
use trailguard_domain::{AuditEventKind, AuditOperation};

/// Batch ingestion request body.
#[derive(Debug, Deserialize)]
pub struct IngestBatchRequest {
    /// Audit events to ingest.
    pub events: Vec<IngestEventRequest>,
}

/// One AuditEvent-shaped record accepted by the ingestion API.
#[derive(Debug, Deserialize)]
pub struct IngestEventRequest {
    pub id: Option<Uuid>,
    pub timestamp: Option<DateTime<Utc>>,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub user_id: Option<String>,
    pub session_id: String,
    pub ip_address: String,
    pub correlation_id: Option<Uuid>,
    pub old_values: Option<Map<String, Value>>,
    pub new_values: Option<Map<String, Value>>,
    pub metadata: Option<Map<String, Value>>,
    pub tags: Option<Vec<String>>,
    pub risk_score: Option<u8>,
    pub kind: Option<AuditEventKind>,
}

/// Batch ingestion outcome.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/ingest-response.ts"
)]
pub struct IngestBatchResponse {
    /// Events handed to the pipeline.
    pub accepted: usize,
    /// Events rejected during normalization or under backpressure.
    pub rejected: usize,
}

/// Query criteria accepted by the query endpoint.
#[derive(Debug, Deserialize, Default)]
pub struct QueryRequest {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    pub operations: Option<Vec<String>>,
    pub ip_address: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub search_text: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Option<String>,
    pub order_direction: Option<String>,
}

impl QueryRequest {
    /// Converts the request into validated store criteria.
    pub fn try_into_query(self) -> AppResult<AuditQuery> {
        let operations = self
            .operations
            .unwrap_or_default()
            .iter()
            .map(|operation| AuditOperation::from_str(operation.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error| AppError::Query(error.to_string()))?;

        let order_by = match self.order_by.as_deref() {
            None | Some("timestamp") => OrderBy::Timestamp,
            Some("risk_score") => OrderBy::RiskScore,
            Some(other) => {
                return Err(AppError::Query(format!("unknown order_by '{other}'")));
            }
        };

        let order_direction = match self.order_direction.as_deref() {
            None | Some("desc") => OrderDirection::Desc,
            Some("asc") => OrderDirection::Asc,
            Some(other) => {
                return Err(AppError::Query(format!(
                    "unknown order_direction '{other}'"
                )));
            }
        };

        let defaults = AuditQuery::default();
        Ok(AuditQuery {
            start_date: self.start_date,
            end_date: self.end_date,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            user_id: self.user_id,
            operations,
            ip_address: self.ip_address,
            correlation_id: self.correlation_id.map(CorrelationId::from_uuid),
            tags: self.tags.unwrap_or_default(),
            search_text: self.search_text,
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(0),
            order_by,
            order_direction,
        })
    }
}

/// Redaction-safe projection of one stored audit record.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/audit-record.ts"
)]
pub struct AuditRecordResponse {
    pub id: String,
    pub timestamp: String,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: String,
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub ip_address: String,
    pub tags: Vec<String>,
    pub risk_score: u8,
    pub is_encrypted: bool,
    pub duration_ms: Option<u64>,
    pub is_error: bool,
    pub state: String,
    pub expires_at: String,
    pub legal_hold: bool,
}

impl From<StoredAuditRecord> for AuditRecordResponse {
    fn from(record: StoredAuditRecord) -> Self {
        Self {
            id: record.id.to_string(),
            timestamp: record.timestamp.to_rfc3339(),
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            operation: record.operation.as_str().to_owned(),
            user_id: record.user_id,
            correlation_id: record.correlation_id.to_string(),
            ip_address: record.ip_address,
            tags: record.tags,
            risk_score: record.risk_score,
            is_encrypted: record.is_encrypted,
            duration_ms: record.duration_ms,
            is_error: record.is_error,
            state: record.state.as_str().to_owned(),
            expires_at: record.expires_at.to_rfc3339(),
            legal_hold: record.legal_hold,
        }
    }
}

/// One page of query results.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/query-response.ts"
)]
pub struct QueryResponse {
    pub records: Vec<AuditRecordResponse>,
    pub total_count: usize,
}

impl From<QueryPage> for QueryResponse {
    fn from(page: QueryPage) -> Self {
        Self {
            records: page
                .records
                .into_iter()
                .map(AuditRecordResponse::from)
                .collect(),
            total_count: page.total_count,
        }
    }
}

/// One record together with its decoded redacted payload.
#[derive(Debug, Serialize)]
pub struct EventDetailResponse {
    pub record: AuditRecordResponse,
    pub payload: Value,
}

/// One aggregation bucket.
#[derive(Debug, Serialize, TS)]
#[ts(
    export,
    export_to = "../../../packages/api-types/src/generated/aggregate-bucket.ts"
)]
pub struct AggregateBucketResponse {
    pub period_start: String,
    pub count: usize,
    pub unique_users: usize,
    pub avg_duration_ms: Option<f64>,
    pub error_rate: Option<f64>,
}

impl From<AggregateBucket> for AggregateBucketResponse {
    fn from(bucket: AggregateBucket) -> Self {
        Self {
            period_start: bucket.period_start.to_rfc3339(),
            count: bucket.count,
            unique_users: bucket.unique_users,
            avg_duration_ms: bucket.avg_duration_ms,
            error_rate: bucket.error_rate,
        }
    }
}

/// Aggregation parameters.
#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    pub period: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub entity_type: Option<String>,
    pub operation: Option<String>,
}

/// Legal hold toggle body.
#[derive(Debug, Deserialize)]
pub struct LegalHoldRequest {
    pub held: bool,
}

/// Frontend interaction batch.
#[derive(Debug, Deserialize)]
pub struct FrontendBatchRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub events: Vec<FrontendEventRequest>,
}

/// One frontend interaction.
#[derive(Debug, Deserialize)]
pub struct FrontendEventRequest {
    pub kind: String,
    pub target: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub detail: Option<Map<String, Value>>,
}

/// Schema onboarding request for configuration generation.
#[derive(Debug, Deserialize)]
pub struct GenerateConfigRequest {
    pub entity_name: String,
    pub storage_name: String,
    pub minimum_level: Option<String>,
    pub fields: Vec<SchemaFieldRequest>,
}

/// One schema field description.
#[derive(Debug, Deserialize)]
pub struct SchemaFieldRequest {
    pub name: String,
    pub field_type: String,
    pub pii_annotation: Option<String>,
    pub is_identifier: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::QueryRequest;

    #[test]
    fn unknown_operation_label_is_rejected() {
        let request = QueryRequest {
            operations: Some(vec!["upsert".to_owned()]),
            ..QueryRequest::default()
        };
        assert!(request.try_into_query().is_err());
    }

    #[test]
    fn defaults_fill_limit_and_ordering() {
        let query = QueryRequest::default()
            .try_into_query()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(query.limit, 50);
        assert_eq!(query.offset, 0);
    }
}
