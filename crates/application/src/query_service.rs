use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use trailguard_core::{AppError, AppResult};

use crate::audit_ports::{
    AggregateBucket, AggregateQuery, AuditEventStore, AuditQuery, KeyManagementService, QueryPage,
    StoredAuditRecord,
};
use crate::pipeline::decode_payload;

const MAX_QUERY_LIMIT: usize = 1_000;
const MAX_QUERY_OFFSET: usize = 100_000;
const MAX_SEARCH_TEXT_LENGTH: usize = 200;

/// Read-path service validating criteria and delegating to the store.
///
/// Reads never block or are blocked by writers; invalid criteria are
/// rejected synchronously with a descriptive error.
#[derive(Clone)]
pub struct AuditQueryService {
    store: Arc<dyn AuditEventStore>,
    kms: Arc<dyn KeyManagementService>,
}

impl AuditQueryService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn AuditEventStore>, kms: Arc<dyn KeyManagementService>) -> Self {
        Self { store, kms }
    }

    /// Runs a validated, paginated query.
    pub async fn query(&self, query: AuditQuery) -> AppResult<QueryPage> {
        validate_query(&query)?;
        self.store.query(query).await
    }

    /// Returns one record by id.
    pub async fn find_event(&self, id: Uuid) -> AppResult<StoredAuditRecord> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("audit record '{id}' does not exist")))
    }

    /// Returns one record together with its decoded redacted payload.
    pub async fn decoded_event(&self, id: Uuid) -> AppResult<(StoredAuditRecord, Value)> {
        let record = self.find_event(id).await?;
        let payload = decode_payload(&record, self.kms.as_ref()).await?;
        Ok((record, payload))
    }

    /// Runs a validated aggregation.
    pub async fn aggregate(&self, query: AggregateQuery) -> AppResult<Vec<AggregateBucket>> {
        if let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) {
            if start_date > end_date {
                return Err(AppError::Query(
                    "start date must not be after end date".to_owned(),
                ));
            }
        }
        self.store.aggregate(query).await
    }

    /// Sets or clears the legal hold on one record.
    pub async fn set_legal_hold(&self, id: Uuid, held: bool) -> AppResult<()> {
        self.store.set_legal_hold(id, held).await
    }

    /// Sets or clears an entity-wide legal hold.
    pub async fn set_entity_legal_hold(&self, entity_type: &str, held: bool) -> AppResult<()> {
        if entity_type.trim().is_empty() {
            return Err(AppError::Query("entity type must not be empty".to_owned()));
        }
        self.store.set_entity_legal_hold(entity_type, held).await
    }
}

fn validate_query(query: &AuditQuery) -> AppResult<()> {
    if query.limit == 0 || query.limit > MAX_QUERY_LIMIT {
        return Err(AppError::Query(format!(
            "limit must be between 1 and {MAX_QUERY_LIMIT}"
        )));
    }

    if query.offset > MAX_QUERY_OFFSET {
        return Err(AppError::Query(format!(
            "offset must not exceed {MAX_QUERY_OFFSET}"
        )));
    }

    if let (Some(start_date), Some(end_date)) = (query.start_date, query.end_date) {
        if start_date > end_date {
            return Err(AppError::Query(
                "start date must not be after end date".to_owned(),
            ));
        }
    }

    if let Some(search_text) = &query.search_text {
        if search_text.trim().is_empty() {
            return Err(AppError::Query("search text must not be empty".to_owned()));
        }
        if search_text.len() > MAX_SEARCH_TEXT_LENGTH {
            return Err(AppError::Query(format!(
                "search text must not exceed {MAX_SEARCH_TEXT_LENGTH} characters"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::audit_ports::AuditQuery;

    use super::validate_query;

    #[test]
    fn zero_limit_is_rejected() {
        let query = AuditQuery {
            limit: 0,
            ..AuditQuery::default()
        };
        assert!(validate_query(&query).is_err());
    }

    #[test]
    fn oversized_limit_is_rejected() {
        let query = AuditQuery {
            limit: 1_001,
            ..AuditQuery::default()
        };
        assert!(validate_query(&query).is_err());
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let now = Utc::now();
        let query = AuditQuery {
            start_date: Some(now),
            end_date: Some(now - Duration::hours(1)),
            ..AuditQuery::default()
        };
        assert!(validate_query(&query).is_err());
    }

    #[test]
    fn blank_search_text_is_rejected() {
        let query = AuditQuery {
            search_text: Some("   ".to_owned()),
            ..AuditQuery::default()
        };
        assert!(validate_query(&query).is_err());
    }

    #[test]
    fn default_criteria_pass_validation() {
        assert!(validate_query(&AuditQuery::default()).is_ok());
    }
}
