use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use trailguard_application::{
    AggregateBucket, AggregateQuery, AppendOutcome, AuditEventStore, AuditQuery, Clock, OrderBy,
    OrderDirection, PurgeOutcome, QueryPage, StoredAuditRecord, search_terms,
};
use trailguard_core::{AppError, AppResult, CorrelationId};
use trailguard_domain::{AuditOperation, RecordState};

/// PostgreSQL-backed audit log store.
///
/// Rows are keyed by a `partition_day` column; purge deletes whole days
/// and the primary-key conflict clause absorbs duplicate event ids.
#[derive(Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresAuditStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

#[derive(Debug, FromRow)]
struct AuditEventRow {
    id: Uuid,
    occurred_at: DateTime<Utc>,
    entity_type: String,
    entity_id: String,
    operation: String,
    user_id: Option<String>,
    correlation_id: Uuid,
    ip_address: String,
    tags: Vec<String>,
    search_tokens: Vec<String>,
    risk_score: i16,
    payload: Vec<u8>,
    is_encrypted: bool,
    encryption_key_id: Option<String>,
    duration_ms: Option<i64>,
    is_error: bool,
    state: String,
    expires_at: DateTime<Utc>,
    legal_hold: bool,
}

impl AuditEventRow {
    fn try_into_record(self) -> AppResult<StoredAuditRecord> {
        Ok(StoredAuditRecord {
            id: self.id,
            timestamp: self.occurred_at,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            operation: AuditOperation::from_str(self.operation.as_str()).map_err(|_| {
                AppError::Internal(format!("corrupt operation value '{}'", self.operation))
            })?,
            user_id: self.user_id,
            correlation_id: CorrelationId::from_uuid(self.correlation_id),
            ip_address: self.ip_address,
            tags: self.tags,
            search_tokens: self.search_tokens,
            risk_score: u8::try_from(self.risk_score).unwrap_or(100),
            payload: self.payload,
            is_encrypted: self.is_encrypted,
            encryption_key_id: self.encryption_key_id,
            duration_ms: self.duration_ms.and_then(|value| u64::try_from(value).ok()),
            is_error: self.is_error,
            state: RecordState::from_str(self.state.as_str())
                .map_err(|_| AppError::Internal(format!("corrupt state value '{}'", self.state)))?,
            expires_at: self.expires_at,
            legal_hold: self.legal_hold,
        })
    }
}

const SELECT_COLUMNS: &str = r"
    id,
    occurred_at,
    entity_type,
    entity_id,
    operation,
    user_id,
    correlation_id,
    ip_address,
    tags,
    search_tokens,
    risk_score,
    payload,
    is_encrypted,
    encryption_key_id,
    duration_ms,
    is_error,
    state,
    expires_at,
    legal_hold
";

const QUERY_FILTERS: &str = r"
    (legal_hold
        OR entity_type IN (SELECT entity_type FROM audit_entity_holds)
        OR expires_at > $1)
    AND ($2::TIMESTAMPTZ IS NULL OR occurred_at >= $2)
    AND ($3::TIMESTAMPTZ IS NULL OR occurred_at <= $3)
    AND ($4::TEXT IS NULL OR entity_type = $4)
    AND ($5::TEXT IS NULL OR entity_id = $5)
    AND ($6::TEXT IS NULL OR user_id = $6)
    AND (cardinality($7::TEXT[]) = 0 OR operation = ANY($7))
    AND ($8::TEXT IS NULL OR ip_address = $8)
    AND ($9::UUID IS NULL OR correlation_id = $9)
    AND ($10::TEXT[] <@ tags)
    AND ($11::TEXT[] <@ search_tokens)
";

fn order_clause(order_by: OrderBy, direction: OrderDirection) -> &'static str {
    match (order_by, direction) {
        (OrderBy::Timestamp, OrderDirection::Asc) => "ORDER BY occurred_at ASC, id ASC",
        (OrderBy::Timestamp, OrderDirection::Desc) => "ORDER BY occurred_at DESC, id DESC",
        (OrderBy::RiskScore, OrderDirection::Asc) => "ORDER BY risk_score ASC, occurred_at ASC",
        (OrderBy::RiskScore, OrderDirection::Desc) => "ORDER BY risk_score DESC, occurred_at DESC",
    }
}

#[async_trait]
impl AuditEventStore for PostgresAuditStore {
    async fn append(&self, record: StoredAuditRecord) -> AppResult<AppendOutcome> {
        let duration_ms = record
            .duration_ms
            .and_then(|value| i64::try_from(value).ok());

        let result = sqlx::query(
            r"
            INSERT INTO audit_events (
                id, occurred_at, partition_day, entity_type, entity_id, operation,
                user_id, correlation_id, ip_address, tags, search_tokens, risk_score,
                payload, is_encrypted, encryption_key_id, duration_ms, is_error,
                state, expires_at, legal_hold
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (id) DO NOTHING
            ",
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(record.partition_day())
        .bind(record.entity_type.as_str())
        .bind(record.entity_id.as_str())
        .bind(record.operation.as_str())
        .bind(record.user_id.as_deref())
        .bind(record.correlation_id.as_uuid())
        .bind(record.ip_address.as_str())
        .bind(record.tags.as_slice())
        .bind(record.search_tokens.as_slice())
        .bind(i16::from(record.risk_score))
        .bind(record.payload.as_slice())
        .bind(record.is_encrypted)
        .bind(record.encryption_key_id.as_deref())
        .bind(duration_ms)
        .bind(record.is_error)
        .bind(record.state.as_str())
        .bind(record.expires_at)
        .bind(record.legal_hold)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Persistence(format!("failed to append audit event: {error}")))?;

        if result.rows_affected() == 0 {
            return Ok(AppendOutcome::Duplicate);
        }
        Ok(AppendOutcome::Inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoredAuditRecord>> {
        let row = sqlx::query_as::<_, AuditEventRow>(
            format!("SELECT {SELECT_COLUMNS} FROM audit_events WHERE id = $1").as_str(),
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Persistence(format!("failed to load audit event: {error}")))?;

        row.map(AuditEventRow::try_into_record).transpose()
    }

    async fn query(&self, query: AuditQuery) -> AppResult<QueryPage> {
        let now = self.clock.now();
        let operations: Vec<String> = query
            .operations
            .iter()
            .map(|operation| operation.as_str().to_owned())
            .collect();
        let terms = query
            .search_text
            .as_deref()
            .map(search_terms)
            .unwrap_or_default();
        let correlation_id = query.correlation_id.map(|value| value.as_uuid());

        let capped_limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let capped_offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

        let select_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM audit_events WHERE {QUERY_FILTERS} {} LIMIT $12 OFFSET $13",
            order_clause(query.order_by, query.order_direction)
        );

        let rows = sqlx::query_as::<_, AuditEventRow>(select_sql.as_str())
            .bind(now)
            .bind(query.start_date)
            .bind(query.end_date)
            .bind(query.entity_type.as_deref())
            .bind(query.entity_id.as_deref())
            .bind(query.user_id.as_deref())
            .bind(operations.as_slice())
            .bind(query.ip_address.as_deref())
            .bind(correlation_id)
            .bind(query.tags.as_slice())
            .bind(terms.as_slice())
            .bind(capped_limit)
            .bind(capped_offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Persistence(format!("failed to query audit events: {error}"))
            })?;

        let count_sql = format!("SELECT COUNT(*) FROM audit_events WHERE {QUERY_FILTERS}");
        let total_count: i64 = sqlx::query_scalar(count_sql.as_str())
            .bind(now)
            .bind(query.start_date)
            .bind(query.end_date)
            .bind(query.entity_type.as_deref())
            .bind(query.entity_id.as_deref())
            .bind(query.user_id.as_deref())
            .bind(operations.as_slice())
            .bind(query.ip_address.as_deref())
            .bind(correlation_id)
            .bind(query.tags.as_slice())
            .bind(terms.as_slice())
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::Persistence(format!("failed to count audit events: {error}"))
            })?;

        let records = rows
            .into_iter()
            .map(AuditEventRow::try_into_record)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(QueryPage {
            records,
            total_count: usize::try_from(total_count).unwrap_or(0),
        })
    }

    async fn aggregate(&self, query: AggregateQuery) -> AppResult<Vec<AggregateBucket>> {
        let now = self.clock.now();

        #[derive(Debug, FromRow)]
        struct BucketRow {
            period_start: DateTime<Utc>,
            count: i64,
            unique_users: i64,
            avg_duration_ms: Option<f64>,
            error_rate: Option<f64>,
        }

        let rows = sqlx::query_as::<_, BucketRow>(
            r"
            SELECT
                date_trunc($1, occurred_at) AS period_start,
                COUNT(*) AS count,
                COUNT(DISTINCT user_id) AS unique_users,
                AVG(duration_ms::DOUBLE PRECISION) AS avg_duration_ms,
                AVG(CASE WHEN is_error THEN 1.0::DOUBLE PRECISION ELSE 0.0 END) AS error_rate
            FROM audit_events
            WHERE (legal_hold
                    OR entity_type IN (SELECT entity_type FROM audit_entity_holds)
                    OR expires_at > $2)
                AND ($3::TIMESTAMPTZ IS NULL OR occurred_at >= $3)
                AND ($4::TIMESTAMPTZ IS NULL OR occurred_at <= $4)
                AND ($5::TEXT IS NULL OR entity_type = $5)
                AND ($6::TEXT IS NULL OR operation = $6)
            GROUP BY 1
            ORDER BY 1
            ",
        )
        .bind(query.period.as_str())
        .bind(now)
        .bind(query.start_date)
        .bind(query.end_date)
        .bind(query.entity_type.as_deref())
        .bind(query.operation.map(|operation| operation.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Persistence(format!("failed to aggregate audit events: {error}"))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| AggregateBucket {
                period_start: row.period_start,
                count: usize::try_from(row.count).unwrap_or(0),
                unique_users: usize::try_from(row.unique_users).unwrap_or(0),
                avg_duration_ms: row.avg_duration_ms,
                error_rate: row.error_rate,
            })
            .collect())
    }

    async fn set_legal_hold(&self, id: Uuid, held: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE audit_events SET legal_hold = $2 WHERE id = $1")
            .bind(id)
            .bind(held)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Persistence(format!("failed to update legal hold: {error}"))
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "audit record '{id}' does not exist"
            )));
        }
        Ok(())
    }

    async fn set_entity_legal_hold(&self, entity_type: &str, held: bool) -> AppResult<()> {
        if held {
            sqlx::query(
                "INSERT INTO audit_entity_holds (entity_type) VALUES ($1) ON CONFLICT DO NOTHING",
            )
            .bind(entity_type)
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Persistence(format!("failed to set entity legal hold: {error}"))
            })?;
        } else {
            sqlx::query("DELETE FROM audit_entity_holds WHERE entity_type = $1")
                .bind(entity_type)
                .execute(&self.pool)
                .await
                .map_err(|error| {
                    AppError::Persistence(format!("failed to clear entity legal hold: {error}"))
                })?;
        }
        Ok(())
    }

    async fn archive_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let result = sqlx::query(
            "UPDATE audit_events SET state = 'archived' WHERE occurred_at < $1 AND state = 'persisted'",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Persistence(format!("failed to archive audit events: {error}"))
        })?;

        Ok(usize::try_from(result.rows_affected()).unwrap_or(0))
    }

    async fn purge_expired(&self) -> AppResult<PurgeOutcome> {
        let now = self.clock.now();

        // Whole partitions only: a day qualifies once every contained record
        // has expired and none carries a hold.
        let droppable: Vec<chrono::NaiveDate> = sqlx::query_scalar(
            r"
            SELECT partition_day
            FROM audit_events
            GROUP BY partition_day
            HAVING bool_and(expires_at <= $1)
                AND NOT bool_or(legal_hold
                    OR entity_type IN (SELECT entity_type FROM audit_entity_holds))
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Persistence(format!("failed to find purgeable partitions: {error}"))
        })?;

        let records_held: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM audit_events
            WHERE expires_at <= $1
                AND (legal_hold
                    OR entity_type IN (SELECT entity_type FROM audit_entity_holds))
            ",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::Persistence(format!("failed to count held records: {error}"))
        })?;

        let mut outcome = PurgeOutcome {
            partitions_dropped: 0,
            records_purged: 0,
            records_held: usize::try_from(records_held).unwrap_or(0),
        };

        if droppable.is_empty() {
            return Ok(outcome);
        }

        let result = sqlx::query("DELETE FROM audit_events WHERE partition_day = ANY($1)")
            .bind(droppable.as_slice())
            .execute(&self.pool)
            .await
            .map_err(|error| {
                AppError::Persistence(format!("failed to purge partitions: {error}"))
            })?;

        outcome.partitions_dropped = droppable.len();
        outcome.records_purged = usize::try_from(result.rows_affected()).unwrap_or(0);
        Ok(outcome)
    }
}
