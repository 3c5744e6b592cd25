use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use trailguard_core::{AppError, AppResult, CorrelationId};
use trailguard_domain::{AuditOperation, RecordState};

/// Fully processed audit record as persisted by the store.
///
/// The payload is the compressed (and possibly encrypted) redacted event;
/// the surrounding columns are the redaction-safe projection used for
/// filtering and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuditRecord {
    /// Stable event identifier.
    pub id: Uuid,
    /// Event timestamp; also selects the time partition.
    pub timestamp: DateTime<Utc>,
    /// Entity type label.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Observed operation.
    pub operation: AuditOperation,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// Correlation identifier.
    pub correlation_id: CorrelationId,
    /// Caller IP address.
    pub ip_address: String,
    /// Search tags.
    pub tags: Vec<String>,
    /// Precomputed lowercase search tokens; sensitive facets appear only hashed.
    pub search_tokens: Vec<String>,
    /// Deterministic 0-100 risk score.
    pub risk_score: u8,
    /// Compressed, redacted event payload.
    pub payload: Vec<u8>,
    /// Whether the payload is encrypted.
    pub is_encrypted: bool,
    /// Key id the payload was encrypted under, when encrypted.
    pub encryption_key_id: Option<String>,
    /// Observed duration for performance events.
    pub duration_ms: Option<u64>,
    /// Whether the observed operation failed.
    pub is_error: bool,
    /// Lifecycle state; persisted records enter at `Persisted`.
    pub state: RecordState,
    /// Instant the record becomes eligible for purge.
    pub expires_at: DateTime<Utc>,
    /// Suspends TTL-based purge when set.
    pub legal_hold: bool,
}

impl StoredAuditRecord {
    /// Returns the UTC day partition this record belongs to.
    #[must_use]
    pub fn partition_day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Returns whether the record is expired at `now`, ignoring legal holds.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.legal_hold && self.expires_at <= now
    }
}

/// Outcome of one append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was stored.
    Inserted,
    /// A record with the same id already exists; the write was a no-op.
    Duplicate,
}

/// Sort key for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Order by event timestamp.
    Timestamp,
    /// Order by risk score.
    RiskScore,
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Criteria object accepted by the query engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Inclusive lower timestamp bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end_date: Option<DateTime<Utc>>,
    /// Entity type filter.
    pub entity_type: Option<String>,
    /// Entity identifier filter.
    pub entity_id: Option<String>,
    /// Acting user filter.
    pub user_id: Option<String>,
    /// Operation filter; empty means all operations.
    pub operations: Vec<AuditOperation>,
    /// Caller IP filter.
    pub ip_address: Option<String>,
    /// Correlation identifier filter.
    pub correlation_id: Option<CorrelationId>,
    /// Tag filter; every listed tag must be present.
    pub tags: Vec<String>,
    /// Free-text search against the precomputed token set.
    pub search_text: Option<String>,
    /// Maximum rows returned.
    pub limit: usize,
    /// Rows skipped for offset pagination.
    pub offset: usize,
    /// Sort key.
    pub order_by: OrderBy,
    /// Sort direction.
    pub order_direction: OrderDirection,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            entity_type: None,
            entity_id: None,
            user_id: None,
            operations: Vec::new(),
            ip_address: None,
            correlation_id: None,
            tags: Vec::new(),
            search_text: None,
            limit: 50,
            offset: 0,
            order_by: OrderBy::Timestamp,
            order_direction: OrderDirection::Desc,
        }
    }
}

/// One page of query results plus a total-count hint.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Records on this page.
    pub records: Vec<StoredAuditRecord>,
    /// Total matching records across all pages.
    pub total_count: usize,
}

/// Bucket granularity for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatePeriod {
    /// One bucket per hour.
    Hour,
    /// One bucket per day.
    Day,
    /// One bucket per ISO week.
    Week,
    /// One bucket per calendar month.
    Month,
}

impl AggregatePeriod {
    /// Returns a stable storage value for the period.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
        }
    }
}

impl std::str::FromStr for AggregatePeriod {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            _ => Err(AppError::Query(format!(
                "unknown aggregation period '{value}'"
            ))),
        }
    }
}

/// Aggregation request over the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateQuery {
    /// Bucket granularity.
    pub period: AggregatePeriod,
    /// Inclusive lower timestamp bound.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub end_date: Option<DateTime<Utc>>,
    /// Entity type filter.
    pub entity_type: Option<String>,
    /// Operation filter.
    pub operation: Option<AuditOperation>,
}

/// One aggregation bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    /// Start of the bucket period.
    pub period_start: DateTime<Utc>,
    /// Number of events in the bucket.
    pub count: usize,
    /// Number of distinct acting users.
    pub unique_users: usize,
    /// Mean duration across performance events, when any carried one.
    pub avg_duration_ms: Option<f64>,
    /// Share of failed operations, when any event recorded an outcome.
    pub error_rate: Option<f64>,
}

/// Outcome of a retention purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Whole partitions dropped.
    pub partitions_dropped: usize,
    /// Individual records removed.
    pub records_purged: usize,
    /// Expired records retained by a legal hold.
    pub records_held: usize,
}

/// Port for the append-only, time-partitioned audit log store.
///
/// Records are immutable once persisted; the contract offers insert,
/// legal-hold toggling, archival marking, and TTL-based purge only.
#[async_trait]
pub trait AuditEventStore: Send + Sync {
    /// Appends one record; same-id duplicates are absorbed idempotently.
    async fn append(&self, record: StoredAuditRecord) -> AppResult<AppendOutcome>;

    /// Appends a batch, returning per-record outcomes in input order.
    async fn append_batch(
        &self,
        records: Vec<StoredAuditRecord>,
    ) -> AppResult<Vec<AppendOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(self.append(record).await?);
        }
        Ok(outcomes)
    }

    /// Returns one record by id, regardless of expiry.
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoredAuditRecord>>;

    /// Runs a filtered, paginated query; expired unheld records are excluded.
    async fn query(&self, query: AuditQuery) -> AppResult<QueryPage>;

    /// Aggregates events into period buckets.
    async fn aggregate(&self, query: AggregateQuery) -> AppResult<Vec<AggregateBucket>>;

    /// Sets or clears the legal hold on one record.
    async fn set_legal_hold(&self, id: Uuid, held: bool) -> AppResult<()>;

    /// Sets or clears an entity-wide legal hold.
    async fn set_entity_legal_hold(&self, entity_type: &str, held: bool) -> AppResult<()>;

    /// Marks records older than the cutoff as archived.
    async fn archive_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize>;

    /// Drops partitions whose records have all expired and carry no hold.
    async fn purge_expired(&self) -> AppResult<PurgeOutcome>;
}
