use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use trailguard_application::{
    AggregateBucket, AggregatePeriod, AggregateQuery, AppendOutcome, AuditEventStore, AuditQuery,
    Clock, OrderBy, OrderDirection, PurgeOutcome, QueryPage, StoredAuditRecord, search_terms,
};
use trailguard_core::{AppError, AppResult};
use trailguard_domain::RecordState;

/// In-memory audit log store, time-partitioned by UTC day.
///
/// Each partition carries its own lock, so writers targeting different
/// days never contend and same-day writers serialize only at the tail
/// append. Queries snapshot the partition map and read without blocking
/// writers.
pub struct InMemoryAuditStore {
    partitions: RwLock<BTreeMap<NaiveDate, Arc<RwLock<Partition>>>>,
    entity_holds: RwLock<HashSet<String>>,
    clock: Arc<dyn Clock>,
}

#[derive(Default)]
struct Partition {
    records: Vec<StoredAuditRecord>,
}

impl InMemoryAuditStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
            entity_holds: RwLock::new(HashSet::new()),
            clock,
        }
    }

    /// Returns the number of live partitions.
    pub async fn partition_count(&self) -> usize {
        self.partitions.read().await.len()
    }

    async fn partition_for(&self, day: NaiveDate) -> Arc<RwLock<Partition>> {
        if let Some(partition) = self.partitions.read().await.get(&day) {
            return Arc::clone(partition);
        }

        let mut partitions = self.partitions.write().await;
        Arc::clone(partitions.entry(day).or_default())
    }

    async fn snapshot(&self) -> Vec<(NaiveDate, Arc<RwLock<Partition>>)> {
        self.partitions
            .read()
            .await
            .iter()
            .map(|(day, partition)| (*day, Arc::clone(partition)))
            .collect()
    }

    fn is_visible(
        record: &StoredAuditRecord,
        now: DateTime<Utc>,
        entity_holds: &HashSet<String>,
    ) -> bool {
        if record.legal_hold || entity_holds.contains(record.entity_type.as_str()) {
            return true;
        }
        record.expires_at > now
    }
}

fn matches(query: &AuditQuery, record: &StoredAuditRecord) -> bool {
    if let Some(start_date) = query.start_date {
        if record.timestamp < start_date {
            return false;
        }
    }
    if let Some(end_date) = query.end_date {
        if record.timestamp > end_date {
            return false;
        }
    }
    if let Some(entity_type) = &query.entity_type {
        if record.entity_type != *entity_type {
            return false;
        }
    }
    if let Some(entity_id) = &query.entity_id {
        if record.entity_id != *entity_id {
            return false;
        }
    }
    if let Some(user_id) = &query.user_id {
        if record.user_id.as_deref() != Some(user_id.as_str()) {
            return false;
        }
    }
    if !query.operations.is_empty() && !query.operations.contains(&record.operation) {
        return false;
    }
    if let Some(ip_address) = &query.ip_address {
        if record.ip_address != *ip_address {
            return false;
        }
    }
    if let Some(correlation_id) = query.correlation_id {
        if record.correlation_id != correlation_id {
            return false;
        }
    }
    if !query
        .tags
        .iter()
        .all(|tag| record.tags.iter().any(|stored| stored == tag))
    {
        return false;
    }
    if let Some(search_text) = &query.search_text {
        let terms = search_terms(search_text.as_str());
        if !terms
            .iter()
            .all(|term| record.search_tokens.iter().any(|token| token == term))
        {
            return false;
        }
    }
    true
}

fn sort_records(records: &mut [StoredAuditRecord], order_by: OrderBy, direction: OrderDirection) {
    records.sort_by(|left, right| {
        let ordering = match order_by {
            OrderBy::Timestamp => left
                .timestamp
                .cmp(&right.timestamp)
                .then_with(|| left.id.cmp(&right.id)),
            OrderBy::RiskScore => left
                .risk_score
                .cmp(&right.risk_score)
                .then_with(|| left.timestamp.cmp(&right.timestamp)),
        };
        match direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        }
    });
}

fn period_start(timestamp: DateTime<Utc>, period: AggregatePeriod) -> DateTime<Utc> {
    let date = timestamp.date_naive();
    let naive = match period {
        AggregatePeriod::Hour => date
            .and_hms_opt(timestamp.hour(), 0, 0)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).unwrap_or_default()),
        AggregatePeriod::Day => date.and_hms_opt(0, 0, 0).unwrap_or_default(),
        AggregatePeriod::Week => {
            let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
            monday.and_hms_opt(0, 0, 0).unwrap_or_default()
        }
        AggregatePeriod::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
            .unwrap_or(date)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default(),
    };
    naive.and_utc()
}

#[async_trait]
impl AuditEventStore for InMemoryAuditStore {
    async fn append(&self, record: StoredAuditRecord) -> AppResult<AppendOutcome> {
        let partition = self.partition_for(record.partition_day()).await;
        let mut guard = partition.write().await;

        if guard.records.iter().any(|stored| stored.id == record.id) {
            return Ok(AppendOutcome::Duplicate);
        }

        guard.records.push(record);
        Ok(AppendOutcome::Inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<StoredAuditRecord>> {
        for (_, partition) in self.snapshot().await {
            let guard = partition.read().await;
            if let Some(record) = guard.records.iter().find(|record| record.id == id) {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    async fn query(&self, query: AuditQuery) -> AppResult<QueryPage> {
        let now = self.clock.now();
        let entity_holds = self.entity_holds.read().await.clone();

        let mut matched = Vec::new();
        for (day, partition) in self.snapshot().await {
            // Prune whole partitions outside the requested date range.
            if let Some(start_date) = query.start_date {
                if day < start_date.date_naive() {
                    continue;
                }
            }
            if let Some(end_date) = query.end_date {
                if day > end_date.date_naive() {
                    continue;
                }
            }

            let guard = partition.read().await;
            for record in &guard.records {
                if Self::is_visible(record, now, &entity_holds) && matches(&query, record) {
                    matched.push(record.clone());
                }
            }
        }

        sort_records(&mut matched, query.order_by, query.order_direction);
        let total_count = matched.len();
        let records = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Ok(QueryPage {
            records,
            total_count,
        })
    }

    async fn aggregate(&self, query: AggregateQuery) -> AppResult<Vec<AggregateBucket>> {
        let now = self.clock.now();
        let entity_holds = self.entity_holds.read().await.clone();

        struct Accumulator {
            count: usize,
            users: HashSet<String>,
            duration_total: f64,
            duration_count: usize,
            errors: usize,
        }

        let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();

        for (_, partition) in self.snapshot().await {
            let guard = partition.read().await;
            for record in &guard.records {
                if !Self::is_visible(record, now, &entity_holds) {
                    continue;
                }
                if let Some(start_date) = query.start_date {
                    if record.timestamp < start_date {
                        continue;
                    }
                }
                if let Some(end_date) = query.end_date {
                    if record.timestamp > end_date {
                        continue;
                    }
                }
                if let Some(entity_type) = &query.entity_type {
                    if record.entity_type != *entity_type {
                        continue;
                    }
                }
                if let Some(operation) = query.operation {
                    if record.operation != operation {
                        continue;
                    }
                }

                let bucket = buckets
                    .entry(period_start(record.timestamp, query.period))
                    .or_insert_with(|| Accumulator {
                        count: 0,
                        users: HashSet::new(),
                        duration_total: 0.0,
                        duration_count: 0,
                        errors: 0,
                    });

                bucket.count += 1;
                if let Some(user_id) = &record.user_id {
                    bucket.users.insert(user_id.clone());
                }
                if let Some(duration_ms) = record.duration_ms {
                    bucket.duration_total += duration_ms as f64;
                    bucket.duration_count += 1;
                }
                if record.is_error {
                    bucket.errors += 1;
                }
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(period_start, accumulator)| AggregateBucket {
                period_start,
                count: accumulator.count,
                unique_users: accumulator.users.len(),
                avg_duration_ms: (accumulator.duration_count > 0)
                    .then(|| accumulator.duration_total / accumulator.duration_count as f64),
                error_rate: (accumulator.count > 0)
                    .then(|| accumulator.errors as f64 / accumulator.count as f64),
            })
            .collect())
    }

    async fn set_legal_hold(&self, id: Uuid, held: bool) -> AppResult<()> {
        for (_, partition) in self.snapshot().await {
            let mut guard = partition.write().await;
            if let Some(record) = guard.records.iter_mut().find(|record| record.id == id) {
                record.legal_hold = held;
                return Ok(());
            }
        }
        Err(AppError::NotFound(format!(
            "audit record '{id}' does not exist"
        )))
    }

    async fn set_entity_legal_hold(&self, entity_type: &str, held: bool) -> AppResult<()> {
        let mut entity_holds = self.entity_holds.write().await;
        if held {
            entity_holds.insert(entity_type.to_owned());
        } else {
            entity_holds.remove(entity_type);
        }
        Ok(())
    }

    async fn archive_before(&self, cutoff: DateTime<Utc>) -> AppResult<usize> {
        let mut archived = 0;
        for (_, partition) in self.snapshot().await {
            let mut guard = partition.write().await;
            for record in guard.records.iter_mut() {
                if record.timestamp < cutoff
                    && record.state.can_transition_to(RecordState::Archived)
                {
                    record.state = RecordState::Archived;
                    archived += 1;
                }
            }
        }
        Ok(archived)
    }

    async fn purge_expired(&self) -> AppResult<PurgeOutcome> {
        let now = self.clock.now();
        let entity_holds = self.entity_holds.read().await.clone();
        let mut outcome = PurgeOutcome::default();

        let mut partitions = self.partitions.write().await;
        let mut droppable = Vec::new();

        for (day, partition) in partitions.iter() {
            let guard = partition.read().await;
            let all_expired = guard
                .records
                .iter()
                .all(|record| record.expires_at <= now);
            let any_held = guard.records.iter().any(|record| {
                record.legal_hold || entity_holds.contains(record.entity_type.as_str())
            });

            if all_expired && !guard.records.is_empty() {
                if any_held {
                    outcome.records_held += guard
                        .records
                        .iter()
                        .filter(|record| {
                            record.legal_hold
                                || entity_holds.contains(record.entity_type.as_str())
                        })
                        .count();
                } else {
                    droppable.push((*day, guard.records.len()));
                }
            }
        }

        // Purge drops whole partitions only; partially expired days wait.
        for (day, record_count) in droppable {
            partitions.remove(&day);
            outcome.partitions_dropped += 1;
            outcome.records_purged += record_count;
        }

        Ok(outcome)
    }
}
