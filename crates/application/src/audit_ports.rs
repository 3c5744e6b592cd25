mod collaborators;
mod store;

pub use collaborators::{
    AlertNotifier, Clock, ConfigSnapshotSource, DeadLetterEntry, DeadLetterSink,
    KeyManagementService, OperationalAlert, ResourceSampler, SchemaSource,
};
pub use store::{
    AggregateBucket, AggregatePeriod, AggregateQuery, AppendOutcome, AuditEventStore, AuditQuery,
    OrderBy, OrderDirection, PurgeOutcome, QueryPage, StoredAuditRecord,
};
