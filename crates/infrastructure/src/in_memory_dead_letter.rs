use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use trailguard_application::{DeadLetterEntry, DeadLetterSink};
use trailguard_core::AppResult;

/// In-memory dead-letter sink for manual reconciliation.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains all recorded entries.
    pub async fn drain(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.entries.lock().await)
    }

    /// Returns the number of recorded entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns whether the sink is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn push(&self, entry: DeadLetterEntry) -> AppResult<()> {
        warn!(
            event_id = %entry.event_id,
            entity_type = %entry.entity_type,
            attempts = entry.attempts,
            "audit event dead-lettered"
        );
        self.entries.lock().await.push(entry);
        Ok(())
    }
}
