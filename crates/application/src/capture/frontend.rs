use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trailguard_core::AppResult;
use trailguard_domain::{AuditEvent, AuditEventInput, AuditOperation};

use crate::audit_ports::Clock;
use crate::pipeline::EventProcessor;

use super::CaptureContext;

/// Kinds of user-interface interactions captured from the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontendInteractionKind {
    /// Element click.
    Click,
    /// Form submission.
    FormSubmit,
    /// Route navigation.
    Navigation,
    /// Change of a flagged input field.
    InputChange,
    /// Uncaught client-side error.
    ClientError,
}

impl FrontendInteractionKind {
    /// Returns a stable storage value for the interaction kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::FormSubmit => "form_submit",
            Self::Navigation => "navigation",
            Self::InputChange => "input_change",
            Self::ClientError => "client_error",
        }
    }
}

/// One interaction reported by the frontend client.
#[derive(Debug, Clone)]
pub struct FrontendInteraction {
    /// Interaction kind.
    pub kind: FrontendInteractionKind,
    /// Interaction target (element id, route, field name).
    pub target: String,
    /// Client-side timestamp, when supplied.
    pub occurred_at: Option<DateTime<Utc>>,
    /// Additional non-sensitive detail.
    pub detail: Map<String, Value>,
}

/// Tuning for the frontend-interaction buffer.
#[derive(Debug, Clone)]
pub struct FrontendCaptureConfig {
    /// Maximum events flushed per batch.
    pub max_batch: usize,
    /// Interval between periodic flushes.
    pub flush_interval: Duration,
    /// Bounded local buffer capacity.
    pub queue_capacity: usize,
    /// Budget for the final best-effort flush at teardown.
    pub shutdown_flush_timeout: Duration,
}

impl Default for FrontendCaptureConfig {
    fn default() -> Self {
        Self {
            max_batch: 50,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 512,
            shutdown_flush_timeout: Duration::from_millis(500),
        }
    }
}

/// Buffering capture adapter for frontend interactions.
///
/// A cooperative task: `start` spawns the periodic flusher, `flush` is
/// callable explicitly, and `stop` performs one best-effort flush bounded
/// by a short timeout. A batch that fails hand-off is re-queued at the
/// head of the buffer for the next attempt.
pub struct FrontendInteractionCapture {
    processor: Arc<EventProcessor>,
    clock: Arc<dyn Clock>,
    config: FrontendCaptureConfig,
    buffer: Mutex<VecDeque<AuditEvent>>,
    dropped: AtomicU64,
    stopping: AtomicBool,
    stop_notify: Notify,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl FrontendInteractionCapture {
    /// Creates the adapter.
    #[must_use]
    pub fn new(
        processor: Arc<EventProcessor>,
        clock: Arc<dyn Clock>,
        config: FrontendCaptureConfig,
    ) -> Self {
        Self {
            processor,
            clock,
            config,
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            flusher: Mutex::new(None),
        }
    }

    /// Returns the count of interactions evicted from a saturated buffer.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of buffered events awaiting flush.
    pub async fn buffered_count(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Buffers one interaction; flushes inline once a full batch is queued.
    pub async fn record(
        &self,
        interaction: FrontendInteraction,
        context: CaptureContext,
    ) -> AppResult<()> {
        let event = self.build_event(&interaction, context)?;

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            if buffer.len() >= self.config.queue_capacity {
                // The UI trail favors recency: evict the oldest interaction.
                buffer.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("frontend interaction evicted under buffer saturation");
            }
            buffer.push_back(event);
            buffer.len() >= self.config.max_batch
        };

        if should_flush {
            self.flush().await;
        }

        Ok(())
    }

    /// Flushes buffered interactions in batches until empty or hand-off
    /// fails; a failed batch returns to the head of the buffer.
    pub async fn flush(&self) {
        loop {
            let batch: Vec<AuditEvent> = {
                let mut buffer = self.buffer.lock().await;
                let take = buffer.len().min(self.config.max_batch);
                buffer.drain(..take).collect()
            };

            if batch.is_empty() {
                return;
            }

            let mut rejected: VecDeque<AuditEvent> = VecDeque::new();
            let mut failed = false;
            for event in batch {
                if failed {
                    rejected.push_back(event);
                    continue;
                }
                if !self.processor.enqueue(event.clone()).await {
                    failed = true;
                    rejected.push_back(event);
                }
            }

            if failed {
                let mut buffer = self.buffer.lock().await;
                while let Some(event) = rejected.pop_back() {
                    buffer.push_front(event);
                }
                warn!("frontend batch hand-off failed, batch re-queued at head");
                return;
            }
        }
    }

    /// Spawns the periodic flusher task.
    pub async fn start(self: &Arc<Self>) {
        let adapter = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(adapter.config.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        adapter.flush().await;
                    }
                    _ = adapter.stop_notify.notified() => {
                        break;
                    }
                }
            }
        });
        *self.flusher.lock().await = Some(handle);
    }

    /// Stops the flusher and attempts one final best-effort flush.
    ///
    /// No retry is guaranteed beyond this point.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_waiters();

        if let Some(handle) = self.flusher.lock().await.take() {
            handle.abort();
        }

        let timeout = self.config.shutdown_flush_timeout;
        if tokio::time::timeout(timeout, self.flush()).await.is_err() {
            warn!("final frontend flush timed out at teardown");
        } else {
            info!("frontend interaction buffer flushed at teardown");
        }
    }

    fn build_event(
        &self,
        interaction: &FrontendInteraction,
        context: CaptureContext,
    ) -> AppResult<AuditEvent> {
        let operation = match interaction.kind {
            FrontendInteractionKind::Click | FrontendInteractionKind::Navigation => {
                AuditOperation::Select
            }
            FrontendInteractionKind::InputChange => AuditOperation::Update,
            FrontendInteractionKind::FormSubmit | FrontendInteractionKind::ClientError => {
                AuditOperation::Create
            }
        };

        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("frontend".to_owned()));
        metadata.insert(
            "interaction".to_owned(),
            Value::String(interaction.kind.as_str().to_owned()),
        );
        for (key, value) in &interaction.detail {
            metadata.insert(key.clone(), value.clone());
        }

        AuditEvent::new(AuditEventInput {
            timestamp: Some(interaction.occurred_at.unwrap_or_else(|| self.clock.now())),
            entity_type: "ui_interaction".to_owned(),
            entity_id: interaction.target.clone(),
            operation: Some(operation),
            user_id: context.user_id,
            session_id: context.session_id,
            ip_address: context.ip_address,
            correlation_id: context.correlation_id,
            metadata,
            tags: vec!["frontend".to_owned()],
            ..AuditEventInput::default()
        })
    }
}
