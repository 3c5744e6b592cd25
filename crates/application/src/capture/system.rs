use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use trailguard_core::AppResult;
use trailguard_domain::{AuditEvent, AuditEventInput, AuditEventKind, AuditOperation, Severity};

use crate::audit_ports::{Clock, ConfigSnapshotSource, ResourceSampler};
use crate::pipeline::EventProcessor;

/// Tuning for the system-event supervisor.
#[derive(Debug, Clone)]
pub struct SystemMonitorConfig {
    /// Interval between observation passes.
    pub interval: Duration,
    /// Memory ratio above which a warning event is emitted.
    pub memory_warning_ratio: f64,
    /// Memory ratio above which a critical event is emitted.
    pub memory_critical_ratio: f64,
}

impl Default for SystemMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            memory_warning_ratio: 0.85,
            memory_critical_ratio: 0.95,
        }
    }
}

/// Supervisor observing process lifecycle, configuration drift, and
/// resource thresholds.
///
/// Explicitly constructed and injectable, with a defined start/stop
/// lifecycle; never reached through global state.
pub struct SystemMonitor {
    processor: Arc<EventProcessor>,
    sampler: Arc<dyn ResourceSampler>,
    snapshot_source: Arc<dyn ConfigSnapshotSource>,
    clock: Arc<dyn Clock>,
    config: SystemMonitorConfig,
    last_snapshot: Mutex<Map<String, Value>>,
    stopping: AtomicBool,
    stop_notify: Notify,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl SystemMonitor {
    /// Creates the supervisor.
    #[must_use]
    pub fn new(
        processor: Arc<EventProcessor>,
        sampler: Arc<dyn ResourceSampler>,
        snapshot_source: Arc<dyn ConfigSnapshotSource>,
        clock: Arc<dyn Clock>,
        config: SystemMonitorConfig,
    ) -> Self {
        Self {
            processor,
            sampler,
            snapshot_source,
            clock,
            config,
            last_snapshot: Mutex::new(Map::new()),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
            observer: Mutex::new(None),
        }
    }

    /// Emits the process-start event, baselines the configuration
    /// snapshot, and spawns the observation loop.
    pub async fn start(self: &Arc<Self>) -> AppResult<()> {
        *self.last_snapshot.lock().await = self.snapshot_source.snapshot();
        self.emit_lifecycle("process_start", AuditOperation::Create, Severity::Info)
            .await;

        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so the baseline
            // snapshot is not diffed against itself.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        monitor.observe_once().await;
                    }
                    _ = monitor.stop_notify.notified() => {
                        break;
                    }
                }
            }
        });
        *self.observer.lock().await = Some(handle);

        info!("system monitor started");
        Ok(())
    }

    /// Emits the process-stop event and stops the observation loop.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_notify.notify_waiters();
        if let Some(handle) = self.observer.lock().await.take() {
            handle.abort();
        }
        self.emit_lifecycle("process_stop", AuditOperation::Delete, Severity::Info)
            .await;
        info!("system monitor stopped");
    }

    /// Runs one observation pass: configuration drift, then resources.
    pub async fn observe_once(&self) {
        self.check_config_drift().await;
        self.check_resources().await;
    }

    async fn check_config_drift(&self) {
        let current = self.snapshot_source.snapshot();
        let mut last = self.last_snapshot.lock().await;
        if *last == current {
            return;
        }

        let mut old_values = Map::new();
        let mut new_values = Map::new();
        for (key, previous) in last.iter() {
            match current.get(key.as_str()) {
                Some(value) if value != previous => {
                    old_values.insert(key.clone(), previous.clone());
                    new_values.insert(key.clone(), value.clone());
                }
                None => {
                    old_values.insert(key.clone(), previous.clone());
                }
                Some(_) => {}
            }
        }
        for (key, value) in &current {
            if !last.contains_key(key.as_str()) {
                new_values.insert(key.clone(), value.clone());
            }
        }
        *last = current;
        drop(last);

        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("system".to_owned()));
        metadata.insert("observation".to_owned(), Value::String("config_drift".to_owned()));

        let event = AuditEvent::new(AuditEventInput {
            timestamp: Some(self.clock.now()),
            entity_type: "system_config".to_owned(),
            entity_id: "runtime".to_owned(),
            operation: Some(AuditOperation::Update),
            session_id: "system".to_owned(),
            ip_address: "127.0.0.1".to_owned(),
            old_values: Some(old_values),
            new_values: Some(new_values),
            metadata,
            tags: vec!["system".to_owned()],
            kind: Some(AuditEventKind::Security {
                severity: Severity::Warning,
                threat_indicator: None,
            }),
            ..AuditEventInput::default()
        });

        self.emit(event, "config drift").await;
    }

    async fn check_resources(&self) {
        let ratio = match self.sampler.memory_usage_ratio() {
            Ok(ratio) => ratio,
            Err(error) => {
                warn!(error = %error, "resource sampling failed");
                return;
            }
        };

        let severity = if ratio >= self.config.memory_critical_ratio {
            Severity::Critical
        } else if ratio >= self.config.memory_warning_ratio {
            Severity::Warning
        } else {
            return;
        };

        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("system".to_owned()));
        metadata.insert("observation".to_owned(), Value::String("memory".to_owned()));
        if let Some(number) = serde_json::Number::from_f64(ratio) {
            metadata.insert("usage_ratio".to_owned(), Value::Number(number));
        }

        let event = AuditEvent::new(AuditEventInput {
            timestamp: Some(self.clock.now()),
            entity_type: "system_resource".to_owned(),
            entity_id: "memory".to_owned(),
            operation: Some(AuditOperation::Select),
            session_id: "system".to_owned(),
            ip_address: "127.0.0.1".to_owned(),
            metadata,
            tags: vec!["system".to_owned()],
            kind: Some(AuditEventKind::Security {
                severity,
                threat_indicator: None,
            }),
            ..AuditEventInput::default()
        });

        self.emit(event, "resource threshold").await;
    }

    async fn emit_lifecycle(&self, label: &str, operation: AuditOperation, severity: Severity) {
        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("system".to_owned()));
        metadata.insert("observation".to_owned(), Value::String(label.to_owned()));
        metadata.insert(
            "process_id".to_owned(),
            Value::Number(std::process::id().into()),
        );

        let event = AuditEvent::new(AuditEventInput {
            timestamp: Some(self.clock.now()),
            entity_type: "system_process".to_owned(),
            entity_id: std::process::id().to_string(),
            operation: Some(operation),
            session_id: "system".to_owned(),
            ip_address: "127.0.0.1".to_owned(),
            metadata,
            tags: vec!["system".to_owned()],
            kind: Some(AuditEventKind::Security {
                severity,
                threat_indicator: None,
            }),
            ..AuditEventInput::default()
        });

        self.emit(event, label).await;
    }

    async fn emit(&self, event: AppResult<AuditEvent>, label: &str) {
        match event {
            Ok(event) => {
                if !self.processor.enqueue(event).await {
                    warn!(observation = label, "system event dropped under backpressure");
                }
            }
            Err(error) => {
                warn!(observation = label, error = %error, "failed to build system event");
            }
        }
    }
}
