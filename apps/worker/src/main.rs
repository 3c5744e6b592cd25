//! Trailguard retention and system-monitoring worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trailguard_application::{
    AlertNotifier, AuditConfigRegistry, AuditEventStore, Clock, DeadLetterSink, EventProcessor,
    ProcessorConfig, SystemMonitor, SystemMonitorConfig,
};
use trailguard_core::{AppError, AppResult};
use trailguard_infrastructure::{
    AesKeyManagementService, EnvSnapshotSource, InMemoryAuditStore, InMemoryDeadLetterSink,
    PostgresAuditStore, ProcResourceSampler, SystemClock, TracingAlertNotifier,
    WebhookAlertNotifier,
};

#[derive(Debug, Clone)]
struct WorkerConfig {
    store_kind: String,
    database_url: Option<String>,
    encryption_keys: String,
    purge_interval: Duration,
    archive_after_days: i64,
    monitor_interval: Duration,
    alert_webhook_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = build_store(&config, Arc::clone(&clock)).await?;
    let kms = Arc::new(AesKeyManagementService::from_spec(
        config.encryption_keys.as_str(),
    )?);
    let dead_letter = Arc::new(InMemoryDeadLetterSink::new());
    let alerts = build_alert_notifier(&config)?;

    // The worker's processor only carries system-monitor events; no entity
    // configurations are registered here.
    let registry = Arc::new(AuditConfigRegistry::new());
    let processor = Arc::new(EventProcessor::start(
        registry,
        Arc::clone(&store),
        kms,
        Arc::clone(&clock),
        Arc::clone(&dead_letter) as Arc<dyn DeadLetterSink>,
        alerts,
        ProcessorConfig::default(),
    ));

    let monitor = Arc::new(SystemMonitor::new(
        Arc::clone(&processor),
        Arc::new(ProcResourceSampler::new()),
        Arc::new(EnvSnapshotSource::new(vec![
            "AUDIT_STORE".to_owned(),
            "MINIMUM_AUDIT_LEVEL".to_owned(),
            "PURGE_INTERVAL_SECS".to_owned(),
            "ARCHIVE_AFTER_DAYS".to_owned(),
        ])),
        Arc::clone(&clock),
        SystemMonitorConfig {
            interval: config.monitor_interval,
            ..SystemMonitorConfig::default()
        },
    ));
    monitor.start().await?;

    info!(
        store = %config.store_kind,
        purge_interval_secs = config.purge_interval.as_secs(),
        archive_after_days = config.archive_after_days,
        "trailguard-worker started"
    );

    let mut purge_timer = tokio::time::interval(config.purge_interval);
    purge_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    purge_timer.tick().await;

    loop {
        tokio::select! {
            _ = purge_timer.tick() => {
                run_retention_pass(&config, store.as_ref(), clock.as_ref()).await;
                report_dead_letters(&dead_letter).await;
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    warn!(error = %error, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    monitor.stop().await;
    processor.drain().await;
    info!("trailguard-worker stopped");
    Ok(())
}

async fn run_retention_pass(
    config: &WorkerConfig,
    store: &dyn AuditEventStore,
    clock: &dyn Clock,
) {
    match store.purge_expired().await {
        Ok(outcome) => {
            info!(
                partitions_dropped = outcome.partitions_dropped,
                records_purged = outcome.records_purged,
                records_held = outcome.records_held,
                "retention purge completed"
            );
        }
        Err(error) => {
            warn!(error = %error, "retention purge failed");
        }
    }

    if config.archive_after_days > 0 {
        let cutoff = clock.now() - chrono::Duration::days(config.archive_after_days);
        match store.archive_before(cutoff).await {
            Ok(archived) if archived > 0 => {
                info!(archived, "records moved to archived state");
            }
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "archival pass failed");
            }
        }
    }
}

async fn report_dead_letters(dead_letter: &Arc<InMemoryDeadLetterSink>) {
    let entries = dead_letter.drain().await;
    if !entries.is_empty() {
        warn!(
            count = entries.len(),
            "dead-lettered audit events await manual reconciliation"
        );
    }
}

async fn build_store(
    config: &WorkerConfig,
    clock: Arc<dyn Clock>,
) -> AppResult<Arc<dyn AuditEventStore>> {
    match config.store_kind.as_str() {
        "memory" => Ok(Arc::new(InMemoryAuditStore::new(clock))),
        "postgres" => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                AppError::Validation(
                    "DATABASE_URL is required when AUDIT_STORE is 'postgres'".to_owned(),
                )
            })?;
            let pool = connect_pool(database_url).await?;
            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to run migrations: {error}"))
                })?;
            Ok(Arc::new(PostgresAuditStore::new(pool, clock)))
        }
        other => Err(AppError::Validation(format!(
            "unknown AUDIT_STORE value '{other}'"
        ))),
    }
}

fn build_alert_notifier(config: &WorkerConfig) -> AppResult<Arc<dyn AlertNotifier>> {
    match config.alert_webhook_url.as_deref() {
        Some(endpoint) => Ok(Arc::new(WebhookAlertNotifier::new(endpoint)?)),
        None => Ok(Arc::new(TracingAlertNotifier::new())),
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let store_kind = env::var("AUDIT_STORE").unwrap_or_else(|_| "postgres".to_owned());
        let database_url = env::var("DATABASE_URL").ok();
        let encryption_keys = required_env("AUDIT_ENCRYPTION_KEYS")?;
        let purge_interval_secs = parse_env_u64("PURGE_INTERVAL_SECS", 3_600)?;
        let archive_after_days = parse_env_i64("ARCHIVE_AFTER_DAYS", 365)?;
        let monitor_interval_secs = parse_env_u64("MONITOR_INTERVAL_SECS", 30)?;
        let alert_webhook_url = env::var("ALERT_WEBHOOK_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        if purge_interval_secs == 0 {
            return Err(AppError::Validation(
                "PURGE_INTERVAL_SECS must be greater than zero".to_owned(),
            ));
        }

        if monitor_interval_secs == 0 {
            return Err(AppError::Validation(
                "MONITOR_INTERVAL_SECS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            store_kind,
            database_url,
            encryption_keys,
            purge_interval: Duration::from_secs(purge_interval_secs),
            archive_after_days,
            monitor_interval: Duration::from_secs(monitor_interval_secs),
            alert_webhook_url,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> AppResult<i64> {
    match env::var(name) {
        Ok(value) => value.parse::<i64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
