//! Trailguard API composition root.

#![forbid(unsafe_code)]

mod dto;
mod error;
mod handlers;
mod middleware;
mod state;

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trailguard_application::{
    AlertNotifier, ApiCaptureConfig, ApiRequestCapture, AuditConfigGenerator, AuditConfigRegistry,
    AuditEventStore, AuditQueryService, Clock, DeadLetterSink, EventProcessor,
    FrontendCaptureConfig, FrontendInteractionCapture, KeyManagementService, ProcessorConfig,
};
use trailguard_core::AppError;
use trailguard_domain::{AuditLevel, RetentionPolicy};
use trailguard_infrastructure::{
    AesKeyManagementService, InMemoryAuditStore, InMemoryDeadLetterSink, PostgresAuditStore,
    SystemClock, TracingAlertNotifier, WebhookAlertNotifier,
};

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let store_kind = env::var("AUDIT_STORE").unwrap_or_else(|_| "postgres".to_owned());
    let encryption_keys = required_env("AUDIT_ENCRYPTION_KEYS")?;
    let ingest_shared_secret = required_env("INGEST_SHARED_SECRET")?;

    if ingest_shared_secret.len() < 32 {
        return Err(AppError::Validation(
            "INGEST_SHARED_SECRET must be at least 32 characters".to_owned(),
        ));
    }

    let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let api_port = env::var("API_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3001);
    let minimum_level = env::var("MINIMUM_AUDIT_LEVEL")
        .ok()
        .map(|value| AuditLevel::from_str(value.as_str()))
        .transpose()?
        .unwrap_or(AuditLevel::Basic);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let store = build_store(store_kind.as_str(), Arc::clone(&clock)).await?;
    let kms: Arc<dyn KeyManagementService> = Arc::new(AesKeyManagementService::from_spec(
        encryption_keys.as_str(),
    )?);

    let alerts = match env::var("ALERT_WEBHOOK_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
    {
        Some(endpoint) => {
            Arc::new(WebhookAlertNotifier::new(endpoint.as_str())?) as Arc<dyn AlertNotifier>
        }
        None => Arc::new(TracingAlertNotifier::new()),
    };

    let registry = Arc::new(AuditConfigRegistry::new());
    let processor = Arc::new(EventProcessor::start(
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&kms),
        Arc::clone(&clock),
        Arc::new(InMemoryDeadLetterSink::new()) as Arc<dyn DeadLetterSink>,
        alerts,
        ProcessorConfig::default(),
    ));

    let api_capture = Arc::new(ApiRequestCapture::new(
        Arc::clone(&processor),
        Arc::clone(&clock),
        ApiCaptureConfig::default(),
    ));
    let frontend_capture = Arc::new(FrontendInteractionCapture::new(
        Arc::clone(&processor),
        Arc::clone(&clock),
        FrontendCaptureConfig::default(),
    ));
    frontend_capture.start().await;

    let state = AppState {
        query_service: AuditQueryService::new(Arc::clone(&store), Arc::clone(&kms)),
        processor: Arc::clone(&processor),
        registry,
        generator: AuditConfigGenerator::new(),
        retention_policy: RetentionPolicy::new(),
        minimum_level,
        api_capture,
        frontend_capture: Arc::clone(&frontend_capture),
        clock,
        ingest_shared_secret,
    };

    let ingest_routes = Router::new()
        .route("/api/audit/events", post(handlers::ingest_events_handler))
        .route(
            "/api/audit/frontend-batch",
            post(handlers::frontend_batch_handler),
        )
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_ingest_secret,
        ));

    let read_routes = Router::new()
        .route(
            "/api/audit/events/query",
            post(handlers::query_events_handler),
        )
        .route("/api/audit/events/{id}", get(handlers::get_event_handler))
        .route(
            "/api/audit/events/{id}/legal-hold",
            post(handlers::set_legal_hold_handler),
        )
        .route(
            "/api/audit/entities/{entity_type}/legal-hold",
            post(handlers::set_entity_legal_hold_handler),
        )
        .route("/api/audit/aggregate", get(handlers::aggregate_handler))
        .route(
            "/api/audit/config/generate",
            post(handlers::generate_config_handler),
        );

    let app = Router::new()
        .merge(ingest_routes)
        .merge(read_routes)
        .route("/api/health", get(handlers::health_handler))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::capture_api_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .with_state(state);

    let ip_address = IpAddr::from_str(api_host.as_str())
        .map_err(|error| AppError::Validation(format!("invalid API_HOST '{api_host}': {error}")))?;
    let address = SocketAddr::new(ip_address, api_port);

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind {address}: {error}")))?;

    info!(%address, store = %store_kind, "trailguard-api started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| AppError::Internal(format!("server error: {error}")))?;

    // Teardown: one best-effort frontend flush, then drain the pipeline.
    frontend_capture.stop().await;
    processor.drain().await;
    info!("trailguard-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        info!("shutdown signal listener failed; exiting on task completion");
    }
}

async fn build_store(
    store_kind: &str,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn AuditEventStore>, AppError> {
    match store_kind {
        "memory" => Ok(Arc::new(InMemoryAuditStore::new(clock))),
        "postgres" => {
            let database_url = required_env("DATABASE_URL")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url.as_str())
                .await
                .map_err(|error| {
                    AppError::Internal(format!("failed to connect to database: {error}"))
                })?;

            sqlx::migrate!("../../crates/infrastructure/migrations")
                .run(&pool)
                .await
                .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

            Ok(Arc::new(PostgresAuditStore::new(pool, clock)))
        }
        other => Err(AppError::Validation(format!(
            "unknown AUDIT_STORE value '{other}'"
        ))),
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

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}
