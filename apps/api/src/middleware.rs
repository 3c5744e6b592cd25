use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use trailguard_application::{ApiRequestRecord, CaptureContext};
use trailguard_core::{AppError, CorrelationId};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn require_ingest_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let expected = format!("Bearer {}", state.ingest_shared_secret);
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == expected)
        .unwrap_or(false);

    if !authorized {
        return Err(AppError::Unauthorized("ingestion credentials required".to_owned()).into());
    }

    Ok(next.run(request).await)
}

/// API-boundary capture: observes every handled request and hands the
/// normalized event to the pipeline after the response is produced, off
/// the request path.
pub async fn capture_api_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_owned();

    if path == "/api/health" {
        return next.run(request).await;
    }

    let request_headers: Vec<(String, String)> = request
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<binary>").to_owned(),
            )
        })
        .collect();
    let context = capture_context(&request);

    let response = next.run(request).await;
    let status_code = response.status().as_u16();
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let capture = Arc::clone(&state.api_capture);
    tokio::spawn(async move {
        capture
            .record(
                ApiRequestRecord {
                    method,
                    path,
                    status_code,
                    duration_ms,
                    request_headers,
                    request_body: None,
                    response_body: None,
                },
                context,
            )
            .await;
    });

    response
}

fn capture_context(request: &Request) -> CaptureContext {
    let header_value = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
    };

    let correlation_id = header_value("x-correlation-id")
        .and_then(|value| CorrelationId::parse(value.as_str()).ok());

    CaptureContext {
        user_id: header_value("x-user-id"),
        session_id: header_value("x-session-id").unwrap_or_else(|| "anonymous".to_owned()),
        ip_address: client_ip(request),
        correlation_id,
    }
}

fn client_ip(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "0.0.0.0".to_owned())
}
