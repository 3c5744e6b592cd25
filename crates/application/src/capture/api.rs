use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::warn;

use trailguard_core::AppResult;
use trailguard_domain::{AuditEvent, AuditEventInput, AuditEventKind, AuditOperation};

use crate::audit_ports::Clock;
use crate::pipeline::{EventProcessor, REDACTION_MARKER};

use super::CaptureContext;

/// Configuration for the API-boundary adapter.
#[derive(Debug, Clone)]
pub struct ApiCaptureConfig {
    /// Header names (lowercase) always replaced by the redaction marker.
    pub redacted_headers: Vec<String>,
    /// Body field names (case-insensitive) redacted recursively.
    pub sensitive_body_paths: Vec<String>,
    /// Whether request/response bodies are captured at all.
    pub capture_bodies: bool,
}

impl Default for ApiCaptureConfig {
    fn default() -> Self {
        Self {
            redacted_headers: vec![
                "authorization".to_owned(),
                "cookie".to_owned(),
                "set-cookie".to_owned(),
                "x-api-key".to_owned(),
            ],
            sensitive_body_paths: vec![
                "password".to_owned(),
                "secret".to_owned(),
                "token".to_owned(),
            ],
            capture_bodies: false,
        }
    }
}

/// One handled request/response pair to capture.
#[derive(Debug, Clone)]
pub struct ApiRequestRecord {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Response status code.
    pub status_code: u16,
    /// Handling duration in milliseconds.
    pub duration_ms: u64,
    /// Request headers as received.
    pub request_headers: Vec<(String, String)>,
    /// Parsed request body, when available.
    pub request_body: Option<Value>,
    /// Parsed response body, when available.
    pub response_body: Option<Value>,
}

/// API-boundary capture adapter.
///
/// Invoked after the response is flushed; hands the normalized event to
/// the processor queue and never delays the response.
pub struct ApiRequestCapture {
    processor: Arc<EventProcessor>,
    clock: Arc<dyn Clock>,
    config: ApiCaptureConfig,
    dropped: AtomicU64,
}

impl ApiRequestCapture {
    /// Creates the adapter.
    #[must_use]
    pub fn new(
        processor: Arc<EventProcessor>,
        clock: Arc<dyn Clock>,
        config: ApiCaptureConfig,
    ) -> Self {
        Self {
            processor,
            clock,
            config,
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the count of events this adapter failed to hand off.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Captures one handled request.
    ///
    /// Normalization failures are logged and counted, never surfaced to the
    /// request path.
    pub async fn record(&self, record: ApiRequestRecord, context: CaptureContext) {
        match self.build_event(&record, context) {
            Ok(event) => {
                if !self.processor.enqueue(event).await {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %record.path, "api request event dropped under backpressure");
                }
            }
            Err(error) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    path = %record.path,
                    error = %error,
                    "failed to normalize api request event"
                );
            }
        }
    }

    /// Replaces configured header values with the redaction marker.
    #[must_use]
    pub fn sanitize_headers(&self, headers: &[(String, String)]) -> Map<String, Value> {
        let mut sanitized = Map::new();
        for (name, value) in headers {
            let stored = if self
                .config
                .redacted_headers
                .iter()
                .any(|redacted| redacted.eq_ignore_ascii_case(name.as_str()))
            {
                REDACTION_MARKER.to_owned()
            } else {
                value.clone()
            };
            sanitized.insert(name.clone(), Value::String(stored));
        }
        sanitized
    }

    /// Recursively redacts configured field names inside a body value.
    #[must_use]
    pub fn redact_body(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => {
                let mut redacted = Map::new();
                for (field_name, field_value) in object {
                    if self
                        .config
                        .sensitive_body_paths
                        .iter()
                        .any(|path| path.eq_ignore_ascii_case(field_name.as_str()))
                    {
                        redacted.insert(
                            field_name.clone(),
                            Value::String(REDACTION_MARKER.to_owned()),
                        );
                    } else {
                        redacted.insert(field_name.clone(), self.redact_body(field_value));
                    }
                }
                Value::Object(redacted)
            }
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.redact_body(item)).collect())
            }
            other => other.clone(),
        }
    }

    fn build_event(
        &self,
        record: &ApiRequestRecord,
        context: CaptureContext,
    ) -> AppResult<AuditEvent> {
        let operation = match record.method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => AuditOperation::Select,
            "POST" => AuditOperation::Create,
            "DELETE" => AuditOperation::Delete,
            _ => AuditOperation::Update,
        };

        let mut metadata = Map::new();
        metadata.insert("source".to_owned(), Value::String("api".to_owned()));
        metadata.insert("method".to_owned(), Value::String(record.method.clone()));
        metadata.insert("path".to_owned(), Value::String(record.path.clone()));
        metadata.insert(
            "status_code".to_owned(),
            Value::Number(record.status_code.into()),
        );
        metadata.insert(
            "request_headers".to_owned(),
            Value::Object(self.sanitize_headers(&record.request_headers)),
        );
        if record.status_code >= 400 {
            metadata.insert("outcome".to_owned(), Value::String("failure".to_owned()));
        }

        if self.config.capture_bodies {
            if let Some(body) = &record.request_body {
                metadata.insert("request_body".to_owned(), self.redact_body(body));
            }
            if let Some(body) = &record.response_body {
                metadata.insert("response_body".to_owned(), self.redact_body(body));
            }
        }

        let error = (record.status_code >= 500).then(|| format!("http {}", record.status_code));

        AuditEvent::new(AuditEventInput {
            timestamp: Some(self.clock.now()),
            entity_type: "api_request".to_owned(),
            entity_id: record.path.clone(),
            operation: Some(operation),
            user_id: context.user_id,
            session_id: context.session_id,
            ip_address: context.ip_address,
            correlation_id: context.correlation_id,
            metadata,
            tags: vec!["api".to_owned()],
            kind: Some(AuditEventKind::Performance {
                duration_ms: record.duration_ms,
                error,
            }),
            ..AuditEventInput::default()
        })
    }
}
