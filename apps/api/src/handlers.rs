use std::str::FromStr;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use trailguard_application::{
    AggregatePeriod, AggregateQuery, AuditConfigInput, AuditQuery, CaptureContext,
    FrontendInteraction, FrontendInteractionKind,
};
use trailguard_core::{AppError, CorrelationId};
use trailguard_domain::{
    AuditEvent, AuditEventInput, AuditLevel, AuditOperation, EntitySchema, PiiType, SchemaField,
    SchemaFieldType,
};

use crate::dto::{
    AggregateBucketResponse, AggregateParams, EventDetailResponse, FrontendBatchRequest,
    GenerateConfigRequest, IngestBatchRequest, IngestBatchResponse, IngestEventRequest,
    LegalHoldRequest, QueryRequest, QueryResponse,
};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn ingest_events_handler(
    State(state): State<AppState>,
    Json(request): Json<IngestBatchRequest>,
) -> ApiResult<Json<IngestBatchResponse>> {
    let mut accepted = 0;
    let mut rejected = 0;

    for event_request in request.events {
        match build_ingest_event(&state, event_request) {
            Ok(event) => {
                if state.processor.enqueue(event).await {
                    accepted += 1;
                } else {
                    rejected += 1;
                }
            }
            Err(error) => {
                rejected += 1;
                warn!(error = %error, "rejected malformed ingestion event");
            }
        }
    }

    Ok(Json(IngestBatchResponse { accepted, rejected }))
}

fn build_ingest_event(
    state: &AppState,
    request: IngestEventRequest,
) -> Result<AuditEvent, AppError> {
    let operation = AuditOperation::from_str(request.operation.as_str())
        .map_err(|error| AppError::Capture(error.to_string()))?;

    AuditEvent::new(AuditEventInput {
        id: request.id,
        timestamp: Some(request.timestamp.unwrap_or_else(|| state.clock.now())),
        entity_type: request.entity_type,
        entity_id: request.entity_id,
        operation: Some(operation),
        user_id: request.user_id,
        session_id: request.session_id,
        ip_address: request.ip_address,
        correlation_id: request.correlation_id.map(CorrelationId::from_uuid),
        old_values: request.old_values,
        new_values: request.new_values,
        metadata: request.metadata.unwrap_or_default(),
        tags: request.tags.unwrap_or_default(),
        risk_score: request.risk_score,
        kind: request.kind,
    })
}

pub async fn frontend_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<FrontendBatchRequest>,
) -> ApiResult<Json<IngestBatchResponse>> {
    let mut accepted = 0;
    let mut rejected = 0;

    for event_request in request.events {
        let kind = match parse_interaction_kind(event_request.kind.as_str()) {
            Ok(kind) => kind,
            Err(error) => {
                rejected += 1;
                warn!(error = %error, "rejected malformed frontend interaction");
                continue;
            }
        };

        let context = CaptureContext {
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            ip_address: "0.0.0.0".to_owned(),
            correlation_id: request.correlation_id.map(CorrelationId::from_uuid),
        };

        let interaction = FrontendInteraction {
            kind,
            target: event_request.target,
            occurred_at: event_request.occurred_at,
            detail: event_request.detail.unwrap_or_default(),
        };

        match state.frontend_capture.record(interaction, context).await {
            Ok(()) => accepted += 1,
            Err(error) => {
                rejected += 1;
                warn!(error = %error, "failed to buffer frontend interaction");
            }
        }
    }

    Ok(Json(IngestBatchResponse { accepted, rejected }))
}

fn parse_interaction_kind(value: &str) -> Result<FrontendInteractionKind, AppError> {
    match value {
        "click" => Ok(FrontendInteractionKind::Click),
        "form_submit" => Ok(FrontendInteractionKind::FormSubmit),
        "navigation" => Ok(FrontendInteractionKind::Navigation),
        "input_change" => Ok(FrontendInteractionKind::InputChange),
        "client_error" => Ok(FrontendInteractionKind::ClientError),
        other => Err(AppError::Capture(format!(
            "unknown interaction kind '{other}'"
        ))),
    }
}

pub async fn query_events_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResponse>> {
    let query = request.try_into_query()?;
    let page = state.query_service.query(query).await?;
    Ok(Json(QueryResponse::from(page)))
}

pub async fn get_event_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EventDetailResponse>> {
    let (record, payload) = state.query_service.decoded_event(id).await?;
    Ok(Json(EventDetailResponse {
        record: record.into(),
        payload,
    }))
}

pub async fn aggregate_handler(
    State(state): State<AppState>,
    Query(params): Query<AggregateParams>,
) -> ApiResult<Json<Vec<AggregateBucketResponse>>> {
    let period = AggregatePeriod::from_str(params.period.as_str())?;
    let operation = params
        .operation
        .as_deref()
        .map(AuditOperation::from_str)
        .transpose()
        .map_err(|error| AppError::Query(error.to_string()))?;

    let buckets = state
        .query_service
        .aggregate(AggregateQuery {
            period,
            start_date: params.start_date,
            end_date: params.end_date,
            entity_type: params.entity_type,
            operation,
        })
        .await?;

    Ok(Json(
        buckets
            .into_iter()
            .map(AggregateBucketResponse::from)
            .collect(),
    ))
}

pub async fn set_legal_hold_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<LegalHoldRequest>,
) -> ApiResult<Json<Value>> {
    state.query_service.set_legal_hold(id, request.held).await?;
    Ok(Json(json!({ "id": id, "held": request.held })))
}

pub async fn set_entity_legal_hold_handler(
    State(state): State<AppState>,
    Path(entity_type): Path<String>,
    Json(request): Json<LegalHoldRequest>,
) -> ApiResult<Json<Value>> {
    state
        .query_service
        .set_entity_legal_hold(entity_type.as_str(), request.held)
        .await?;
    Ok(Json(json!({ "entity_type": entity_type, "held": request.held })))
}

pub async fn generate_config_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateConfigRequest>,
) -> ApiResult<Json<Value>> {
    let minimum_level = match request.minimum_level.as_deref() {
        Some(value) => AuditLevel::from_str(value)?,
        None => state.minimum_level,
    };

    let mut fields = Vec::with_capacity(request.fields.len());
    for field_request in request.fields {
        let field_type = SchemaFieldType::from_str(field_request.field_type.as_str())?;
        let annotation = field_request
            .pii_annotation
            .as_deref()
            .map(PiiType::from_str)
            .transpose()?;
        fields.push(SchemaField::new(
            field_request.name,
            field_type,
            annotation,
            field_request.is_identifier.unwrap_or(false),
        )?);
    }

    let schema = EntitySchema::new(request.entity_name, request.storage_name, fields)?;
    let config = state.generator.generate(&AuditConfigInput {
        schema,
        minimum_level,
        policy: state.retention_policy.clone(),
    })?;

    let rendered = serde_json::to_value(&config)
        .map_err(|error| AppError::Internal(format!("failed to render configuration: {error}")))?;
    state.registry.register(config).await;

    Ok(Json(rendered))
}

pub async fn health_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    // Probe the store through the cheapest possible read.
    state
        .query_service
        .query(AuditQuery {
            limit: 1,
            ..AuditQuery::default()
        })
        .await?;

    Ok(Json(json!({ "status": "ok" })))
}
