//! Outbox operational API routes
//!
//! Read-only views over the outbox plus the operator redrive of
//! dead-lettered records.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::AppState;
use crate::error::OutboxError;
use crate::models::{OutboxRecord, StatusCounts};

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub total: i64,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Error response wrapper for proper HTTP error handling
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "bad_request",
            message: message.into(),
        }
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        let (status, error) = match &err {
            OutboxError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            OutboxError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            OutboxError::DuplicateEvent(_) => (StatusCode::CONFLICT, "duplicate_event"),
            OutboxError::Envelope(_) => (StatusCode::BAD_REQUEST, "invalid_envelope"),
            OutboxError::CorruptRow { .. } | OutboxError::Database(_) | OutboxError::Store(_) => {
                tracing::error!(error = %err, "Outbox store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        Self {
            status,
            error,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.error.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Handler for GET /api/outbox/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, ApiError> {
    let counts = state.store.status_counts().await?;
    state.metrics.set_status_counts(&counts);

    Ok(Json(StatsResponse {
        total: counts.total(),
        counts,
    }))
}

/// Handler for GET /api/outbox/events?correlation_id=…
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<OutboxRecord>>, ApiError> {
    let correlation_id = params
        .correlation_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("correlation_id query parameter is required"))?;

    let records = state.store.find_by_correlation_id(&correlation_id).await?;
    Ok(Json(records))
}

/// Handler for GET /api/outbox/events/{id}
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OutboxRecord>, ApiError> {
    let record = state
        .store
        .find_by_id(id)
        .await?
        .ok_or(OutboxError::NotFound(id))?;

    Ok(Json(record))
}

/// Handler for POST /api/outbox/events/{id}/redrive
///
/// 409 unless the record is currently DEAD_LETTER.
pub async fn redrive_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OutboxRecord>, ApiError> {
    let record = state.store.redrive(id).await?;
    state.metrics.redriven_total.inc();

    tracing::info!(
        id = record.id,
        event_id = %record.event_id,
        last_error = ?record.last_error,
        "Dead-lettered event redriven"
    );

    Ok(Json(record))
}
