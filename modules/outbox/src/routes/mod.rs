pub mod metrics;
pub mod outbox;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::health::health;
use crate::metrics::OutboxMetrics;
use crate::repos::OutboxStore;

/// Shared state for the operational endpoints
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OutboxStore>,
    pub metrics: OutboxMetrics,
}

/// Health, statistics, lookup, redrive and metrics endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/outbox/stats", get(outbox::get_stats))
        .route("/api/outbox/events", get(outbox::list_events))
        .route("/api/outbox/events/{id}", get(outbox::get_event))
        .route("/api/outbox/events/{id}/redrive", post(outbox::redrive_event))
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
}
