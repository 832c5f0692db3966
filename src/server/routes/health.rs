//! Health and metrics endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::server::state::AppState;
use crate::server::types::{HealthResponse, MetricsResponse};

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let cache = state.service.cache().stats();
    Json(MetricsResponse {
        uptime_secs: state.started.elapsed().as_secs(),
        histograms: state.metrics.summary(),
        dedup_ratio: cache.dedup_ratio(),
        cache,
    })
}
