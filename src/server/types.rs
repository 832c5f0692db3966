//! Server types and DTOs

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::TranslateError;
use crate::metrics::MetricSummary;
use crate::translate::cache::CacheStats;
use crate::translate::{ModelId, Mode, ScraperProvider};

/// Body of `POST /api/translate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateRequest {
    /// Chapter URL.
    pub prompt: String,
    #[serde(default)]
    pub ignore_cache: bool,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub model: ModelId,
    #[serde(default)]
    pub scraper_provider: ScraperProvider,
}

/// Query of the chapter navigation endpoints.
#[derive(Debug, Deserialize)]
pub struct ChapterQuery {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChapterResponse {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub uptime_secs: u64,
    pub histograms: BTreeMap<&'static str, MetricSummary>,
    pub cache: CacheStats,
    pub dedup_ratio: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP status for a pipeline error.
pub fn status_for(err: &TranslateError) -> StatusCode {
    match err {
        TranslateError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        TranslateError::InvalidChapterUrl(_)
        | TranslateError::InvalidChapterNumber(_)
        | TranslateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TranslateError::Provider { .. }
        | TranslateError::ProviderLogic(_)
        | TranslateError::ProducerFailed { .. }
        | TranslateError::Http(_)
        | TranslateError::Stream(_) => StatusCode::BAD_GATEWAY,
        TranslateError::MissingCredential { .. }
        | TranslateError::Io(_)
        | TranslateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn api_error(err: TranslateError) -> ApiError {
    (
        status_for(&err),
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}
