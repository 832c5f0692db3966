//! Chapter translation endpoint

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, Instrument};

use crate::error::TranslateError;
use crate::server::state::AppState;
use crate::server::types::{api_error, ApiError, TranslateRequest};
use crate::translate::cache::CacheKey;

/// POST /api/translate
///
/// Resolves the chapter through the cache and streams the translation as
/// plain text. Unless the cache was bypassed, the next chapter is queued for
/// prefetch once this one has a handle.
pub async fn translate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TranslateRequest>,
) -> Result<Response, ApiError> {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "translate",
        %request_id,
        model = %request.model,
        mode = %request.mode,
    );

    async move {
        let url = validate_chapter_url(&request.prompt).map_err(api_error)?;
        let key = CacheKey::new(url, request.mode, request.model, request.scraper_provider);
        info!(
            url = %key.url,
            key = %key.fingerprint(),
            ignore_cache = request.ignore_cache,
            "translate request"
        );

        let handle = state
            .service
            .translate(&key, request.ignore_cache)
            .await
            .map_err(api_error)?;

        if !request.ignore_cache {
            state.prefetcher.schedule_next(&key);
        }

        info!(stream_id = handle.id(), finished = handle.is_finished(), "streaming translation");
        Ok::<_, ApiError>(
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                Body::from_stream(handle.reader()),
            )
                .into_response(),
        )
    }
    .instrument(span)
    .await
}

fn validate_chapter_url(raw: &str) -> Result<String, TranslateError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TranslateError::InvalidRequest("prompt must be a chapter url".into()));
    }
    let url = reqwest::Url::parse(raw)
        .map_err(|e| TranslateError::InvalidRequest(format!("invalid url {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        other => Err(TranslateError::InvalidRequest(format!(
            "unsupported url scheme: {other}"
        ))),
    }
}
