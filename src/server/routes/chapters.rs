//! Chapter navigation endpoints

use axum::extract::Query;
use axum::Json;

use crate::navigator;
use crate::server::types::{api_error, ApiError, ChapterQuery, ChapterResponse};

/// GET /api/chapters/next?url=
pub async fn next_chapter(
    Query(query): Query<ChapterQuery>,
) -> Result<Json<ChapterResponse>, ApiError> {
    let url = navigator::next_url(&query.url).map_err(api_error)?;
    Ok(Json(ChapterResponse { url }))
}

/// GET /api/chapters/previous?url=
pub async fn previous_chapter(
    Query(query): Query<ChapterQuery>,
) -> Result<Json<ChapterResponse>, ApiError> {
    let url = navigator::previous_url(&query.url).map_err(api_error)?;
    Ok(Json(ChapterResponse { url }))
}
