//! HTTP server
//!
//! Exposes the translation endpoint the reader UI talks to, chapter
//! navigation helpers, health and metrics.

pub mod routes;
pub mod state;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use state::AppState;

/// Build the API router.
pub fn router(state: Arc<AppState>, cors_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::health::metrics))
        .route("/api/translate", post(routes::translate::translate))
        .route("/api/chapters/next", get(routes::chapters::next_chapter))
        .route("/api/chapters/previous", get(routes::chapters::previous_chapter))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }
    app
}

/// Bind and serve until `shutdown` fires.
pub async fn serve(
    config: &ServerConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

    let app = router(state, config.cors_enabled);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, cors = config.cors_enabled, "chapterflow listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
