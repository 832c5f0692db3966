//! Chapterflow: streams LLM translations of web-novel chapters.
//! Library root: tracing setup and the server lifecycle.

pub mod config;
pub mod error;
pub mod metrics;
pub mod navigator;
pub mod prefetch;
pub mod server;
pub mod state_machine;
pub mod translate;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::AppConfig;
use server::state::AppState;

const DEFAULT_LOG_FILTER: &str = "chapterflow=debug,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Run the server until ctrl-c.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("chapterflow starting");
    let shutdown = CancellationToken::new();
    let state = AppState::start(&config, shutdown.clone())?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        signal.cancel();
    });

    server::serve(&config.server, state, shutdown.clone()).await?;
    shutdown.cancel();
    info!("chapterflow stopped");
    Ok(())
}
