//! Server state
//!
//! Shared, read-mostly handles for the route handlers. Everything mutable lives
//! behind the translation cache or the prefetch queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{Result, TranslateError};
use crate::metrics::MetricsRegistry;
use crate::prefetch::{run_prefetch_loop, Prefetcher};
use crate::translate::cache::SingleFlightCache;
use crate::translate::fetcher::{Crawler, FirecrawlScraper, JinaReader};
use crate::translate::models::HttpModelInvoker;
use crate::translate::prompts::GenrePrompts;
use crate::translate::{TranslationPipeline, TranslationService};

/// Shared application state for the server
pub struct AppState {
    pub service: Arc<TranslationService>,
    pub prefetcher: Arc<Prefetcher>,
    pub metrics: Arc<MetricsRegistry>,
    pub started: Instant,
}

impl AppState {
    /// Wire the pipeline from `config` and start the prefetch worker.
    /// Must be called inside a tokio runtime.
    pub fn start(config: &AppConfig, shutdown: CancellationToken) -> Result<Arc<Self>> {
        // Idle reads time out; a generation streams for as long as chunks arrive.
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| TranslateError::Config(format!("http client: {e}")))?;

        let metrics = Arc::new(MetricsRegistry::new());
        let crawler = Crawler::new(
            JinaReader::new(http.clone(), &config.endpoints.jina, config.keys.jina.clone()),
            FirecrawlScraper::new(
                http.clone(),
                &config.endpoints.firecrawl,
                config.keys.firecrawl.clone(),
            ),
        );
        let invoker = HttpModelInvoker::new(
            http,
            config.keys.clone(),
            config.endpoints.clone(),
            config.retry.clone(),
            Arc::clone(&metrics),
            shutdown.clone(),
        );
        let pipeline = Arc::new(TranslationPipeline::new(
            Arc::new(crawler),
            Arc::new(GenrePrompts::new(config.glossary_path.clone())),
            Arc::new(invoker),
            Arc::clone(&metrics),
        ));
        let service = Arc::new(TranslationService::new(
            SingleFlightCache::new(config.cache.clone()),
            pipeline,
            Arc::clone(&metrics),
        ));

        let prefetcher = Arc::new(Prefetcher::new(config.prefetch_queue));
        run_prefetch_loop(
            &prefetcher,
            Arc::clone(&service),
            Arc::clone(&metrics),
            shutdown,
        );

        info!(
            keys = ?config.keys,
            cache_capacity = config.cache.capacity,
            prefetch_queue = config.prefetch_queue,
            "application state ready"
        );

        Ok(Arc::new(Self {
            service,
            prefetcher,
            metrics,
            started: Instant::now(),
        }))
    }
}
