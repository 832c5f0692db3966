//! Chapter translation: request types, the fetch → prompt → invoke pipeline,
//! and the cached service in front of it.

pub mod cache;
pub mod fetcher;
pub mod glossary;
pub mod models;
pub mod prompts;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::metrics::{metric_names, MetricsRegistry};
use cache::{CacheKey, SingleFlightCache};
use fetcher::ContentFetcher;
use models::ModelInvoker;
use prompts::PromptResolver;
use stream::StreamHandle;

pub use models::ModelId;

/// Translation style; selects the system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Wuxia,
    FantasyTranslate,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Wuxia => "wuxia",
            Mode::FantasyTranslate => "fantasy_translate",
        }
    }
}

/// Which scraping service fetches the chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScraperProvider {
    #[default]
    Jina,
    Firecrawl,
}

impl ScraperProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            ScraperProvider::Jina => "jina",
            ScraperProvider::Firecrawl => "firecrawl",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for ScraperProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrap the scraped chapter as the user turn.
pub fn build_user_message(document: &str) -> String {
    format!(
        "Here are the original work you will be working with:\n<original>\n{document}\n</original>"
    )
}

/// The producer: fetch the chapter, resolve the prompt, open the model stream.
pub struct TranslationPipeline {
    fetcher: Arc<dyn ContentFetcher>,
    prompts: Arc<dyn PromptResolver>,
    invoker: Arc<dyn ModelInvoker>,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationPipeline {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        prompts: Arc<dyn PromptResolver>,
        invoker: Arc<dyn ModelInvoker>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            fetcher,
            prompts,
            invoker,
            metrics,
        }
    }

    pub async fn produce(&self, key: &CacheKey) -> Result<StreamHandle> {
        let span = self.metrics.span(metric_names::FETCH_DONE);
        let document = self.fetcher.fetch(&key.url, key.scraper).await?;
        let fetch_us = span.finish();
        info!(
            url = %key.url,
            scraper = %key.scraper,
            chars = document.chars().count(),
            fetch_ms = fetch_us / 1000.0,
            "content fetched"
        );

        let span = self.metrics.span(metric_names::PROMPT_RESOLVED);
        let system_prompt = self.prompts.resolve(key.mode).await?;
        span.finish();

        let span = self.metrics.span(metric_names::INVOKE_SETUP);
        let handle = self
            .invoker
            .invoke(key.model, &system_prompt, &build_user_message(&document))
            .await?;
        let setup_us = span.finish();
        info!(
            model = %key.model,
            stream_id = handle.id(),
            setup_ms = setup_us / 1000.0,
            "model stream opened"
        );
        Ok(handle)
    }
}

/// Cached entry point used by the HTTP layer and the prefetcher.
pub struct TranslationService {
    cache: SingleFlightCache<StreamHandle>,
    pipeline: Arc<TranslationPipeline>,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationService {
    pub fn new(
        cache: SingleFlightCache<StreamHandle>,
        pipeline: Arc<TranslationPipeline>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            cache,
            pipeline,
            metrics,
        }
    }

    pub fn cache(&self) -> &SingleFlightCache<StreamHandle> {
        &self.cache
    }

    /// Resolve `key` through the single-flight cache.
    pub async fn translate(&self, key: &CacheKey, ignore_cache: bool) -> Result<StreamHandle> {
        let started = Instant::now();
        let pipeline = Arc::clone(&self.pipeline);
        let producer_key = key.clone();
        let result = self
            .cache
            .resolve(
                key,
                move || async move { pipeline.produce(&producer_key).await },
                ignore_cache,
            )
            .await;
        self.metrics.record(
            metric_names::TRANSLATE_RESOLVED,
            started.elapsed().as_micros() as f64,
        );
        result
    }
}
