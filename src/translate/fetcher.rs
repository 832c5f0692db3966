//! Chapter fetching through a reader proxy (Jina) or a managed scrape API
//! (Firecrawl). Both return the page as text/markdown.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::ScraperProvider;
use crate::error::{Result, TranslateError};

/// Returns the raw text of a chapter page.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str, provider: ScraperProvider) -> Result<String>;
}

/// `GET {base}/{url}`; the key is optional and only raises rate limits.
pub struct JinaReader {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JinaReader {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String> {
        let target = format!("{}/{}", self.base_url.trim_end_matches('/'), url);
        info!(target = %target, "fetching content from reader proxy");

        let mut request = self.http.get(&target);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TranslateError::Provider {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

/// `POST {base}/v1/scrape` asking for markdown.
pub struct FirecrawlScraper {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<ScrapeData>,
}

#[derive(Debug, Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
}

impl FirecrawlScraper {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            api_key,
        }
    }

    pub async fn fetch(&self, url: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(TranslateError::MissingCredential {
                name: "FIRECRAWL_API_KEY",
            })?;
        info!(url, "fetching content from scrape api");

        let response = self
            .http
            .post(format!("{}/v1/scrape", self.base_url.trim_end_matches('/')))
            .bearer_auth(api_key)
            .json(&json!({ "url": url, "formats": ["markdown"] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslateError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response.text().await?;
        let parsed: ScrapeResponse = serde_json::from_str(&raw)
            .map_err(|e| TranslateError::ProviderLogic(format!("unreadable scrape response: {e}")))?;
        if !parsed.success {
            return Err(TranslateError::ProviderLogic(format!("scrape failed: {raw}")));
        }
        Ok(parsed.data.and_then(|d| d.markdown).unwrap_or_default())
    }
}

/// Dispatches to the scraper named in the request.
pub struct Crawler {
    jina: JinaReader,
    firecrawl: FirecrawlScraper,
}

impl Crawler {
    pub fn new(jina: JinaReader, firecrawl: FirecrawlScraper) -> Self {
        Self { jina, firecrawl }
    }
}

#[async_trait]
impl ContentFetcher for Crawler {
    async fn fetch(&self, url: &str, provider: ScraperProvider) -> Result<String> {
        let content = match provider {
            ScraperProvider::Jina => self.jina.fetch(url).await?,
            ScraperProvider::Firecrawl => self.firecrawl.fetch(url).await?,
        };
        debug!(url, provider = %provider, bytes = content.len(), "content fetched");
        Ok(content)
    }
}
