//! Runtime configuration: CLI flags with environment fallbacks, provider keys
//! and provider base URLs.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::translate::cache::{CacheConfig, DEFAULT_CAPACITY};
use crate::translate::models::RetryPolicy;

/// Default port, matching the web UI's dev server.
pub const DEFAULT_PORT: u16 = 4321;
/// Prefetch jobs buffered before new ones are dropped.
pub const DEFAULT_PREFETCH_QUEUE: usize = 32;

/// Command-line interface.
#[derive(Debug, Clone, Parser)]
#[command(name = "chapterflow", version, about = "Streams LLM translations of web-novel chapters")]
pub struct Cli {
    #[arg(long, env = "CHAPTERFLOW_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Allow cross-origin requests from any origin.
    #[arg(long, env = "CHAPTERFLOW_CORS")]
    pub cors: bool,

    /// Emit logs as JSON lines.
    #[arg(long, env = "CHAPTERFLOW_LOG_JSON")]
    pub log_json: bool,

    /// JSON name glossary appended to every system prompt.
    #[arg(long, env = "CHAPTERFLOW_GLOSSARY")]
    pub glossary: Option<PathBuf>,

    /// Completed translations kept in memory.
    #[arg(long, env = "CHAPTERFLOW_CACHE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub cache_capacity: usize,

    /// Drop completed translations after this many seconds (default: never).
    #[arg(long, env = "CHAPTERFLOW_CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    /// How long a duplicate request waits for the in-flight one.
    #[arg(long, env = "CHAPTERFLOW_WAIT_BUDGET_SECS", default_value_t = 120)]
    pub wait_budget_secs: u64,

    #[arg(long, env = "CHAPTERFLOW_PREFETCH_QUEUE", default_value_t = DEFAULT_PREFETCH_QUEUE)]
    pub prefetch_queue: usize,

    /// Longest silence tolerated on a provider connection, including
    /// between chunks of a running generation.
    #[arg(long, env = "CHAPTERFLOW_READ_TIMEOUT_SECS", default_value_t = 120)]
    pub read_timeout_secs: u64,
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            cors_enabled: false,
        }
    }
}

/// Provider API keys. Empty variables count as unset.
#[derive(Clone, Default)]
pub struct ProviderKeys {
    pub jina: Option<String>,
    pub firecrawl: Option<String>,
    pub google: Option<String>,
    pub anthropic: Option<String>,
    pub deepseek: Option<String>,
}

impl ProviderKeys {
    pub fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }
        Self {
            jina: var("JINA_API_KEY"),
            firecrawl: var("FIRECRAWL_API_KEY"),
            google: var("GOOGLE_GENERATIVE_AI_KEY"),
            anthropic: var("CLAUDE_AI_KEY"),
            deepseek: var("DEEPSEEK_API_KEY"),
        }
    }
}

impl std::fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shown = |k: &Option<String>| if k.is_some() { "set" } else { "unset" };
        f.debug_struct("ProviderKeys")
            .field("jina", &shown(&self.jina))
            .field("firecrawl", &shown(&self.firecrawl))
            .field("google", &shown(&self.google))
            .field("anthropic", &shown(&self.anthropic))
            .field("deepseek", &shown(&self.deepseek))
            .finish()
    }
}

/// Provider base URLs, overridable for tests and proxies.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub jina: String,
    pub firecrawl: String,
    pub gemini: String,
    pub anthropic: String,
    pub deepseek: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            jina: "https://r.jina.ai".to_string(),
            firecrawl: "https://api.firecrawl.dev".to_string(),
            gemini: "https://generativelanguage.googleapis.com".to_string(),
            anthropic: "https://api.anthropic.com".to_string(),
            deepseek: "https://api.deepseek.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Every provider behind one base URL.
    pub fn all_at(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            jina: base.clone(),
            firecrawl: base.clone(),
            gemini: base.clone(),
            anthropic: base.clone(),
            deepseek: base,
        }
    }
}

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub prefetch_queue: usize,
    pub glossary_path: Option<PathBuf>,
    pub keys: ProviderKeys,
    pub endpoints: ProviderEndpoints,
    pub connect_timeout: Duration,
    /// Idle limit per read. Generations have no total deadline: a long
    /// chapter keeps streaming as long as tokens keep arriving.
    pub read_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            prefetch_queue: DEFAULT_PREFETCH_QUEUE,
            glossary_path: None,
            keys: ProviderKeys::default(),
            endpoints: ProviderEndpoints::default(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

impl Cli {
    pub fn into_config(self) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: self.host,
                port: self.port,
                cors_enabled: self.cors,
            },
            cache: CacheConfig {
                capacity: self.cache_capacity.max(1),
                ttl: self.cache_ttl_secs.map(Duration::from_secs),
                wait_budget: Duration::from_secs(self.wait_budget_secs),
            },
            prefetch_queue: self.prefetch_queue.max(1),
            read_timeout: Duration::from_secs(self.read_timeout_secs.max(1)),
            glossary_path: self.glossary,
            keys: ProviderKeys::from_env(),
            ..AppConfig::default()
        }
    }
}
