//! Model table and the streaming HTTP client for each provider family.
//!
//! Models are data: a [`ModelProfile`] names the wire protocol family, the
//! provider's model name, the output token budget and any provider options.
//! Adding a model is a new row in [`ModelId::profile`]; adding a provider
//! option is a new [`ProviderOptions`] variant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::stream::{StreamHandle, StreamWriter};
use crate::config::{ProviderEndpoints, ProviderKeys};
use crate::error::{Result, TranslateError};
use crate::metrics::{metric_names, MetricsRegistry};

/// Model selected by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    #[default]
    Google,
    GoogleFlash,
    Anthropic,
    Deepseek,
}

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Gemini,
    Anthropic,
    /// `/chat/completions` with `choices[].delta.content` streaming.
    OpenAiCompatible,
}

const GEMINI_HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Provider-specific request options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOptions {
    None,
    /// Extended thinking with a token budget.
    AnthropicThinking { budget_tokens: u32 },
    /// One threshold applied to every listed harm category.
    GeminiSafety {
        threshold: &'static str,
        categories: &'static [&'static str],
    },
}

impl ProviderOptions {
    /// Merge these options into a provider request body.
    pub fn apply(&self, body: &mut Value) {
        match self {
            ProviderOptions::None => {}
            ProviderOptions::AnthropicThinking { budget_tokens } => {
                body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget_tokens });
            }
            ProviderOptions::GeminiSafety {
                threshold,
                categories,
            } => {
                body["safetySettings"] = Value::Array(
                    categories
                        .iter()
                        .map(|category| json!({ "category": category, "threshold": threshold }))
                        .collect(),
                );
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelProfile {
    pub family: ModelFamily,
    pub model_name: &'static str,
    /// `None` leaves the provider default in place.
    pub max_tokens: Option<u32>,
    pub options: ProviderOptions,
}

const GEMINI_OPEN_SAFETY: ProviderOptions = ProviderOptions::GeminiSafety {
    threshold: "BLOCK_NONE",
    categories: GEMINI_HARM_CATEGORIES,
};

impl ModelId {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelId::Google => "google",
            ModelId::GoogleFlash => "google_flash",
            ModelId::Anthropic => "anthropic",
            ModelId::Deepseek => "deepseek",
        }
    }

    pub const fn profile(self) -> ModelProfile {
        match self {
            ModelId::Google => ModelProfile {
                family: ModelFamily::Gemini,
                model_name: "gemini-2.5-pro",
                max_tokens: None,
                options: GEMINI_OPEN_SAFETY,
            },
            ModelId::GoogleFlash => ModelProfile {
                family: ModelFamily::Gemini,
                model_name: "gemini-2.5-flash",
                max_tokens: None,
                options: GEMINI_OPEN_SAFETY,
            },
            ModelId::Anthropic => ModelProfile {
                family: ModelFamily::Anthropic,
                model_name: "claude-sonnet-4-5-20250929",
                max_tokens: Some(32_000),
                options: ProviderOptions::AnthropicThinking {
                    budget_tokens: 2048,
                },
            },
            ModelId::Deepseek => ModelProfile {
                family: ModelFamily::OpenAiCompatible,
                model_name: "deepseek-reasoner",
                max_tokens: Some(8192),
                options: ProviderOptions::None,
            },
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anthropic requires `max_tokens`; used when a profile leaves it unset.
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 8192;

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Text(String),
    Done,
    Error(String),
    Ignore,
}

/// Request ready to send.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

impl ModelFamily {
    /// Environment variable holding this family's key.
    pub fn credential_name(self) -> &'static str {
        match self {
            ModelFamily::Gemini => "GOOGLE_GENERATIVE_AI_KEY",
            ModelFamily::Anthropic => "CLAUDE_AI_KEY",
            ModelFamily::OpenAiCompatible => "DEEPSEEK_API_KEY",
        }
    }

    pub fn api_key(self, keys: &ProviderKeys) -> Option<&str> {
        match self {
            ModelFamily::Gemini => keys.google.as_deref(),
            ModelFamily::Anthropic => keys.anthropic.as_deref(),
            ModelFamily::OpenAiCompatible => keys.deepseek.as_deref(),
        }
    }

    pub fn build_request(
        self,
        profile: &ModelProfile,
        endpoints: &ProviderEndpoints,
        api_key: &str,
        system_prompt: &str,
        user_message: &str,
    ) -> ProviderRequest {
        let (url, headers, mut body) = match self {
            ModelFamily::Gemini => {
                let mut body = json!({
                    "systemInstruction": { "parts": [{ "text": system_prompt }] },
                    "contents": [{ "role": "user", "parts": [{ "text": user_message }] }],
                });
                if let Some(max) = profile.max_tokens {
                    body["generationConfig"] = json!({ "maxOutputTokens": max });
                }
                (
                    format!(
                        "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                        endpoints.gemini, profile.model_name
                    ),
                    vec![("x-goog-api-key", api_key.to_string())],
                    body,
                )
            }
            ModelFamily::Anthropic => (
                format!("{}/v1/messages", endpoints.anthropic),
                vec![
                    ("x-api-key", api_key.to_string()),
                    ("anthropic-version", "2023-06-01".to_string()),
                ],
                json!({
                    "model": profile.model_name,
                    "max_tokens": profile.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
                    "system": system_prompt,
                    "messages": [{ "role": "user", "content": user_message }],
                    "stream": true,
                }),
            ),
            ModelFamily::OpenAiCompatible => {
                let mut body = json!({
                    "model": profile.model_name,
                    "messages": [
                        { "role": "system", "content": system_prompt },
                        { "role": "user", "content": user_message },
                    ],
                    "stream": true,
                });
                if let Some(max) = profile.max_tokens {
                    body["max_tokens"] = json!(max);
                }
                (
                    format!("{}/chat/completions", endpoints.deepseek),
                    vec![("Authorization", format!("Bearer {api_key}"))],
                    body,
                )
            }
        };
        profile.options.apply(&mut body);
        ProviderRequest { url, headers, body }
    }

    /// Interpret the payload of one `data:` line.
    pub fn parse_event(self, data: &str) -> SseEvent {
        match self {
            ModelFamily::Gemini => parse_gemini(data),
            ModelFamily::Anthropic => parse_anthropic(data),
            ModelFamily::OpenAiCompatible => parse_openai(data),
        }
    }
}

fn parse_gemini(data: &str) -> SseEvent {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Ignore;
    };
    if let Some(message) = value["error"]["message"].as_str() {
        return SseEvent::Error(message.to_string());
    }
    if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
        return SseEvent::Error(format!("prompt blocked: {reason}"));
    }
    let text: String = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter(|p| !p["thought"].as_bool().unwrap_or(false))
                .filter_map(|p| p["text"].as_str())
                .collect()
        })
        .unwrap_or_default();
    if text.is_empty() {
        SseEvent::Ignore
    } else {
        SseEvent::Text(text)
    }
}

fn parse_anthropic(data: &str) -> SseEvent {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Ignore;
    };
    match value["type"].as_str() {
        Some("content_block_delta") if value["delta"]["type"] == "text_delta" => value["delta"]
            ["text"]
            .as_str()
            .map(|t| SseEvent::Text(t.to_string()))
            .unwrap_or(SseEvent::Ignore),
        Some("message_stop") => SseEvent::Done,
        Some("error") => SseEvent::Error(
            value["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error")
                .to_string(),
        ),
        _ => SseEvent::Ignore,
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    delta: ChatDelta,
}

#[derive(Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

fn parse_openai(data: &str) -> SseEvent {
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<ChatChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(SseEvent::Text)
            .unwrap_or(SseEvent::Ignore),
        Err(_) => match serde_json::from_str::<Value>(data) {
            Ok(v) if v["error"]["message"].is_string() => {
                SseEvent::Error(v["error"]["message"].as_str().unwrap_or_default().to_string())
            }
            _ => SseEvent::Ignore,
        },
    }
}

/// Opens a streaming generation.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, model: ModelId, system_prompt: &str, document: &str) -> Result<StreamHandle>;
}

/// Retry settings for opening a stream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// reqwest-backed invoker for every family in the table.
pub struct HttpModelInvoker {
    http: reqwest::Client,
    keys: ProviderKeys,
    endpoints: ProviderEndpoints,
    retry: RetryPolicy,
    metrics: Arc<MetricsRegistry>,
    shutdown: CancellationToken,
}

impl HttpModelInvoker {
    pub fn new(
        http: reqwest::Client,
        keys: ProviderKeys,
        endpoints: ProviderEndpoints,
        retry: RetryPolicy,
        metrics: Arc<MetricsRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            http,
            keys,
            endpoints,
            retry,
            metrics,
            shutdown,
        }
    }

    /// Send with retry.
    /// 429: Retry-After or exponential backoff. 5xx: exponential backoff.
    /// Anything else non-2xx fails immediately with the provider's body.
    async fn send_with_retry(&self, request: &ProviderRequest) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            let mut builder = self.http.post(&request.url).json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(*name, value);
            }
            let response = builder.send().await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }

            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt >= self.retry.max_retries {
                let body = response.text().await.unwrap_or_default();
                return Err(TranslateError::Provider {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                });
            }

            let wait = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| self.retry.base_delay * (1 << attempt));
            warn!(
                attempt,
                status = status.as_u16(),
                wait_ms = wait.as_millis() as u64,
                "provider rejected stream request, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.cancelled() => {
                    return Err(TranslateError::Stream("server shutting down".into()));
                }
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn invoke(&self, model: ModelId, system_prompt: &str, document: &str) -> Result<StreamHandle> {
        let profile = model.profile();
        let api_key = profile
            .family
            .api_key(&self.keys)
            .ok_or(TranslateError::MissingCredential {
                name: profile.family.credential_name(),
            })?;

        let request = profile.family.build_request(
            &profile,
            &self.endpoints,
            api_key,
            system_prompt,
            document,
        );
        debug!(model = %model, url = %request.url, "opening model stream");
        let response = self.send_with_retry(&request).await?;

        let (handle, writer) = StreamHandle::channel();
        tokio::spawn(pump(
            response,
            writer,
            profile.family,
            Arc::clone(&self.metrics),
            self.shutdown.child_token(),
            handle.id().to_string(),
        ));
        Ok(handle)
    }
}

/// Move SSE deltas from the provider response into the handle.
async fn pump(
    response: reqwest::Response,
    mut writer: StreamWriter,
    family: ModelFamily,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
    stream_id: String,
) {
    let started = Instant::now();
    let mut first_chunk = true;
    let mut stream = response.bytes_stream();
    // Raw bytes until a full line is present so multi-byte characters split
    // across network chunks decode correctly.
    let mut line_buf: Vec<u8> = Vec::new();

    loop {
        let next = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => {
                writer.fail("server shutting down");
                return;
            }
        };
        let Some(chunk) = next else { break };
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "model stream interrupted");
                writer.fail(e.to_string());
                return;
            }
        };
        line_buf.extend_from_slice(&bytes);

        while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = line_buf.drain(..=pos).collect();
            match handle_line(&line, family) {
                SseEvent::Text(text) => {
                    if first_chunk {
                        first_chunk = false;
                        metrics.record(
                            metric_names::FIRST_CHUNK,
                            started.elapsed().as_micros() as f64,
                        );
                    }
                    writer.push(&text);
                }
                SseEvent::Done => {
                    finish(&mut writer, &metrics, started, &stream_id);
                    return;
                }
                SseEvent::Error(message) => {
                    warn!(stream_id = %stream_id, error = %message, "provider reported stream error");
                    writer.fail(message);
                    return;
                }
                SseEvent::Ignore => {}
            }
        }
    }

    // Trailing line without a newline.
    if let SseEvent::Text(text) = handle_line(&line_buf, family) {
        writer.push(&text);
    }
    finish(&mut writer, &metrics, started, &stream_id);
}

fn handle_line(line: &[u8], family: ModelFamily) -> SseEvent {
    let line = String::from_utf8_lossy(line);
    match line.trim().strip_prefix("data:") {
        Some(data) => family.parse_event(data.trim_start()),
        None => SseEvent::Ignore,
    }
}

fn finish(writer: &mut StreamWriter, metrics: &MetricsRegistry, started: Instant, stream_id: &str) {
    writer.finish();
    let elapsed_us = started.elapsed().as_micros() as f64;
    metrics.record(metric_names::GENERATION_DONE, elapsed_us);
    info!(stream_id, elapsed_ms = elapsed_us / 1000.0, "model stream finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> ProviderEndpoints {
        ProviderEndpoints::default()
    }

    #[test]
    fn anthropic_profile_carries_thinking_budget() {
        let profile = ModelId::Anthropic.profile();
        let req = profile
            .family
            .build_request(&profile, &endpoints(), "key", "sys", "doc");
        assert_eq!(req.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(req.body["max_tokens"], 32_000);
        assert_eq!(req.body["thinking"]["type"], "enabled");
        assert_eq!(req.body["thinking"]["budget_tokens"], 2048);
        assert_eq!(req.body["system"], "sys");
        assert!(req.headers.iter().any(|(k, v)| *k == "x-api-key" && v == "key"));
    }

    #[test]
    fn gemini_profiles_disable_safety_blocking() {
        for model in [ModelId::Google, ModelId::GoogleFlash] {
            let profile = model.profile();
            let req = profile
                .family
                .build_request(&profile, &endpoints(), "key", "sys", "doc");
            let settings = req.body["safetySettings"].as_array().unwrap();
            assert_eq!(settings.len(), GEMINI_HARM_CATEGORIES.len());
            assert!(settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
            assert!(req.url.contains(profile.model_name));
            assert!(req.url.ends_with(":streamGenerateContent?alt=sse"));
            assert!(req.body.get("generationConfig").is_none());
        }
    }

    #[test]
    fn deepseek_uses_chat_completions_without_options() {
        let profile = ModelId::Deepseek.profile();
        let req = profile
            .family
            .build_request(&profile, &endpoints(), "key", "sys", "doc");
        assert_eq!(req.url, "https://api.deepseek.com/chat/completions");
        assert_eq!(req.body["max_tokens"], 8192);
        assert_eq!(req.body["messages"][0]["role"], "system");
        assert!(req.body.get("thinking").is_none());
        assert!(req.body.get("safetySettings").is_none());
    }

    #[test]
    fn parses_each_family_delta() {
        assert_eq!(
            ModelFamily::Gemini.parse_event(
                r#"{"candidates":[{"content":{"parts":[{"text":"Chương "},{"text":"một"}]}}]}"#
            ),
            SseEvent::Text("Chương một".into())
        );
        assert_eq!(
            ModelFamily::Anthropic.parse_event(
                r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hi"}}"#
            ),
            SseEvent::Text("Hi".into())
        );
        assert_eq!(
            ModelFamily::Anthropic.parse_event(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#
            ),
            SseEvent::Ignore
        );
        assert_eq!(
            ModelFamily::Anthropic.parse_event(r#"{"type":"message_stop"}"#),
            SseEvent::Done
        );
        assert_eq!(
            ModelFamily::OpenAiCompatible
                .parse_event(r#"{"choices":[{"delta":{"content":"xin"}}]}"#),
            SseEvent::Text("xin".into())
        );
        assert_eq!(ModelFamily::OpenAiCompatible.parse_event("[DONE]"), SseEvent::Done);
    }

    #[test]
    fn provider_errors_become_error_events() {
        assert!(matches!(
            ModelFamily::Gemini.parse_event(r#"{"error":{"code":400,"message":"bad key"}}"#),
            SseEvent::Error(m) if m == "bad key"
        ));
        assert!(matches!(
            ModelFamily::Anthropic
                .parse_event(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            SseEvent::Error(m) if m == "Overloaded"
        ));
        assert!(matches!(
            ModelFamily::Gemini.parse_event(r#"{"promptFeedback":{"blockReason":"OTHER"}}"#),
            SseEvent::Error(_)
        ));
    }

    #[test]
    fn handle_line_requires_data_prefix() {
        assert_eq!(handle_line(b"event: ping\n", ModelFamily::Anthropic), SseEvent::Ignore);
        assert_eq!(
            handle_line(b"data: [DONE]\r\n", ModelFamily::OpenAiCompatible),
            SseEvent::Done
        );
    }

    #[tokio::test]
    async fn missing_key_is_reported_before_any_request() {
        let invoker = HttpModelInvoker::new(
            reqwest::Client::new(),
            ProviderKeys::default(),
            endpoints(),
            RetryPolicy::default(),
            Arc::new(MetricsRegistry::new()),
            CancellationToken::new(),
        );
        let err = invoker.invoke(ModelId::Anthropic, "s", "d").await.unwrap_err();
        assert!(matches!(
            err,
            TranslateError::MissingCredential { name: "CLAUDE_AI_KEY" }
        ));
    }
}
