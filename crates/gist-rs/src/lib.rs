//! Rate-aware, cached LLM orchestration for long-document summarization.
//!
//! `gist-rs` sits between a document pipeline and a rate-limited chat
//! completions service ([OpenRouter](https://openrouter.ai/) by default). It
//! turns one large document into many small, cached, admission-controlled
//! requests and folds the partial answers back into a single structured
//! summary.
//!
//! # Getting started
//!
//! ```ignore
//! use gist_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     let backend = Arc::new(OpenRouterClient::new(api_key, DEFAULT_MODEL)?);
//!
//!     let admission = Arc::new(AdmissionController::new(AdmissionConfig::default()));
//!     let metrics = Arc::new(CallMetrics::new());
//!     let cache = CompletionCache::new(".cache").map_err(|e| e.to_string())?;
//!
//!     let client = Arc::new(CachingCompletionClient::new(
//!         backend, admission, metrics, cache,
//!     ));
//!
//!     let text = std::fs::read_to_string("minutes.txt").map_err(|e| e.to_string())?;
//!     let output = ChunkedSummarizer::new(client, SummarizerConfig::default())
//!         .summarize(&text)
//!         .await
//!         .map_err(|e| e.to_string())?;
//!
//!     println!("{}", output.summary.summary);
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Throttle requests:** [`AdmissionController`](admission::AdmissionController)
//!   combines a sliding one-minute request/token window with an AIMD
//!   concurrency ceiling. Every remote attempt is admitted before it is sent
//!   and reported back when it finishes.
//!
//! - **Observe throughput:** [`CallMetrics`](metrics::CallMetrics) keeps
//!   cumulative totals and a rolling latency window. Call
//!   [`log_status`](metrics::CallMetrics::log_status) for a one-line report.
//!
//! - **Call the model:** [`CachingCompletionClient`](client::CachingCompletionClient)
//!   wraps any [`CompletionBackend`](api::backend::CompletionBackend) with a
//!   content-addressed disk cache ([`cache`]), retry with jittered exponential
//!   backoff ([`api::retry`]) and admission control. Structured calls are
//!   validated against the JSON Schema of the target type.
//!
//! - **Summarize a document:** [`ChunkedSummarizer`](summarize::ChunkedSummarizer)
//!   partitions text, fans extraction and mini-summary calls out over a
//!   bounded pool, reduces the results into an outline and synthesizes a
//!   [`StructuredSummary`](summarize::StructuredSummary).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`admission`] | Sliding-window quota + AIMD concurrency governor |
//! | [`metrics`] | Rolling call statistics |
//! | [`cache`] | Fingerprinting and the on-disk response cache |
//! | [`client`] | Caching, retrying, admission-aware completion client |
//! | [`api`] | Backend trait, retry policy |
//! | [`summarize`] | Chunking, reduction, prompts and the map-reduce pipeline |
//! | [`records`] | "Already processed" bookkeeping for batch runs |
//! | [`source`] | Text extraction and document discovery |
//! | [`config`] | Environment-driven configuration |

pub mod admission;
pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod records;
pub mod source;
pub mod summarize;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::api::backend::{CompletionBackend, CompletionFuture};
use crate::error::CompletionError;

// Re-export schemars for downstream crates.
pub use schemars;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for all LLM calls.
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` from a type that implements
/// `schemars::JsonSchema`. Structured completions are requested and
/// validated against this value.
///
/// # Example
///
/// ```
/// use gist_rs::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Extraction {
///     named_entities: Vec<String>,
///     #[serde(default)]
///     note: Option<String>,
/// }
///
/// let schema = json_schema_for::<Extraction>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["required"].as_array().unwrap().contains(&"named_entities".into()));
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

/// A named JSON Schema describing the shape of a structured response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    /// Build the schema for `T`, named after the schema's title.
    pub fn of<T: JsonSchema>() -> Self {
        let schema = json_schema_for::<T>();
        let name = schema
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("response")
            .to_string();
        Self { name, schema }
    }
}

// ── Request types ──────────────────────────────────────────────────

/// Chat completion request body. Unused optional fields are omitted from
/// serialization.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    // Messages
    pub messages: Vec<Message>,

    // Generation parameters
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    // Output format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

/// JSON output format type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_schema")]
    JsonSchema,
}

/// JSON output mode.
#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaFormat>,
}

/// Schema payload for `response_format: json_schema`.
#[derive(Serialize, Debug)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    /// Ask the model for a JSON object conforming to `schema`.
    pub fn json_schema(schema: &ResponseSchema) -> Self {
        Self {
            fmt_type: ResponseFormatType::JsonSchema,
            json_schema: Some(JsonSchemaFormat {
                name: schema.name.clone(),
                strict: false,
                schema: schema.schema.clone(),
            }),
        }
    }
}

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    code: Option<u16>,
}

/// Clean return type from `OpenRouterClient::chat()`.
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for an OpenAI-compatible chat completions endpoint.
pub struct OpenRouterClient {
    pub(crate) client: reqwest::Client,
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) url: String,
    pub(crate) referer: String,
    pub(crate) title: String,
}

impl OpenRouterClient {
    /// Create a new client for `model` with the given API key and default headers.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, model, "https://github.com/gist-rs", "gist-rs")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        model: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("gist-rs/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// The model every request is sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, CompletionError> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={:?}, structured={}",
            body.model.as_deref().unwrap_or("(none)"),
            body.messages.len(),
            body.max_tokens,
            body.temperature,
            body.response_format.is_some(),
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    CompletionError::Request(e.to_string())
                } else {
                    CompletionError::Network(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CompletionError::Network(format!("failed to read response: {e}")))?;

        let elapsed = start.elapsed();
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            elapsed.as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(CompletionError::from_status(status.as_u16(), text));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(CompletionError::from_status(
                err.code.unwrap_or(status.as_u16()),
                err.message,
            ));
        }

        if let Some(ref usage) = parsed.usage {
            debug!(
                "Token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens.unwrap_or(0),
                usage.completion_tokens.unwrap_or(0),
                usage.total_tokens.unwrap_or(0),
            );
        }

        match parsed.choices.and_then(|c| c.into_iter().next()) {
            Some(c) => Ok(ChatCompletion {
                content: c.message.content,
                usage: parsed.usage,
                finish_reason: c.finish_reason,
            }),
            None => {
                debug!("LLM output: empty (no choices)");
                Ok(ChatCompletion {
                    content: None,
                    usage: parsed.usage,
                    finish_reason: None,
                })
            }
        }
    }

    /// Free-form request body. The temperature is always sent, zero included.
    fn text_request(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> ChatRequest {
        ChatRequest {
            model: Some(self.model.clone()),
            messages: messages.to_vec(),
            max_tokens,
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    async fn chat_text(&self, body: ChatRequest) -> Result<String, CompletionError> {
        self.chat(&body)
            .await?
            .content
            .ok_or_else(|| CompletionError::InvalidResponse("empty completion".into()))
    }
}

impl CompletionBackend for OpenRouterClient {
    fn generate<'a>(
        &'a self,
        messages: &'a [Message],
        max_tokens: u32,
        temperature: f32,
    ) -> CompletionFuture<'a, String> {
        Box::pin(async move {
            self.chat_text(self.text_request(messages, max_tokens, temperature)).await
        })
    }

    fn generate_structured<'a>(
        &'a self,
        messages: &'a [Message],
        schema: &'a ResponseSchema,
        max_tokens: u32,
    ) -> CompletionFuture<'a, serde_json::Value> {
        Box::pin(async move {
            let body = ChatRequest {
                model: Some(self.model.clone()),
                messages: messages.to_vec(),
                max_tokens,
                response_format: Some(ResponseFormat::json_schema(schema)),
                ..Default::default()
            };
            let text = self.chat_text(body).await?;
            serde_json::from_str(&text).map_err(|e| {
                CompletionError::InvalidResponse(format!("structured output is not JSON: {e}"))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let sys = Message::system("hello");
        assert_eq!(sys.role, MessageRole::System);
        assert_eq!(sys.content, "hello");

        let user = Message::user("world");
        assert_eq!(user.role, MessageRole::User);

        let assist = Message::assistant("prefill");
        assert_eq!(assist.role, MessageRole::Assistant);
        assert_eq!(assist.content, "prefill");
    }

    #[test]
    fn chat_request_default_skips_none_fields() {
        let req = ChatRequest {
            model: Some("test-model".into()),
            messages: vec![Message::user("hi")],
            max_tokens: 100,
            temperature: Some(0.5),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn zero_temperature_is_sent() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            max_tokens: 10,
            temperature: Some(0.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["temperature"], 0.0);

        let unset = ChatRequest {
            messages: vec![Message::user("hi")],
            ..Default::default()
        };
        assert!(serde_json::to_value(&unset).unwrap().get("temperature").is_none());
    }

    #[test]
    fn text_request_keeps_zero_temperature() {
        let client = OpenRouterClient::new("sk-test", "openai/gpt-4o-mini").unwrap();
        let body = client.text_request(&[Message::user("hi")], 64, 0.0);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["model"], "openai/gpt-4o-mini");
        assert_eq!(json["max_tokens"], 64);
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Headlines {
        items: Vec<String>,
    }

    #[test]
    fn response_schema_named_after_title() {
        let schema = ResponseSchema::of::<Headlines>();
        assert_eq!(schema.name, "Headlines");
        assert_eq!(schema.schema["type"], "object");
    }

    #[test]
    fn json_schema_response_format_serializes() {
        let schema = ResponseSchema::of::<Headlines>();
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            response_format: Some(ResponseFormat::json_schema(&schema)),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "Headlines");
        assert_eq!(json["response_format"]["json_schema"]["strict"], false);
    }
}
