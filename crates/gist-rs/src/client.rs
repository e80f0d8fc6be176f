//! Admission-aware, caching, retrying completion client.
//!
//! Every call follows the same path:
//!
//! 1. Estimate tokens as `Σ chars(content) / 4 + max_tokens`.
//! 2. Wait for admission from the shared [`AdmissionController`].
//! 3. Fingerprint the request and consult the [`CompletionCache`]. A hit
//!    releases the admitted slot as a zero-token success and returns.
//! 4. On a miss, call the backend, retrying transient failures with jittered
//!    exponential backoff. Every retry is admitted again, and every attempt
//!    reports its own outcome to admission and metrics.
//! 5. Persist the successful payload under its fingerprint. A failed write
//!    fails the call.
//!
//! Structured calls are validated against the JSON Schema of the target type
//! and decoded into it before they count as successful, so a response the
//! caller cannot use is never cached. Cached entries get the same checks and
//! are misses when they fail.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::admission::AdmissionController;
use crate::api::backend::CompletionBackend;
use crate::api::retry::{RetryConfig, retry_with_backoff};
use crate::cache::{CompletionCache, ResponseShape, fingerprint};
use crate::error::CompletionError;
use crate::metrics::CallMetrics;
use crate::{Message, ResponseSchema};

/// Token estimate used for admission: a quarter token per character of
/// message content, plus the full response budget.
pub fn estimate_tokens(messages: &[Message], max_tokens: u32) -> u64 {
    let prompt: u64 = messages
        .iter()
        .map(|m| m.content.chars().count() as u64 / 4)
        .sum();
    prompt + u64::from(max_tokens)
}

enum CallKind<'a> {
    Text {
        temperature: f32,
    },
    Structured {
        schema: &'a ResponseSchema,
        validator: &'a jsonschema::Validator,
        decode: fn(&serde_json::Value) -> Result<(), CompletionError>,
    },
}

impl CallKind<'_> {
    fn shape(&self) -> ResponseShape<'_> {
        match self {
            CallKind::Text { .. } => ResponseShape::Text,
            CallKind::Structured { schema, .. } => ResponseShape::Structured(&schema.schema),
        }
    }

    /// Whether a cached payload is usable for this call.
    fn accepts(&self, payload: &serde_json::Value) -> bool {
        match self {
            CallKind::Text { .. } => payload.is_string(),
            CallKind::Structured {
                validator, decode, ..
            } => validator.is_valid(payload) && decode(payload).is_ok(),
        }
    }
}

/// Schemas cannot express every constraint of `T` (integer widths, for one),
/// so a validated payload must still decode.
fn check_decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<(), CompletionError> {
    T::deserialize(value)
        .map(|_| ())
        .map_err(|e| CompletionError::Decode(e.to_string()))
}

fn validate(
    validator: &jsonschema::Validator,
    value: serde_json::Value,
) -> Result<serde_json::Value, CompletionError> {
    let errors: Vec<String> = validator
        .iter_errors(&value)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(CompletionError::SchemaViolation(errors))
    }
}

/// An admitted call whose outcome has not been reported yet.
///
/// Dropping it unreported (the attempt's future was cancelled) releases the
/// slot so the in-flight count stays accurate.
struct AdmittedSlot<'a> {
    admission: &'a AdmissionController,
    armed: bool,
}

impl<'a> AdmittedSlot<'a> {
    fn new(admission: &'a AdmissionController) -> Self {
        Self {
            admission,
            armed: true,
        }
    }

    fn finish(mut self, success: bool, tokens_used: u64) {
        self.armed = false;
        self.admission.complete(success, tokens_used);
    }
}

impl Drop for AdmittedSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.admission.release();
        }
    }
}

/// Completion client layering admission, caching and retry over a backend.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to concurrent workers.
pub struct CachingCompletionClient {
    backend: Arc<dyn CompletionBackend>,
    admission: Arc<AdmissionController>,
    metrics: Arc<CallMetrics>,
    cache: CompletionCache,
    plain_retry: RetryConfig,
    structured_retry: RetryConfig,
}

impl CachingCompletionClient {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        admission: Arc<AdmissionController>,
        metrics: Arc<CallMetrics>,
        cache: CompletionCache,
    ) -> Self {
        Self {
            backend,
            admission,
            metrics,
            cache,
            plain_retry: RetryConfig::plain(),
            structured_retry: RetryConfig::structured(),
        }
    }

    /// Replace the retry policies for plain and structured calls.
    pub fn with_retry(mut self, plain: RetryConfig, structured: RetryConfig) -> Self {
        self.plain_retry = plain;
        self.structured_retry = structured;
        self
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn metrics(&self) -> &Arc<CallMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &CompletionCache {
        &self.cache
    }

    /// Free-form text completion.
    pub async fn complete(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
        use_cache: bool,
    ) -> Result<String, CompletionError> {
        let payload = self
            .execute(messages, max_tokens, use_cache, CallKind::Text { temperature })
            .await?;
        match payload {
            serde_json::Value::String(text) => Ok(text),
            other => Err(CompletionError::Decode(format!(
                "expected text completion, got {other}"
            ))),
        }
    }

    /// Completion decoded into `T`, validated against `T`'s JSON Schema.
    pub async fn complete_structured<T>(
        &self,
        messages: &[Message],
        max_tokens: u32,
        use_cache: bool,
    ) -> Result<T, CompletionError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = ResponseSchema::of::<T>();
        let validator = jsonschema::validator_for(&schema.schema).map_err(|e| {
            CompletionError::Request(format!("invalid response schema for {}: {e}", schema.name))
        })?;

        let payload = self
            .execute(
                messages,
                max_tokens,
                use_cache,
                CallKind::Structured {
                    schema: &schema,
                    validator: &validator,
                    decode: check_decode::<T>,
                },
            )
            .await?;
        serde_json::from_value(payload).map_err(|e| CompletionError::Decode(e.to_string()))
    }

    async fn execute(
        &self,
        messages: &[Message],
        max_tokens: u32,
        use_cache: bool,
        kind: CallKind<'_>,
    ) -> Result<serde_json::Value, CompletionError> {
        let estimate = estimate_tokens(messages, max_tokens);
        self.admission.await_admission(estimate).await;

        let key = use_cache.then(|| fingerprint(messages, kind.shape()));
        if let Some(fp) = &key
            && let Some(payload) = self.cache.get_if(fp, |p| kind.accepts(p))
        {
            debug!("Cache hit {fp}");
            self.admission.complete(true, 0);
            self.metrics.record(true, 0, Duration::ZERO);
            return Ok(payload);
        }

        let retry = match kind {
            CallKind::Text { .. } => &self.plain_retry,
            CallKind::Structured { .. } => &self.structured_retry,
        };
        let kind = &kind;
        let key = key.as_deref();
        retry_with_backoff(retry, move |attempt| {
            self.attempt(attempt, messages, max_tokens, estimate, kind, key)
        })
        .await
    }

    /// One remote attempt. The first attempt was admitted by the caller.
    ///
    /// A usable response is written under `key` before the attempt reports
    /// success.
    async fn attempt(
        &self,
        attempt: u32,
        messages: &[Message],
        max_tokens: u32,
        estimate: u64,
        kind: &CallKind<'_>,
        key: Option<&str>,
    ) -> Result<serde_json::Value, CompletionError> {
        if attempt > 0 {
            self.admission.await_admission(estimate).await;
        }
        let slot = AdmittedSlot::new(&self.admission);

        let start = Instant::now();
        let result = match kind {
            CallKind::Text { temperature } => self
                .backend
                .generate(messages, max_tokens, *temperature)
                .await
                .map(serde_json::Value::String),
            CallKind::Structured {
                schema,
                validator,
                decode,
            } => self
                .backend
                .generate_structured(messages, schema, max_tokens)
                .await
                .and_then(|value| validate(validator, value))
                .and_then(|value| decode(&value).map(|()| value)),
        };
        let latency = start.elapsed();

        let result = match (result, key) {
            (Ok(payload), Some(fp)) => match self.cache.put(fp, &payload) {
                Ok(()) => Ok(payload),
                Err(e) => {
                    warn!("Failed to cache response {fp}: {e}");
                    Err(CompletionError::Cache(e))
                }
            },
            (result, _) => result,
        };

        match &result {
            Ok(_) => {
                slot.finish(true, estimate);
                self.metrics.record(true, estimate, latency);
            }
            Err(e) => {
                debug!("Completion attempt {} failed: {e}", attempt + 1);
                slot.finish(false, 0);
                self.metrics.record(false, 0, latency);
            }
        }
        result
    }
}
