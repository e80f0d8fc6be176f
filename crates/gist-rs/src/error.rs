//! Error types for completion calls and the summarization pipeline.
//!
//! [`CompletionError`] separates transient failures (rate limiting, server
//! errors, network trouble) from permanent ones. Only transient failures are
//! retried by [`retry_with_backoff`](crate::api::retry::retry_with_backoff).

use std::time::Duration;
use thiserror::Error;

use crate::summarize::SummaryStage;

/// Failure of a single completion call.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The service asked us to slow down (HTTP 429).
    #[error("rate limited (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },

    /// The service failed on its side (HTTP 5xx).
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Connection, timeout or transport failure.
    #[error("network error: {0}")]
    Network(String),

    /// Any other non-success response (auth, bad request, ...).
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// The response arrived but could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A structured response did not match its JSON Schema.
    #[error("response failed schema validation:\n{}", .0.join("\n"))]
    SchemaViolation(Vec<String>),

    /// A validated response could not be decoded into the target type.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The request could not be built or sent as specified.
    #[error("invalid request: {0}")]
    Request(String),

    /// A successful response could not be written to the completion cache.
    #[error("failed to cache response: {0}")]
    Cache(String),
}

impl CompletionError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::RateLimited { status, body },
            500..=599 => Self::Server { status, body },
            _ => Self::Api { status, body },
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Network(_)
        )
    }
}

/// Failure of a whole-document summarization.
///
/// Any single chunk failure aborts the document; no partial output is
/// produced.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("{stage} failed: {source}")]
    Stage {
        stage: SummaryStage,
        #[source]
        source: CompletionError,
    },

    #[error("summarization did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("summarization stopped before completion")]
    Stopped,
}

impl SummarizeError {
    pub(crate) fn at(stage: SummaryStage) -> impl FnOnce(CompletionError) -> Self {
        move |source| Self::Stage { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            CompletionError::from_status(429, "slow down"),
            CompletionError::RateLimited { status: 429, .. }
        ));
        assert!(matches!(
            CompletionError::from_status(502, "bad gateway"),
            CompletionError::Server { status: 502, .. }
        ));
        assert!(matches!(
            CompletionError::from_status(401, "unauthorized"),
            CompletionError::Api { status: 401, .. }
        ));
    }

    #[test]
    fn transient_errors_detected() {
        assert!(CompletionError::from_status(429, "").is_transient());
        assert!(CompletionError::from_status(503, "").is_transient());
        assert!(CompletionError::Network("connection reset".into()).is_transient());
    }

    #[test]
    fn permanent_errors_not_transient() {
        assert!(!CompletionError::from_status(400, "bad request").is_transient());
        assert!(!CompletionError::InvalidResponse("garbage".into()).is_transient());
        assert!(!CompletionError::SchemaViolation(vec!["x".into()]).is_transient());
        assert!(!CompletionError::Decode("nope".into()).is_transient());
    }

    #[test]
    fn stage_error_names_the_stage() {
        let err = SummarizeError::at(SummaryStage::Extracting)(CompletionError::Network(
            "timed out".into(),
        ));
        let msg = err.to_string();
        assert!(msg.contains("extracting"), "got: {msg}");
        assert!(msg.contains("timed out"), "got: {msg}");
    }
}
