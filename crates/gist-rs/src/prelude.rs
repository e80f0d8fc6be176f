//! Convenience re-exports for common `gist-rs` types.
//!
//! ```ignore
//! use gist_rs::prelude::*;
//! ```
//!
//! Covers wiring a client and running the summarizer. Chunking helpers,
//! reduction internals and fingerprinting live in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{
    DEFAULT_MODEL, Message, OpenRouterClient, ResponseSchema, json_schema_for,
};

// ── Call orchestration ──────────────────────────────────────────────
pub use crate::admission::{AdmissionConfig, AdmissionController};
pub use crate::api::{CompletionBackend, CompletionFuture, RetryConfig};
pub use crate::cache::CompletionCache;
pub use crate::client::CachingCompletionClient;
pub use crate::config::{GistConfig, RateLimitMode};
pub use crate::error::{CompletionError, SummarizeError};
pub use crate::metrics::CallMetrics;

// ── Summarization ───────────────────────────────────────────────────
pub use crate::summarize::{
    ChunkedSummarizer, StructuredSummary, SummarizerConfig, SummaryOutput, SummaryStage,
};

// ── Batch runs ──────────────────────────────────────────────────────
pub use crate::records::{ProcessedRecords, ProcessedStatus};
pub use crate::source::{PlainTextExtractor, TextExtractor};
