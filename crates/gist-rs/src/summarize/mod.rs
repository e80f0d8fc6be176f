//! Chunked map-reduce summarization of long documents.
//!
//! A document moves through a fixed sequence of [`SummaryStage`]s:
//!
//! - [`chunking`]: choose a chunk size, split the text into contiguous
//!   slices and re-batch when there are too many of them.
//! - [`pipeline`]: fan extraction and mini-summary calls out over a bounded
//!   worker pool, analyse the opening of the document, then synthesize.
//! - [`reduce`]: merge mini-summary sections by title and deduplicate the
//!   extracted facts into an outline.
//! - [`prompts`]: the instructions sent for each stage.
//! - [`schema`]: the structured response types requested from the model.

pub mod chunking;
pub mod pipeline;
pub mod prompts;
pub mod reduce;
pub mod schema;

pub use chunking::{CHUNK_SEPARATOR, Chunk, ChunkingConfig, Sizing};
pub use pipeline::{ChunkedSummarizer, SummarizerConfig, SummaryOutput, WorkPlan};
pub use reduce::{ExtractedFacts, FactLimits, Outline, SectionBucket};
pub use schema::{ExtractionResult, MiniSection, MiniSummary, StructuredSummary};

/// Phase of a single document's summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryStage {
    Sizing,
    Partitioning,
    Extracting,
    MiniSummarizing,
    FullTextAnalysis,
    Reducing,
    Synthesizing,
    Done,
}

impl std::fmt::Display for SummaryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SummaryStage::Sizing => "sizing",
            SummaryStage::Partitioning => "partitioning",
            SummaryStage::Extracting => "extracting",
            SummaryStage::MiniSummarizing => "mini-summarizing",
            SummaryStage::FullTextAnalysis => "full-text analysis",
            SummaryStage::Reducing => "reducing",
            SummaryStage::Synthesizing => "synthesizing",
            SummaryStage::Done => "done",
        };
        f.write_str(name)
    }
}
