//! The map-reduce summarization pipeline.
//!
//! ```text
//! Sizing -> Partitioning -> Extracting -> MiniSummarizing
//!        -> FullTextAnalysis -> Reducing -> Synthesizing -> Done
//! ```
//!
//! Extraction and mini-summaries run as two separate map phases over the same
//! batches, each through a bounded pool whose width is fixed when the
//! document is planned: `min(admission ceiling, batch count, max_workers)`.
//! Any failed call aborts the document. Calls already running are allowed to
//! finish; batches not yet started are skipped.

use futures::stream::{self, StreamExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::SummaryStage;
use super::chunking::{ChunkingConfig, Sizing, partition, prefix_chars, rebatch, size_for};
use super::prompts;
use super::reduce::{FactLimits, Outline};
use super::schema::{ExtractionResult, MiniSummary, StructuredSummary};
use crate::Message;
use crate::client::CachingCompletionClient;
use crate::error::SummarizeError;

/// Configuration for [`ChunkedSummarizer`].
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub chunking: ChunkingConfig,
    pub fact_limits: FactLimits,
    /// Upper bound on the worker pool, whatever the admission ceiling says.
    pub max_workers: usize,
    /// Read and write the completion cache.
    pub use_cache: bool,
    pub extraction_max_tokens: u32,
    pub mini_summary_max_tokens: u32,
    pub analysis_max_tokens: u32,
    pub synthesis_max_tokens: u32,
    /// Leading characters sent to the full-text analysis call.
    pub analysis_chars: usize,
    /// Leading characters sent alongside the outline for synthesis.
    pub sample_chars: usize,
    /// Wall-clock limit for one document. `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            fact_limits: FactLimits::default(),
            max_workers: 40,
            use_cache: true,
            extraction_max_tokens: 400,
            mini_summary_max_tokens: 800,
            analysis_max_tokens: 1000,
            synthesis_max_tokens: 1500,
            analysis_chars: 5000,
            sample_chars: 2000,
            deadline: None,
        }
    }
}

impl SummarizerConfig {
    /// Set the preferred chunk size in characters.
    pub fn with_chunk_chars(mut self, chars: usize) -> Self {
        self.chunking.default_chunk_chars = chars;
        self
    }

    /// Enable or disable the completion cache.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Abort a document that takes longer than `limit`.
    pub fn with_deadline(mut self, limit: Duration) -> Self {
        self.deadline = Some(limit);
        self
    }
}

/// How a document will be split and processed.
#[derive(Debug, Clone)]
pub struct WorkPlan {
    pub sizing: Sizing,
    /// Raw chunks before re-batching.
    pub chunk_count: usize,
    /// Units of work sent to the model.
    pub batches: Vec<String>,
    /// Worker pool width for the map phases.
    pub width: usize,
}

impl WorkPlan {
    /// Plan `text` given the current admission ceiling.
    pub fn for_text(text: &str, config: &SummarizerConfig, max_concurrent: u32) -> Self {
        let sizing = size_for(text.chars().count(), &config.chunking);
        let text = match sizing.truncate_to {
            Some(limit) => prefix_chars(text, limit),
            None => text,
        };
        let chunks = partition(text, sizing.chunk_chars);
        let batches = rebatch(&chunks, &config.chunking);
        let width = (max_concurrent as usize)
            .min(batches.len())
            .min(config.max_workers)
            .max(1);
        Self {
            sizing,
            chunk_count: chunks.len(),
            batches,
            width,
        }
    }
}

/// Result of summarizing one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutput {
    #[serde(flatten)]
    pub summary: StructuredSummary,
    /// The reduced outline the summary was synthesized from.
    pub outline: String,
}

/// Summarizes long documents through a [`CachingCompletionClient`].
pub struct ChunkedSummarizer {
    client: Arc<CachingCompletionClient>,
    config: SummarizerConfig,
    stop: Option<Arc<AtomicBool>>,
}

impl ChunkedSummarizer {
    pub fn new(client: Arc<CachingCompletionClient>, config: SummarizerConfig) -> Self {
        Self {
            client,
            config,
            stop: None,
        }
    }

    /// Watch `flag`; once it is set no new calls are started and the current
    /// document ends with [`SummarizeError::Stopped`].
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Plan `text` against the client's current admission ceiling.
    pub fn plan(&self, text: &str) -> WorkPlan {
        WorkPlan::for_text(text, &self.config, self.client.admission().max_concurrent())
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn check_stop(&self) -> Result<(), SummarizeError> {
        if self.stop_requested() {
            Err(SummarizeError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Summarize one document.
    pub async fn summarize(&self, text: &str) -> Result<SummaryOutput, SummarizeError> {
        match self.config.deadline {
            Some(limit) => tokio::time::timeout(limit, self.run(text))
                .await
                .map_err(|_| {
                    warn!("Summarization exceeded its {limit:?} deadline");
                    SummarizeError::DeadlineExceeded(limit)
                })?,
            None => self.run(text).await,
        }
    }

    async fn run(&self, text: &str) -> Result<SummaryOutput, SummarizeError> {
        let use_cache = self.config.use_cache;

        debug!("Stage: {}", SummaryStage::Sizing);
        let plan = self.plan(text);
        let sizing = plan.sizing;
        match sizing.truncate_to {
            Some(limit) => warn!(
                "Extremely large document ({} chars, ~{} tokens), keeping the first {limit} chars",
                text.chars().count(),
                sizing.estimated_tokens
            ),
            None if sizing.estimated_tokens > self.config.chunking.large_token_threshold => warn!(
                "Very large document ({} chars, ~{} tokens)",
                text.chars().count(),
                sizing.estimated_tokens
            ),
            None => {}
        }

        debug!("Stage: {}", SummaryStage::Partitioning);
        info!(
            "Processing {} batches ({} chunks of {} chars) with {} workers",
            plan.batches.len(),
            plan.chunk_count,
            sizing.chunk_chars,
            plan.width
        );

        let extractions: Vec<ExtractionResult> = self
            .map_batches(
                SummaryStage::Extracting,
                &plan,
                self.config.extraction_max_tokens,
                prompts::extract,
            )
            .await?;

        let mut summaries: Vec<MiniSummary> = self
            .map_batches(
                SummaryStage::MiniSummarizing,
                &plan,
                self.config.mini_summary_max_tokens,
                prompts::mini_summary,
            )
            .await?;

        debug!("Stage: {}", SummaryStage::FullTextAnalysis);
        self.check_stop()?;
        let analysis: MiniSummary = self
            .client
            .complete_structured(
                &prompts::deep_analysis(prefix_chars(text, self.config.analysis_chars)),
                self.config.analysis_max_tokens,
                use_cache,
            )
            .await
            .map_err(SummarizeError::at(SummaryStage::FullTextAnalysis))?;
        summaries.push(analysis);

        debug!("Stage: {}", SummaryStage::Reducing);
        let outline = Outline::build(&summaries, &extractions, self.config.fact_limits);
        debug!(
            "Outline: {} sections, {} entities, {} figures, {} action items",
            outline.sections.len(),
            outline.facts.entities.len(),
            outline.facts.numbers.len(),
            outline.facts.todos.len()
        );
        let outline = outline.render();

        debug!("Stage: {}", SummaryStage::Synthesizing);
        self.check_stop()?;
        let summary: StructuredSummary = self
            .client
            .complete_structured(
                &prompts::synthesis(&outline, prefix_chars(text, self.config.sample_chars)),
                self.config.synthesis_max_tokens,
                use_cache,
            )
            .await
            .map_err(SummarizeError::at(SummaryStage::Synthesizing))?;

        debug!("Stage: {}", SummaryStage::Done);
        Ok(SummaryOutput { summary, outline })
    }

    /// Run one structured call per batch through a pool of `plan.width`.
    ///
    /// Results come back in batch order. After the first failure (or a stop
    /// request) batches that have not started yet are skipped.
    async fn map_batches<T>(
        &self,
        stage: SummaryStage,
        plan: &WorkPlan,
        max_tokens: u32,
        prompt: fn(&str) -> Vec<Message>,
    ) -> Result<Vec<T>, SummarizeError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        debug!("Stage: {stage}");
        self.check_stop()?;

        let failed = &AtomicBool::new(false);
        let use_cache = self.config.use_cache;
        let results: Vec<Result<T, SummarizeError>> =
            stream::iter(plan.batches.iter().enumerate())
                .map(move |(index, batch)| async move {
                    if failed.load(Ordering::Relaxed) || self.stop_requested() {
                        return Err(SummarizeError::Stopped);
                    }
                    let messages = prompt(batch);
                    self.client
                        .complete_structured::<T>(&messages, max_tokens, use_cache)
                        .await
                        .map_err(|e| {
                            failed.store(true, Ordering::Relaxed);
                            warn!("{stage} failed on batch {}: {e}", index + 1);
                            SummarizeError::at(stage)(e)
                        })
                })
                .buffered(plan.width)
                .collect()
                .await;

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::CHUNK_SEPARATOR;

    #[test]
    fn plan_for_quarter_million_chars() {
        let text = "a".repeat(250_000);
        let plan = WorkPlan::for_text(&text, &SummarizerConfig::default(), 20);
        assert_eq!(plan.sizing.chunk_chars, 3000);
        assert_eq!(plan.chunk_count, 84);
        assert_eq!(plan.batches.len(), 28);
        assert_eq!(plan.width, 20);
    }

    #[test]
    fn plan_width_bounded_by_batches_and_pool_cap() {
        let config = SummarizerConfig::default();
        let small = WorkPlan::for_text(&"b".repeat(5_000), &config, 20);
        assert_eq!(small.batches.len(), 5);
        assert_eq!(small.width, 5);

        let capped = WorkPlan::for_text(&"c".repeat(250_000), &config, 50);
        assert_eq!(capped.width, 28);

        let config = SummarizerConfig {
            max_workers: 4,
            ..SummarizerConfig::default()
        };
        assert_eq!(WorkPlan::for_text(&"d".repeat(250_000), &config, 50).width, 4);
    }

    #[test]
    fn plan_truncates_huge_documents() {
        let text = "e".repeat(2_100_000);
        let plan = WorkPlan::for_text(&text, &SummarizerConfig::default(), 20);
        assert_eq!(plan.sizing.truncate_to, Some(100_000));
        assert_eq!(plan.chunk_count, 200);
        assert_eq!(plan.batches.len(), 25);
        assert_eq!(plan.batches[0].matches(CHUNK_SEPARATOR).count(), 7);
    }

    #[test]
    fn plan_of_empty_text_has_no_batches() {
        let plan = WorkPlan::for_text("", &SummarizerConfig::default(), 20);
        assert!(plan.batches.is_empty());
        assert_eq!(plan.width, 1);
    }

    #[test]
    fn output_serializes_flat() {
        let output = SummaryOutput {
            summary: StructuredSummary {
                summary: "Short.".into(),
                tags: vec!["planning".into()],
                ..Default::default()
            },
            outline: "### Purpose\nPlan".into(),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["summary"], "Short.");
        assert_eq!(json["tags"][0], "planning");
        assert_eq!(json["outline"], "### Purpose\nPlan");
    }
}
