//! Summarize every document under a directory into structured JSON.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Other
//! defaults come from the environment (see [`GistConfig`]) and can be
//! overridden by flags.
//!
//! # Examples
//!
//! ```sh
//! # Summarize a folder of meeting minutes
//! gist --input minutes/ --output summaries/
//!
//! # Preview chunking and batching without calling the API
//! gist --input minutes/ --dry-run
//!
//! # Push the quota harder and cap each document at ten minutes
//! gist --input minutes/ --aggressive --timeout-secs 600
//!
//! # Drop cached responses older than a week, then exit
//! gist --cleanup-cache 7
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use gist_rs::prelude::*;
use gist_rs::source::{discover, document_key};
use gist_rs::summarize::WorkPlan;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Print API statistics after this many documents.
const STATUS_EVERY: usize = 5;

/// Summarize long documents with a rate-limited, cached LLM pipeline.
#[derive(Parser)]
#[command(name = "gist")]
struct Cli {
    // ── Input / output ─────────────────────────────────────────
    /// File or directory of documents to summarize
    #[arg(long)]
    input: Option<PathBuf>,

    /// Directory that receives `<name>.summary.json` files
    #[arg(long, default_value = "summaries")]
    output: PathBuf,

    /// Re-summarize documents already recorded as processed
    #[arg(long)]
    overwrite: bool,

    /// Forget all processed records before starting
    #[arg(long)]
    clean: bool,

    /// Plan each document and exit without calling the API
    #[arg(long)]
    dry_run: bool,

    // ── Cache ──────────────────────────────────────────────────
    /// Bypass the completion cache for reads and writes
    #[arg(long)]
    nocache: bool,

    /// Delete cache entries older than DAYS
    #[arg(long, value_name = "DAYS")]
    cleanup_cache: Option<u64>,

    // ── Rate limiting ──────────────────────────────────────────
    /// Use the full configured quota and start at the concurrency cap
    #[arg(long)]
    aggressive: bool,

    /// Requests per minute (overrides RATE_LIMIT_RPM)
    #[arg(long)]
    rate_limit_rpm: Option<u64>,

    /// Tokens per minute (overrides RATE_LIMIT_TPM)
    #[arg(long)]
    rate_limit_tpm: Option<u64>,

    // ── Summarization ──────────────────────────────────────────
    /// Preferred chunk size in characters (overrides CHUNK_CHARS)
    #[arg(long)]
    chunk_chars: Option<usize>,

    /// Model to use (overrides GIST_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Give up on a single document after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> GistConfig {
        let mut config = GistConfig::from_env();
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(chars) = self.chunk_chars {
            config.chunk_chars = chars;
        }
        if let Some(rpm) = self.rate_limit_rpm {
            config.requests_per_minute = rpm;
        }
        if let Some(tpm) = self.rate_limit_tpm {
            config.tokens_per_minute = tpm;
        }
        config
    }

    fn rate_mode(&self) -> RateLimitMode {
        if self.aggressive {
            RateLimitMode::Aggressive
        } else {
            RateLimitMode::Conservative
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// `<output>/<relative dir>/<stem>.summary.json` for a document under `root`.
fn summary_path(output: &Path, root: &Path, document: &Path) -> PathBuf {
    let relative = document.strip_prefix(root).unwrap_or(document);
    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let dir = match relative.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => output.join(parent),
        _ => output.to_path_buf(),
    };
    dir.join(format!("{stem}.summary.json"))
}

/// Maximum cache entry age for `--cleanup-cache DAYS`, saturating on overflow.
fn cleanup_age(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

fn write_summary(path: &Path, output: &SummaryOutput) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| format!("Failed to serialize summary: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("Failed to write {}: {e}", path.display()))
}

/// Set `flag` on the first Ctrl-C so the current document winds down.
fn spawn_interrupt_watcher(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight calls");
            flag.store(true, Ordering::Relaxed);
        }
    });
}

fn dry_run(
    documents: &[PathBuf],
    extractor: &dyn TextExtractor,
    config: &SummarizerConfig,
    max_concurrent: u32,
) {
    for path in documents {
        match extractor.extract(path) {
            Ok(text) => {
                let plan = WorkPlan::for_text(&text, config, max_concurrent);
                info!(
                    "{}: {} chars, ~{} tokens, {} chunks of {} chars, {} batches, {} workers{}",
                    path.display(),
                    text.chars().count(),
                    plan.sizing.estimated_tokens,
                    plan.chunk_count,
                    plan.sizing.chunk_chars,
                    plan.batches.len(),
                    plan.width,
                    plan.sizing
                        .truncate_to
                        .map(|n| format!(", truncated to {n} chars"))
                        .unwrap_or_default(),
                );
            }
            Err(e) => warn!("{e}"),
        }
    }
}

// ── Run ────────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<(), String> {
    let config = cli.config();

    let cache = CompletionCache::new(&config.cache_dir)
        .map_err(|e| format!("Failed to open cache {}: {e}", config.cache_dir.display()))?;

    if let Some(days) = cli.cleanup_cache {
        let removed = cache.remove_older_than(cleanup_age(days))?;
        info!("Removed {removed} cache entries older than {days} days");
        if cli.input.is_none() {
            return Ok(());
        }
    }

    let input = cli
        .input
        .clone()
        .ok_or_else(|| "provide --input (or --cleanup-cache alone)".to_string())?;
    let root = if input.is_dir() {
        input.clone()
    } else {
        input.parent().map(Path::to_path_buf).unwrap_or_default()
    };

    let extractor = PlainTextExtractor::default();
    let documents = discover(&input, &extractor)?;
    info!("Found {} documents under {}", documents.len(), input.display());

    let admission = Arc::new(AdmissionController::new(config.admission_config()));
    config.apply_rate_mode(cli.rate_mode(), &admission);

    let mut summarizer_config = config.summarizer_config().with_cache(!cli.nocache);
    if let Some(secs) = cli.timeout_secs {
        summarizer_config = summarizer_config.with_deadline(Duration::from_secs(secs));
    }

    if cli.dry_run {
        dry_run(
            &documents,
            &extractor,
            &summarizer_config,
            admission.max_concurrent(),
        );
        return Ok(());
    }

    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| "OPENROUTER_KEY environment variable is not set".to_string())?;
    let backend = OpenRouterClient::new(api_key, &config.model)?.with_url(&config.api_url);
    info!(
        "Using {} ({}/{} rpm/tpm, {} concurrent to start)",
        backend.model(),
        admission.snapshot().requests_per_minute,
        admission.snapshot().tokens_per_minute,
        admission.max_concurrent()
    );

    let metrics = Arc::new(CallMetrics::new());
    let client = Arc::new(CachingCompletionClient::new(
        Arc::new(backend),
        admission.clone(),
        metrics.clone(),
        cache,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    spawn_interrupt_watcher(stop.clone());
    let summarizer =
        ChunkedSummarizer::new(client.clone(), summarizer_config).with_stop_flag(stop.clone());

    let mut records = ProcessedRecords::open(cli.output.join("processed.json"));
    if cli.clean {
        records.clear()?;
        info!("Cleared processed records");
    }

    let mut handled = 0usize;
    for path in &documents {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let key = document_key(&root, path);
        if !cli.overwrite && records.is_processed(&key) {
            debug!("Skipping {key}: already processed");
            continue;
        }

        let text = match extractor.extract(path) {
            Ok(text) => text,
            Err(e) => {
                error!("{e}");
                records.mark(&key, ProcessedStatus::Error)?;
                continue;
            }
        };
        if text.is_empty() {
            warn!("{key}: no text extracted");
            records.mark(&key, ProcessedStatus::Empty)?;
            continue;
        }

        info!("Summarizing {key}");
        match summarizer.summarize(&text).await {
            Ok(output) => {
                let target = summary_path(&cli.output, &root, path);
                match write_summary(&target, &output) {
                    Ok(()) => {
                        info!("Wrote {}", target.display());
                        records.mark(&key, ProcessedStatus::Success)?;
                    }
                    Err(e) => {
                        error!("{e}");
                        records.mark(&key, ProcessedStatus::Error)?;
                    }
                }
            }
            Err(SummarizeError::Stopped) => {
                info!("Stopped before finishing {key}");
                break;
            }
            Err(e) => {
                error!("{key}: {e}");
                records.mark(&key, ProcessedStatus::Error)?;
            }
        }

        handled += 1;
        if handled.is_multiple_of(STATUS_EVERY) {
            metrics.log_status(Some(&admission));
        }
    }

    metrics.log_status(Some(&admission));
    info!(
        "Done: {handled} documents, cache hit rate {:.1}%",
        client.cache().hit_rate() * 100.0
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_path_mirrors_input_layout() {
        let path = summary_path(
            Path::new("out"),
            Path::new("in"),
            Path::new("in/2024/q1/board.txt"),
        );
        assert_eq!(path, PathBuf::from("out/2024/q1/board.summary.json"));
    }

    #[test]
    fn summary_path_for_top_level_document() {
        let path = summary_path(Path::new("out"), Path::new("in"), Path::new("in/notes.md"));
        assert_eq!(path, PathBuf::from("out/notes.summary.json"));
    }

    #[test]
    fn cleanup_age_saturates_for_huge_day_counts() {
        assert_eq!(cleanup_age(7), Duration::from_secs(7 * 86_400));
        assert_eq!(cleanup_age(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn flags_override_environment() {
        let cli = Cli::parse_from([
            "gist",
            "--input",
            "docs",
            "--chunk-chars",
            "1200",
            "--rate-limit-rpm",
            "900",
            "--aggressive",
        ]);
        let config = cli.config();
        assert_eq!(config.chunk_chars, 1200);
        assert_eq!(config.requests_per_minute, 900);
        assert_eq!(cli.rate_mode(), RateLimitMode::Aggressive);
    }
}
