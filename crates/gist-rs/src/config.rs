//! Runtime configuration with environment overrides.
//!
//! [`GistConfig`] captures the settings a summarization run needs and
//! converts them into library types via
//! [`admission_config`](GistConfig::admission_config) and
//! [`summarizer_config`](GistConfig::summarizer_config).

use std::path::PathBuf;

use crate::admission::{AdmissionConfig, AdmissionController};
use crate::summarize::SummarizerConfig;
use crate::{DEFAULT_MODEL, OPENROUTER_URL};

/// Conservative mode never exceeds these, whatever is configured.
pub const CONSERVATIVE_MAX_RPM: u64 = 3000;
pub const CONSERVATIVE_MAX_TPM: u64 = 150_000;
/// Concurrency ceiling applied up front in aggressive mode.
pub const AGGRESSIVE_MAX_CONCURRENT: u32 = 50;

/// How hard to push the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitMode {
    /// Configured quota, concurrency ceiling raised to the cap immediately.
    Aggressive,
    /// Quota clamped to conservative limits, ceiling left to the governor.
    Conservative,
}

/// Settings for a summarization run.
#[derive(Debug, Clone)]
pub struct GistConfig {
    /// API key. Env: `OPENROUTER_KEY`.
    pub api_key: Option<String>,
    /// Model identifier. Env: `GIST_MODEL`.
    pub model: String,
    /// Chat completions endpoint. Env: `GIST_API_URL`.
    pub api_url: String,
    /// Completion cache directory. Env: `CACHE_DIR`. Default: `./.cache`.
    pub cache_dir: PathBuf,
    /// Preferred chunk size in characters. Env: `CHUNK_CHARS`. Default: `3000`.
    pub chunk_chars: usize,
    /// Initial concurrency ceiling. Env: `OPENAI_MAX_PARALLEL`. Default: `20`.
    pub max_parallel: u32,
    /// Env: `RATE_LIMIT_RPM`. Default: `5000`.
    pub requests_per_minute: u64,
    /// Env: `RATE_LIMIT_TPM`. Default: `200000`.
    pub tokens_per_minute: u64,
}

impl Default for GistConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_url: OPENROUTER_URL.to_string(),
            cache_dir: PathBuf::from("./.cache"),
            chunk_chars: 3000,
            max_parallel: 20,
            requests_per_minute: 5000,
            tokens_per_minute: 200_000,
        }
    }
}

impl GistConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`. Unparseable numbers keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        let default = Self::default();
        Self {
            api_key: lookup("OPENROUTER_KEY").filter(|k| !k.is_empty()),
            model: lookup("GIST_MODEL").unwrap_or(default.model),
            api_url: lookup("GIST_API_URL").unwrap_or(default.api_url),
            cache_dir: lookup("CACHE_DIR").map(PathBuf::from).unwrap_or(default.cache_dir),
            chunk_chars: parsed(&lookup, "CHUNK_CHARS").unwrap_or(default.chunk_chars),
            max_parallel: parsed(&lookup, "OPENAI_MAX_PARALLEL").unwrap_or(default.max_parallel),
            requests_per_minute: parsed(&lookup, "RATE_LIMIT_RPM")
                .unwrap_or(default.requests_per_minute),
            tokens_per_minute: parsed(&lookup, "RATE_LIMIT_TPM")
                .unwrap_or(default.tokens_per_minute),
        }
    }

    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig::default()
            .with_limits(self.requests_per_minute, self.tokens_per_minute)
            .with_initial_max_concurrent(self.max_parallel)
    }

    pub fn summarizer_config(&self) -> SummarizerConfig {
        SummarizerConfig::default().with_chunk_chars(self.chunk_chars)
    }

    /// Apply `mode` to `admission` using this config's quota.
    pub fn apply_rate_mode(&self, mode: RateLimitMode, admission: &AdmissionController) {
        match mode {
            RateLimitMode::Aggressive => admission.configure(
                self.requests_per_minute,
                self.tokens_per_minute,
                Some(AGGRESSIVE_MAX_CONCURRENT),
            ),
            RateLimitMode::Conservative => admission.configure(
                self.requests_per_minute.min(CONSERVATIVE_MAX_RPM),
                self.tokens_per_minute.min(CONSERVATIVE_MAX_TPM),
                None,
            ),
        }
    }
}
