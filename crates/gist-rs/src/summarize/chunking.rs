//! Chunk sizing, partitioning and re-batching.
//!
//! Sizes are measured in characters (Unicode scalar values), never bytes, so
//! chunk boundaries always fall on valid UTF-8 boundaries.

/// Marker placed between chunks merged into one batch.
pub const CHUNK_SEPARATOR: &str = "\n\n---CHUNK_SEPARATOR---\n\n";

/// Thresholds and sizes that drive partitioning.
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Preferred chunk size in characters.
    pub default_chunk_chars: usize,
    /// Smallest adaptive chunk size for ordinary documents.
    pub min_chunk_chars: usize,
    /// Above this many estimated tokens a document is "large".
    pub large_token_threshold: usize,
    /// Chunk size ceiling for large documents.
    pub large_chunk_cap: usize,
    /// Above this many estimated tokens a document is truncated.
    pub huge_token_threshold: usize,
    /// Characters kept from a truncated document.
    pub huge_truncate_chars: usize,
    /// Chunk size for truncated documents.
    pub huge_chunk_chars: usize,
    /// Re-batch when the chunk count exceeds this.
    pub rebatch_threshold: usize,
    /// Approximate number of batches after re-batching.
    pub rebatch_target: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            default_chunk_chars: 3000,
            min_chunk_chars: 1000,
            large_token_threshold: 100_000,
            large_chunk_cap: 500,
            huge_token_threshold: 500_000,
            huge_truncate_chars: 100_000,
            huge_chunk_chars: 500,
            rebatch_threshold: 50,
            rebatch_target: 25,
        }
    }
}

/// Outcome of the sizing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizing {
    /// Characters per chunk (always at least 1).
    pub chunk_chars: usize,
    /// When set, only this many leading characters are processed.
    pub truncate_to: Option<usize>,
    /// Estimated token count of the full document (`chars / 4`).
    pub estimated_tokens: usize,
}

/// Choose the chunk size for a document of `char_count` characters.
///
/// - More than `huge_token_threshold` estimated tokens: truncate to
///   `huge_truncate_chars` and use `huge_chunk_chars`.
/// - More than `large_token_threshold`: `min(large_chunk_cap, default / 4)`.
/// - Otherwise: `min(default, max(min_chunk_chars, chars / 20))`.
pub fn size_for(char_count: usize, config: &ChunkingConfig) -> Sizing {
    let estimated_tokens = char_count / 4;
    let (chunk_chars, truncate_to) = if estimated_tokens > config.huge_token_threshold {
        (config.huge_chunk_chars, Some(config.huge_truncate_chars))
    } else if estimated_tokens > config.large_token_threshold {
        (
            config.large_chunk_cap.min(config.default_chunk_chars / 4),
            None,
        )
    } else {
        (
            config
                .default_chunk_chars
                .min(config.min_chunk_chars.max(char_count / 20)),
            None,
        )
    };
    Sizing {
        chunk_chars: chunk_chars.max(1),
        truncate_to,
        estimated_tokens,
    }
}

/// A contiguous slice of the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Character offset of the first character in the source text.
    pub offset: usize,
    pub text: String,
}

/// The first `n` characters of `text`.
pub fn prefix_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((byte_idx, _)) => text.get(..byte_idx).unwrap_or(text),
        None => text,
    }
}

/// Split `text` into consecutive, non-overlapping chunks of `chunk_chars`
/// characters (the last one may be shorter). Concatenating the chunks in
/// order reproduces `text` exactly.
pub fn partition(text: &str, chunk_chars: usize) -> Vec<Chunk> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut start_byte = 0;
    let mut start_char = 0;

    for (count, (byte_idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % chunk_chars == 0 {
            chunks.push(Chunk {
                offset: start_char,
                text: text.get(start_byte..byte_idx).unwrap_or_default().to_string(),
            });
            start_byte = byte_idx;
            start_char = count;
        }
    }
    if start_byte < text.len() {
        chunks.push(Chunk {
            offset: start_char,
            text: text.get(start_byte..).unwrap_or_default().to_string(),
        });
    }
    chunks
}

/// Group chunks into the units sent to the model.
///
/// At or below `rebatch_threshold` chunks, every chunk is its own batch.
/// Above it, runs of `count / rebatch_target` consecutive chunks are joined
/// with [`CHUNK_SEPARATOR`].
pub fn rebatch(chunks: &[Chunk], config: &ChunkingConfig) -> Vec<String> {
    if chunks.len() <= config.rebatch_threshold {
        return chunks.iter().map(|c| c.text.clone()).collect();
    }
    let batch_size = (chunks.len() / config.rebatch_target.max(1)).max(1);
    chunks
        .chunks(batch_size)
        .map(|group| {
            group
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(CHUNK_SEPARATOR)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_document_uses_floor() {
        let sizing = size_for(5_000, &ChunkingConfig::default());
        assert_eq!(sizing.chunk_chars, 1000);
        assert_eq!(sizing.truncate_to, None);
    }

    #[test]
    fn medium_document_uses_twentieth() {
        let sizing = size_for(40_000, &ChunkingConfig::default());
        assert_eq!(sizing.chunk_chars, 2000);
    }

    #[test]
    fn ordinary_document_capped_at_default() {
        let sizing = size_for(250_000, &ChunkingConfig::default());
        assert_eq!(sizing.chunk_chars, 3000);
        assert_eq!(sizing.estimated_tokens, 62_500);
    }

    #[test]
    fn large_document_uses_small_chunks() {
        let sizing = size_for(1_000_000, &ChunkingConfig::default());
        assert_eq!(sizing.chunk_chars, 500);
        assert_eq!(sizing.truncate_to, None);

        let config = ChunkingConfig {
            default_chunk_chars: 1200,
            ..Default::default()
        };
        assert_eq!(size_for(1_000_000, &config).chunk_chars, 300);
    }

    #[test]
    fn huge_document_is_truncated() {
        let sizing = size_for(2_400_000, &ChunkingConfig::default());
        assert_eq!(sizing.chunk_chars, 500);
        assert_eq!(sizing.truncate_to, Some(100_000));
    }

    #[test]
    fn tiny_default_never_yields_zero() {
        let config = ChunkingConfig {
            default_chunk_chars: 0,
            ..Default::default()
        };
        assert_eq!(size_for(10, &config).chunk_chars, 1);
    }

    #[test]
    fn partition_reconstructs_text() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(37);
        for size in [1, 7, 100, 5000] {
            let chunks = partition(&text, size);
            let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(rebuilt, text, "chunk size {size}");
        }
    }

    #[test]
    fn partition_respects_multibyte_characters() {
        let text = "会議の議事録です。決定事項を確認します。";
        let chunks = partition(text, 4);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 4));
        assert_eq!(chunks[1].offset, 4);
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn partition_of_empty_text_is_empty() {
        assert!(partition("", 10).is_empty());
    }

    #[test]
    fn prefix_chars_counts_characters() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("abc", 10), "abc");
        assert_eq!(prefix_chars("abc", 0), "");
    }

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                offset: i,
                text: format!("c{i}"),
            })
            .collect()
    }

    #[test]
    fn few_chunks_are_not_rebatched() {
        let batches = rebatch(&chunks(10), &ChunkingConfig::default());
        assert_eq!(batches.len(), 10);
        assert!(batches.iter().all(|b| !b.contains(CHUNK_SEPARATOR)));
    }

    #[test]
    fn many_chunks_are_rebatched_to_about_target() {
        let batches = rebatch(&chunks(60), &ChunkingConfig::default());
        assert_eq!(batches.len(), 30);
        assert_eq!(batches[0], format!("c0{CHUNK_SEPARATOR}c1"));
        assert!((20..=30).contains(&batches.len()));
    }

    #[test]
    fn two_hundred_fifty_thousand_chars() {
        let config = ChunkingConfig::default();
        let text = "x".repeat(250_000);
        let sizing = size_for(text.chars().count(), &config);
        let parts = partition(&text, sizing.chunk_chars);
        assert_eq!(parts.len(), 84);

        let batches = rebatch(&parts, &config);
        assert_eq!(batches.len(), 28);
        assert_eq!(batches[0].matches(CHUNK_SEPARATOR).count(), 2);
    }
}
