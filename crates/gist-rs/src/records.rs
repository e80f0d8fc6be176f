//! Bookkeeping of documents a batch run has already handled.
//!
//! A single JSON file maps a document key to its last status and when it was
//! recorded. Every mutation is written through immediately (atomic
//! write-then-rename), so an interrupted run resumes where it stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Outcome recorded for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessedStatus {
    /// A summary was written.
    Success,
    /// Extraction produced no text.
    Empty,
    /// Extraction or summarization failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    pub status: ProcessedStatus,
    pub timestamp: DateTime<Utc>,
}

/// JSON-file-backed key -> status store.
#[derive(Debug)]
pub struct ProcessedRecords {
    path: PathBuf,
    entries: BTreeMap<String, ProcessedEntry>,
}

impl ProcessedRecords {
    /// Load the store at `path`. A missing file is an empty store; an
    /// unreadable one is logged and treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
            {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to load processed records {}: {e}", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `key` has any recorded status.
    pub fn is_processed(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ProcessedEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record `status` for `key` and persist.
    pub fn mark(&mut self, key: impl Into<String>, status: ProcessedStatus) -> Result<(), String> {
        self.entries.insert(
            key.into(),
            ProcessedEntry {
                status,
                timestamp: Utc::now(),
            },
        );
        self.save()
    }

    /// Forget every record and persist.
    pub fn clear(&mut self) -> Result<(), String> {
        self.entries.clear();
        self.save()
    }

    fn save(&self) -> Result<(), String> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create records dir: {e}"))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| format!("Failed to serialize records: {e}"))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| format!("Failed to write records: {e}"))?;
        std::fs::rename(&tmp_path, &self.path)
            .map_err(|e| format!("Failed to rename records: {e}"))?;
        Ok(())
    }
}
