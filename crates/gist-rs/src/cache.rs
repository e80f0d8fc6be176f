//! Content-addressed response cache on disk.
//!
//! Each response is stored as `<fingerprint>.json` holding the payload and
//! its creation time. The fingerprint is a SHA-256 over the canonical JSON
//! of the message sequence plus the expected response shape, so a plain-text
//! completion and a structured completion over the same messages never
//! collide.
//!
//! Entries are immutable once written. Concurrent writers of the same
//! fingerprint race with last-writer-wins semantics; every writer produces
//! a complete file via write-then-rename. Unreadable or undecodable entries
//! are reported as misses, never as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::Message;

/// Expected shape of a response, folded into its fingerprint.
#[derive(Debug, Clone, Copy)]
pub enum ResponseShape<'a> {
    /// Free-form text.
    Text,
    /// JSON conforming to the given schema.
    Structured(&'a serde_json::Value),
}

/// SHA-256 hex fingerprint of a message sequence and response shape.
///
/// Message order matters. Object keys are serialized in sorted order, so
/// two schemas that differ only in key order map to the same fingerprint.
pub fn fingerprint(messages: &[Message], shape: ResponseShape<'_>) -> String {
    let shape = match shape {
        ResponseShape::Text => serde_json::Value::String("text".into()),
        ResponseShape::Structured(schema) => schema.clone(),
    };
    let canonical = canonicalize(&serde_json::json!({
        "messages": messages,
        "shape": shape,
    }));

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rebuild `value` with every object's keys inserted in sorted order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// One cached response as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Directory of cached completion responses.
#[derive(Debug)]
pub struct CompletionCache {
    dir: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompletionCache {
    /// Open (and create if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    /// Look up a payload. Missing, unreadable and corrupt entries are misses.
    pub fn get(&self, fingerprint: &str) -> Option<serde_json::Value> {
        self.get_if(fingerprint, |_| true)
    }

    /// Like [`get`](Self::get), but a payload rejected by `accept` is also a
    /// miss.
    pub fn get_if(
        &self,
        fingerprint: &str,
        accept: impl FnOnce(&serde_json::Value) -> bool,
    ) -> Option<serde_json::Value> {
        let path = self.entry_path(fingerprint);
        let entry = std::fs::read_to_string(&path)
            .ok()
            .and_then(|json| match serde_json::from_str::<CacheEntry>(&json) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!("Ignoring corrupt cache entry {}: {e}", path.display());
                    None
                }
            });

        match entry.filter(|entry| accept(&entry.payload)) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.payload)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a payload under `fingerprint`, replacing any previous entry.
    pub fn put(&self, fingerprint: &str, payload: &serde_json::Value) -> Result<(), String> {
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            payload: payload.clone(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| format!("Failed to serialize cache entry: {e}"))?;

        // Unique temp name so concurrent writers never share a partial file.
        let tmp_path = self.dir.join(format!(
            ".{fingerprint}.{:016x}.tmp",
            rand::random::<u64>()
        ));
        std::fs::write(&tmp_path, json)
            .map_err(|e| format!("Failed to write cache entry: {e}"))?;
        std::fs::rename(&tmp_path, self.entry_path(fingerprint))
            .map_err(|e| format!("Failed to rename cache entry: {e}"))?;
        Ok(())
    }

    /// Delete cached entries last modified more than `max_age` ago.
    ///
    /// Returns the number of entries removed.
    pub fn remove_older_than(&self, max_age: Duration) -> Result<usize, String> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| format!("Failed to read cache dir {}: {e}", self.dir.display()))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove cache entry {}: {e}", path.display()),
                }
            }
        }
        debug!("Removed {removed} cache entries older than {max_age:?}");
        Ok(removed)
    }

    /// Number of lookups that returned a payload.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that found nothing usable.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate as a fraction (0.0-1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn messages(text: &str) -> Vec<Message> {
        vec![Message::system("You extract facts."), Message::user(text)]
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = fingerprint(&messages("hello"), ResponseShape::Text);
        let b = fingerprint(&messages("hello"), ResponseShape::Text);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_separates_content_order_and_shape() {
        let base = fingerprint(&messages("hello"), ResponseShape::Text);
        assert_ne!(base, fingerprint(&messages("hello!"), ResponseShape::Text));

        let mut reversed = messages("hello");
        reversed.reverse();
        assert_ne!(base, fingerprint(&reversed, ResponseShape::Text));

        let schema = json!({"type": "object"});
        assert_ne!(
            base,
            fingerprint(&messages("hello"), ResponseShape::Structured(&schema))
        );
    }

    #[test]
    fn fingerprint_ignores_schema_key_order() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"type":"object","required":["a"]}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"required":["a"],"type":"object"}"#).unwrap();
        assert_eq!(
            fingerprint(&messages("x"), ResponseShape::Structured(&a)),
            fingerprint(&messages("x"), ResponseShape::Structured(&b)),
        );
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompletionCache::new(dir.path()).unwrap();
        let fp = fingerprint(&messages("hello"), ResponseShape::Text);

        assert!(cache.get(&fp).is_none());
        cache.put(&fp, &json!("a summary")).unwrap();
        assert_eq!(cache.get(&fp), Some(json!("a summary")));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
        assert!((cache.hit_rate() - 0.5).abs() < 1e-9);

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1, "temp files must not linger");
    }

    #[test]
    fn stored_entry_carries_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompletionCache::new(dir.path()).unwrap();
        cache.put("abc", &json!({"k": 1})).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("abc.json")).unwrap();
        let entry: CacheEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(entry.fingerprint, "abc");
        assert_eq!(entry.payload, json!({"k": 1}));
        assert!(entry.created_at <= Utc::now());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompletionCache::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(cache.get("bad").is_none());
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn rejected_entry_counts_as_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompletionCache::new(dir.path()).unwrap();
        cache.put("shape", &json!({"names": "wrong"})).unwrap();

        assert!(cache.get_if("shape", |p| p["names"].is_array()).is_none());
        assert_eq!((cache.hits(), cache.misses()), (0, 1));
        assert_eq!(cache.hit_rate(), 0.0);

        assert!(cache.get_if("shape", |p| p.is_object()).is_some());
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn remove_older_than_keeps_fresh_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompletionCache::new(dir.path()).unwrap();
        cache.put("fresh", &json!(1)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        assert_eq!(cache.remove_older_than(Duration::from_secs(3600)).unwrap(), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.remove_older_than(Duration::ZERO).unwrap(), 1);
        assert!(cache.get("fresh").is_none());
        assert!(dir.path().join("notes.txt").exists());
    }
}
