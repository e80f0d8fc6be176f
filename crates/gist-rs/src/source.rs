//! Document discovery and raw-text extraction.
//!
//! Extraction is a pluggable seam: [`TextExtractor`] turns a document on disk
//! into text. An empty string is a valid result (a scanned PDF with no text
//! layer, an empty file) and is distinct from a failure.

use std::path::{Path, PathBuf};

/// Turns a document into plain text.
pub trait TextExtractor: Send + Sync {
    /// Whether this extractor handles `path` (typically by extension).
    fn supports(&self, path: &Path) -> bool;

    /// Extract the text of `path`. `Ok("")` means the document has no text.
    fn extract(&self, path: &Path) -> Result<String, String>;
}

/// Reads text files, replacing invalid UTF-8 sequences.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    extensions: Vec<String>,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            extensions: vec!["txt".into(), "md".into()],
        }
    }
}

impl PlainTextExtractor {
    /// Handle files with any of `extensions` (without the leading dot).
    pub fn with_extensions(extensions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }
}

impl TextExtractor for PlainTextExtractor {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }

    fn extract(&self, path: &Path) -> Result<String, String> {
        let bytes =
            std::fs::read(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }
}

/// Collect the documents under `input` that `extractor` supports, sorted by
/// path. A file path is returned as-is if supported.
pub fn discover(input: &Path, extractor: &dyn TextExtractor) -> Result<Vec<PathBuf>, String> {
    if input.is_file() {
        return Ok(if extractor.supports(input) {
            vec![input.to_path_buf()]
        } else {
            vec![]
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![input.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| format!("Failed to read directory {}: {e}", dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if extractor.supports(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Stable record key for a document: its path relative to `root`, with `/`
/// separators.
pub fn document_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let key = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if key.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_extraction_trims_and_tolerates_bad_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"  Agenda\n\xff budget  \n").unwrap();

        let text = PlainTextExtractor::default().extract(&path).unwrap();
        assert!(text.starts_with("Agenda"));
        assert!(text.ends_with("budget"));
    }

    #[test]
    fn empty_document_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   \n").unwrap();
        assert_eq!(PlainTextExtractor::default().extract(&path).unwrap(), "");
    }

    #[test]
    fn missing_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlainTextExtractor::default()
            .extract(&dir.path().join("nope.txt"))
            .unwrap_err();
        assert!(err.contains("Failed to read"));
    }

    #[test]
    fn discover_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("2024/q1")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("2024/q1/a.md"), "a").unwrap();
        std::fs::write(dir.path().join("2024/skip.pdf"), "pdf").unwrap();

        let extractor = PlainTextExtractor::default();
        let found = discover(dir.path(), &extractor).unwrap();
        let keys: Vec<String> = found.iter().map(|p| document_key(dir.path(), p)).collect();
        assert_eq!(keys, vec!["2024/q1/a.md", "b.txt"]);
    }

    #[test]
    fn discover_accepts_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.TXT");
        std::fs::write(&path, "x").unwrap();
        let found = discover(&path, &PlainTextExtractor::default()).unwrap();
        assert_eq!(found, vec![path.clone()]);
        assert_eq!(document_key(&path, &path), "one.TXT");
    }
}
