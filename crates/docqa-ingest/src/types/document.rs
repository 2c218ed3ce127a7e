//! Documents, page-range units and extracted text nodes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// An input document identified by its path and content fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Location of the raw bytes
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file bytes
    pub fingerprint: String,
    /// Page count, known once the PDF has been opened
    pub page_count: Option<u32>,
}

impl Document {
    /// Fingerprint raw bytes read from `path`
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint(bytes),
            page_count: None,
        }
    }

    /// File name used in metadata and logs
    pub fn filename(&self) -> String {
        display_name(&self.path)
    }
}

/// Hash document bytes into a cache/dedup key.
///
/// Distinct inputs with identical hashes share a key; callers must not rely
/// on collision-freedom.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Final path component, or the whole path when it has none
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Half-open, zero-based page range `[start, end)` processed as one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtractionUnit {
    pub start: u32,
    pub end: u32,
}

impl ExtractionUnit {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of pages covered
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Zero-based page indices in ascending order
    pub fn pages(&self) -> impl Iterator<Item = u32> {
        self.start..self.end
    }
}

impl std::fmt::Display for ExtractionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Text extracted from one page, rendered as markdown paragraphs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    /// Zero-based page index
    pub page: u32,
    /// Source file name
    pub filename: String,
    /// Extracted text
    pub text: String,
}

impl TextNode {
    /// One-based page number for display
    pub fn page_number(&self) -> u32 {
        self.page + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_hex_sha256() {
        let a = fingerprint(b"%PDF-1.5 hello");
        let b = fingerprint(b"%PDF-1.5 hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, fingerprint(b"%PDF-1.5 other"));
    }

    #[test]
    fn test_document_filename() {
        let doc = Document::from_bytes("/tmp/uploads/report.pdf", b"bytes");
        assert_eq!(doc.filename(), "report.pdf");
        assert_eq!(doc.page_count, None);
    }

    #[test]
    fn test_unit_pages() {
        let unit = ExtractionUnit::new(10, 13);
        assert_eq!(unit.len(), 3);
        assert_eq!(unit.pages().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(unit.to_string(), "[10, 13)");
    }
}
