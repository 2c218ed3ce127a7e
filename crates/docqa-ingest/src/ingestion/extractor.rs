//! Page-range splitting and per-unit PDF text extraction

use std::path::Path;

use crate::error::{Error, Result};
use crate::types::{ExtractionUnit, TextNode};

use super::text::{normalize_page_text, scan_text_operators};

/// Default number of pages per extraction unit
pub const DEFAULT_CHUNK_SIZE: u32 = 10;

/// Split `[0, page_count)` into ascending, non-overlapping ranges of at most
/// `chunk_size` pages. A chunk size of zero is treated as one.
pub fn split_units(page_count: u32, chunk_size: u32) -> Vec<ExtractionUnit> {
    let step = chunk_size.max(1);
    (0..page_count)
        .step_by(step as usize)
        .map(|start| ExtractionUnit::new(start, start.saturating_add(step).min(page_count)))
        .collect()
}

/// Count the pages of a PDF file
pub fn count_pdf_pages(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    let doc = lopdf::Document::load(path)
        .map_err(|e| Error::pdf_parse(path.display().to_string(), e.to_string()))?;
    Ok(doc.get_pages().len() as u32)
}

/// A parsed PDF shared by the unit tasks of one document
pub struct OpenedDocument {
    pub filename: String,
    pdf: lopdf::Document,
    /// lopdf page numbers (1-based) indexed by zero-based page position
    page_numbers: Vec<u32>,
}

impl OpenedDocument {
    pub fn page_count(&self) -> u32 {
        self.page_numbers.len() as u32
    }
}

impl std::fmt::Debug for OpenedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedDocument")
            .field("filename", &self.filename)
            .field("pages", &self.page_numbers.len())
            .finish()
    }
}

/// Outcome of one unit when a whole document is extracted in place
#[derive(Debug)]
pub struct UnitExtraction {
    pub unit: ExtractionUnit,
    pub outcome: Result<Vec<TextNode>>,
}

/// Result of [`ChunkExtractor::docs_from_pdf`]
#[derive(Debug)]
pub struct DocumentExtraction {
    pub page_count: u32,
    pub units: Vec<UnitExtraction>,
}

impl DocumentExtraction {
    /// Nodes of every successful unit, in page order
    pub fn nodes(&self) -> Vec<TextNode> {
        self.units
            .iter()
            .filter_map(|u| u.outcome.as_ref().ok())
            .flatten()
            .cloned()
            .collect()
    }

    pub fn failed_units(&self) -> usize {
        self.units.iter().filter(|u| u.outcome.is_err()).count()
    }
}

/// Splits documents into page-range units and extracts text per unit
#[derive(Debug, Clone, Copy)]
pub struct ChunkExtractor {
    chunk_size: u32,
}

impl ChunkExtractor {
    pub fn new(chunk_size: u32) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Units covering every page of a document exactly once
    pub fn split(&self, page_count: u32) -> Vec<ExtractionUnit> {
        split_units(page_count, self.chunk_size)
    }

    /// Parse PDF bytes once so units can share the document
    pub fn open(&self, filename: &str, bytes: &[u8]) -> Result<OpenedDocument> {
        let pdf = lopdf::Document::load_mem(bytes)
            .map_err(|e| Error::pdf_parse(filename, e.to_string()))?;
        let page_numbers = pdf.get_pages().keys().copied().collect();

        Ok(OpenedDocument {
            filename: filename.to_string(),
            pdf,
            page_numbers,
        })
    }

    /// Extract one node per page of `unit`.
    ///
    /// Font-aware extraction is tried first; pages it cannot decode fall back
    /// to scanning the raw content stream. A page neither path can read fails
    /// the whole unit.
    pub fn extract_unit(doc: &OpenedDocument, unit: ExtractionUnit) -> Result<Vec<TextNode>> {
        let mut nodes = Vec::with_capacity(unit.len() as usize);

        for page in unit.pages() {
            let page_number = *doc.page_numbers.get(page as usize).ok_or_else(|| {
                Error::pdf_parse(
                    &doc.filename,
                    format!("page {} out of range ({} pages)", page, doc.page_count()),
                )
            })?;

            let raw = match doc.pdf.extract_text(&[page_number]) {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) | Err(_) => Self::fallback_page_text(doc, page_number)?,
            };

            nodes.push(TextNode {
                page,
                filename: doc.filename.clone(),
                text: normalize_page_text(&raw),
            });
        }

        Ok(nodes)
    }

    fn fallback_page_text(doc: &OpenedDocument, page_number: u32) -> Result<String> {
        let page_id = doc.pdf.get_pages().get(&page_number).copied().ok_or_else(|| {
            Error::pdf_parse(&doc.filename, format!("missing page {}", page_number))
        })?;
        let content = doc.pdf.get_page_content(page_id).map_err(|e| {
            Error::pdf_parse(
                &doc.filename,
                format!("unreadable content on page {}: {}", page_number, e),
            )
        })?;
        Ok(scan_text_operators(&content))
    }

    /// Split and extract a whole file on the calling thread.
    ///
    /// A failing unit is recorded in its [`UnitExtraction`] and does not stop
    /// the remaining units. Only an unreadable or unparsable file is an error.
    pub fn docs_from_pdf(&self, path: impl AsRef<Path>) -> Result<DocumentExtraction> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let filename = crate::types::document::display_name(path);
        let doc = self.open(&filename, &bytes)?;
        drop(bytes);

        let units = self
            .split(doc.page_count())
            .into_iter()
            .map(|unit| {
                let outcome = Self::extract_unit(&doc, unit);
                if let Err(e) = &outcome {
                    tracing::warn!("[{}] unit {} failed: {}", filename, unit, e);
                }
                UnitExtraction { unit, outcome }
            })
            .collect();

        Ok(DocumentExtraction {
            page_count: doc.page_count(),
            units,
        })
    }
}

impl Default for ChunkExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pdf_bytes, write_pdf};

    #[test]
    fn test_split_report_into_three_units() {
        let units = split_units(25, 10);
        assert_eq!(
            units,
            vec![
                ExtractionUnit::new(0, 10),
                ExtractionUnit::new(10, 20),
                ExtractionUnit::new(20, 25),
            ]
        );
    }

    #[test]
    fn test_split_covers_every_page_once() {
        for page_count in [1u32, 2, 9, 10, 11, 37, 100] {
            for chunk_size in [1u32, 3, 10, 64, 200] {
                let units = split_units(page_count, chunk_size);
                let mut expected_start = 0;
                for unit in &units {
                    assert_eq!(unit.start, expected_start);
                    assert!(unit.len() >= 1 && unit.len() <= chunk_size);
                    expected_start = unit.end;
                }
                assert_eq!(expected_start, page_count);
            }
        }
    }

    #[test]
    fn test_split_zero_pages_and_zero_chunk() {
        assert!(split_units(0, 10).is_empty());
        assert_eq!(split_units(3, 0).len(), 3);
    }

    #[test]
    fn test_count_pdf_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "report.pdf", 25);
        assert_eq!(count_pdf_pages(&path).unwrap(), 25);
    }

    #[test]
    fn test_count_pages_of_garbage_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"definitely not a pdf").unwrap();
        assert!(matches!(count_pdf_pages(&path), Err(Error::PdfParse { .. })));
    }

    #[test]
    fn test_extract_unit_yields_one_node_per_page() {
        let extractor = ChunkExtractor::new(2);
        let doc = extractor.open("sample.pdf", &pdf_bytes(3)).unwrap();
        assert_eq!(doc.page_count(), 3);

        let nodes = ChunkExtractor::extract_unit(&doc, ExtractionUnit::new(1, 3)).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].page, 1);
        assert_eq!(nodes[1].page_number(), 3);
        assert!(nodes[0].text.contains("Page 2"), "got {:?}", nodes[0].text);
        assert_eq!(nodes[1].filename, "sample.pdf");
    }

    #[test]
    fn test_extract_unit_out_of_range_fails() {
        let extractor = ChunkExtractor::default();
        let doc = extractor.open("short.pdf", &pdf_bytes(2)).unwrap();
        let err = ChunkExtractor::extract_unit(&doc, ExtractionUnit::new(1, 4)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_docs_from_pdf_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "report.pdf", 25);

        let extraction = ChunkExtractor::new(10).docs_from_pdf(&path).unwrap();
        assert_eq!(extraction.page_count, 25);
        let ranges: Vec<_> = extraction.units.iter().map(|u| (u.unit.start, u.unit.end)).collect();
        assert_eq!(ranges, vec![(0, 10), (10, 20), (20, 25)]);
        assert_eq!(extraction.failed_units(), 0);

        let nodes = extraction.nodes();
        assert_eq!(nodes.len(), 25);
        assert!(nodes.windows(2).all(|w| w[0].page < w[1].page));
    }

    #[test]
    fn test_docs_from_pdf_zero_pages() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(dir.path(), "empty.pdf", 0);

        let extraction = ChunkExtractor::default().docs_from_pdf(&path).unwrap();
        assert_eq!(extraction.page_count, 0);
        assert!(extraction.units.is_empty());
        assert!(extraction.nodes().is_empty());
    }
}
