//! PDF splitting and text extraction

mod extractor;
mod text;

pub use extractor::{
    count_pdf_pages, split_units, ChunkExtractor, DocumentExtraction, OpenedDocument,
    UnitExtraction, DEFAULT_CHUNK_SIZE,
};
pub use text::{normalize_page_text, scan_text_operators};
