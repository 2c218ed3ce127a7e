//! Core types for the ingestion pipeline

pub mod document;
pub mod result;

pub use document::{Document, ExtractionUnit, TextNode};
pub use result::{
    BatchResult, BatchStage, BatchStatus, ErrorKind, ExtractionError, ExtractionResult, ExtractionStatus,
    IndexReport, ResultMetadata,
};
