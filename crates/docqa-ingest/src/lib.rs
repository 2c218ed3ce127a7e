//! docqa-ingest: batch PDF ingestion for document question answering
//!
//! PDFs are split into page-range units, extracted on a bounded worker pool
//! and cached by content fingerprint so repeated uploads skip extraction.
//! Batches run through [`processing::BatchCoordinator`], either directly or
//! behind the HTTP server in [`server`].

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod ingestion;
pub mod metrics;
pub mod processing;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

pub use cache::{CacheBackend, ContentCache, MemoryBackend};
pub use config::IngestConfig;
pub use error::{Error, Result};
pub use index::{EmbeddingModel, IndexBuilder, IndexHandle, NodeSnapshotIndex};
pub use ingestion::ChunkExtractor;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use processing::{BatchCoordinator, BatchRegistry, ParallelRunner};
pub use types::{BatchResult, Document, ExtractionResult, ExtractionUnit, TextNode};
