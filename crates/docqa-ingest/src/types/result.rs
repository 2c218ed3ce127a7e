//! Extraction outcomes and aggregate batch results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::document::{display_name, TextNode};
use crate::metrics::MetricsSnapshot;

/// Outcome status of one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Success,
    Error,
}

/// Error subtype recorded on a failed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed page, decode failure, unreadable PDF structure
    Extraction,
    /// Unit exceeded its time budget
    Timeout,
    /// File could not be read to compute its fingerprint
    Fingerprint,
    /// Worker panicked
    Panic,
}

impl ErrorKind {
    /// Failures tied to this run rather than to the document's content
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Panic | ErrorKind::Fingerprint)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Extraction => write!(f, "extraction"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Fingerprint => write!(f, "fingerprint"),
            ErrorKind::Panic => write!(f, "panic"),
        }
    }
}

/// Tagged error carried by a failed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtractionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Metadata attached to every result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub filename: String,
    pub processed_at: DateTime<Utc>,
    pub page_count: Option<u32>,
    /// Units the document was split into
    pub units: usize,
    /// Units whose extraction failed or timed out
    pub failed_units: usize,
    /// Failed units that timed out or panicked
    #[serde(default)]
    pub interrupted_units: usize,
}

impl ResultMetadata {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            processed_at: Utc::now(),
            page_count: None,
            units: 0,
            failed_units: 0,
            interrupted_units: 0,
        }
    }
}

/// Outcome of processing one input document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Input path as given by the caller
    pub source: String,
    pub fingerprint: Option<String>,
    pub status: ExtractionStatus,
    pub nodes: Vec<TextNode>,
    pub metadata: ResultMetadata,
    pub error: Option<ExtractionError>,
    /// Served from the content cache rather than extracted in this batch
    #[serde(default)]
    pub cached: bool,
}

impl ExtractionResult {
    /// Successful extraction
    pub fn success(
        source: &Path,
        fingerprint: impl Into<String>,
        nodes: Vec<TextNode>,
        metadata: ResultMetadata,
    ) -> Self {
        Self {
            source: source.display().to_string(),
            fingerprint: Some(fingerprint.into()),
            status: ExtractionStatus::Success,
            nodes,
            metadata,
            error: None,
            cached: false,
        }
    }

    /// Failed extraction for one document only
    pub fn failure(source: &Path, fingerprint: Option<String>, error: ExtractionError) -> Self {
        Self {
            source: source.display().to_string(),
            fingerprint,
            status: ExtractionStatus::Error,
            nodes: Vec::new(),
            metadata: ResultMetadata::new(display_name(source)),
            error: Some(error),
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Success
    }

    /// Whether this result may be reused for the same content later.
    ///
    /// Extraction errors are as reproducible as successes; anything touched
    /// by a timeout or panic, even a partial success, is not.
    pub fn is_cacheable(&self) -> bool {
        self.metadata.interrupted_units == 0
            && self.error.as_ref().map_or(true, |e| !e.kind.is_transient())
    }

    /// Copy of this result attributed to another input with the same fingerprint
    pub fn for_source(&self, source: &Path) -> Self {
        let mut copy = self.clone();
        copy.source = source.display().to_string();
        copy.metadata.filename = display_name(source);
        copy
    }
}

/// Lifecycle of one batch call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStage {
    Received,
    Deduplicating,
    Dispatching,
    Merging,
    Done,
}

/// Batch status reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Processing,
    Complete,
    /// The batch aborted on an infrastructure error
    Failed,
}

/// Aggregate result of one batch call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub stage: BatchStage,
    pub total: usize,
    pub processed: usize,
    pub pending: usize,
    pub errors: usize,
    /// One entry per input, in input order
    pub results: Vec<ExtractionResult>,
    pub metrics: MetricsSnapshot,
    /// Batch-level failure message, set when status is `Failed`
    pub error: Option<String>,
    /// Index persistence outcome, when an index builder is attached
    pub index: Option<IndexReport>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What happened when the batch was handed to the index builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub nodes: usize,
    pub persisted_to: Option<String>,
    pub error: Option<String>,
}

impl BatchResult {
    /// Fresh batch with every input pending
    pub fn received(batch_id: Uuid, total: usize, metrics: MetricsSnapshot) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            status: BatchStatus::Processing,
            stage: BatchStage::Received,
            total,
            processed: 0,
            pending: total,
            errors: 0,
            results: Vec::new(),
            metrics,
            error: None,
            index: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Recount processed/errors/pending after `settled` results are known
    pub fn tally(&mut self, processed: usize, errors: usize) {
        self.processed = processed;
        self.errors = errors;
        self.pending = self.total.saturating_sub(processed + errors);
        self.updated_at = Utc::now();
    }

    /// Complete the batch with its ordered results
    pub fn finish(&mut self, results: Vec<ExtractionResult>, metrics: MetricsSnapshot) {
        let processed = results.iter().filter(|r| r.is_success()).count();
        let errors = results.len() - processed;
        self.results = results;
        self.metrics = metrics;
        self.stage = BatchStage::Done;
        self.status = BatchStatus::Complete;
        self.tally(processed, errors);
    }

    /// Mark the batch as aborted by an infrastructure failure
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = BatchStatus::Failed;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn percent_complete(&self) -> f32 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed + self.errors) as f32 / self.total as f32 * 100.0
    }
}
