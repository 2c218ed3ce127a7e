//! Batch orchestration
//!
//! A batch moves through `received -> deduplicating -> dispatching ->
//! merging -> done`. Inputs are fingerprinted, duplicates collapsed, cached
//! results reused and the rest extracted on the shared worker pool in
//! sub-batches. Per-document failures become error results; only an
//! unreachable cache backend fails the whole call.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::cache::{CacheBackend, ContentCache};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::index::{EmbeddingModel, IndexBuilder, NodeSnapshotIndex};
use crate::ingestion::{ChunkExtractor, OpenedDocument};
use crate::metrics::PipelineMetrics;
use crate::types::document::fingerprint;
use crate::types::{
    BatchResult, BatchStage, Document, ErrorKind, ExtractionError, ExtractionResult, ExtractionUnit,
    IndexReport, ResultMetadata, TextNode,
};

use super::registry::BatchRegistry;
use super::runner::{ParallelRunner, TaskError, TaskOutcome};

/// Extraction of one unit from an opened document
type UnitExtractor = fn(&OpenedDocument, ExtractionUnit) -> Result<Vec<TextNode>>;

/// Where finished batches are indexed
struct IndexTarget {
    builder: Arc<dyn IndexBuilder>,
    model: EmbeddingModel,
    dir: PathBuf,
}

/// Per-input bookkeeping while a batch is in flight
enum Slot {
    /// Settled before dispatch
    Settled(ExtractionResult),
    /// Waiting on the result for a fingerprint
    Pending { path: PathBuf, fingerprint: String },
}

/// Drives batches through fingerprinting, caching and extraction
pub struct BatchCoordinator {
    cache: ContentCache,
    runner: Arc<ParallelRunner>,
    extractor: ChunkExtractor,
    extract_unit: UnitExtractor,
    metrics: Arc<PipelineMetrics>,
    registry: Arc<BatchRegistry>,
    batch_size: usize,
    cache_ttl: Duration,
    index: Option<IndexTarget>,
}

impl BatchCoordinator {
    /// Build a coordinator and its worker pool from configuration
    pub fn from_config(
        config: &IngestConfig,
        backend: Arc<dyn CacheBackend>,
        metrics: Arc<PipelineMetrics>,
        registry: Arc<BatchRegistry>,
    ) -> Self {
        let runner = Arc::new(ParallelRunner::new(
            config.processing.workers,
            config.processing.task_timeout(),
            Arc::clone(&metrics),
        ));

        let coordinator = Self {
            cache: ContentCache::new(backend, Arc::clone(&metrics)),
            runner,
            extractor: ChunkExtractor::new(config.processing.chunk_size),
            extract_unit: ChunkExtractor::extract_unit,
            metrics,
            registry,
            batch_size: config.processing.batch_size.max(1),
            cache_ttl: config.cache.ttl(),
            index: None,
        };

        if config.index.enabled {
            coordinator.with_index(
                Arc::new(NodeSnapshotIndex::new()),
                EmbeddingModel::new(&config.index.embed_model),
                config.index.storage_dir.clone(),
            )
        } else {
            coordinator
        }
    }

    /// Hand the nodes of every finished batch to `builder`
    pub fn with_index(mut self, builder: Arc<dyn IndexBuilder>, model: EmbeddingModel, dir: PathBuf) -> Self {
        tracing::info!(
            "Index builder '{}' attached (model: {}, dir: {})",
            builder.name(),
            model.name,
            dir.display()
        );
        self.index = Some(IndexTarget { builder, model, dir });
        self
    }

    pub fn registry(&self) -> &Arc<BatchRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Process a batch and wait for its result.
    ///
    /// Results come back one per input in input order. Returns `Err` only
    /// when the cache backend is unreachable.
    pub async fn process(&self, paths: Vec<PathBuf>) -> Result<BatchResult> {
        let batch_id = self.registry.register(paths.len(), self.metrics.snapshot());
        self.run(batch_id, paths).await
    }

    /// Start a batch in the background and return its id for status polling
    pub fn submit(self: &Arc<Self>, paths: Vec<PathBuf>) -> Uuid {
        let batch_id = self.registry.register(paths.len(), self.metrics.snapshot());
        let coordinator = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = coordinator.run(batch_id, paths).await {
                tracing::error!("Batch {} failed: {}", batch_id, e);
            }
        });

        batch_id
    }

    async fn run(&self, batch_id: Uuid, paths: Vec<PathBuf>) -> Result<BatchResult> {
        let started = Instant::now();
        let total = paths.len();
        tracing::info!("Batch {} received: {} documents", batch_id, total);

        let results = match self.execute(batch_id, paths).await {
            Ok(results) => results,
            Err(e) => {
                self.registry.fail(batch_id, &e.to_string(), self.metrics.snapshot());
                return Err(e);
            }
        };

        let index = self.feed_index(&results).await;
        self.metrics.record_batch(started.elapsed());

        let mut batch = self
            .registry
            .get(batch_id)
            .unwrap_or_else(|| BatchResult::received(batch_id, total, self.metrics.snapshot()));
        batch.finish(results, self.metrics.snapshot());
        batch.index = index;
        self.registry.complete(batch.clone());

        tracing::info!(
            "Batch {} done in {:.2}s: {} processed, {} errors",
            batch_id,
            started.elapsed().as_secs_f64(),
            batch.processed,
            batch.errors
        );

        Ok(batch)
    }

    async fn execute(&self, batch_id: Uuid, paths: Vec<PathBuf>) -> Result<Vec<ExtractionResult>> {
        let slots = self.fingerprint_all(paths).await;

        self.cache.ping().await?;

        self.registry.set_stage(batch_id, BatchStage::Deduplicating);
        let unique = unique_documents(&slots);
        tracing::debug!(
            "Batch {}: {} unique documents in {} inputs",
            batch_id,
            unique.len(),
            slots.len()
        );

        let mut resolved: HashMap<String, ExtractionResult> = HashMap::new();
        let mut pending = Vec::new();
        for doc in unique {
            match self.cache.lookup(&doc.fingerprint).await? {
                Some(hit) => {
                    tracing::debug!("Cache hit: {}", doc.filename());
                    resolved.insert(doc.fingerprint.clone(), hit);
                }
                None => pending.push(doc),
            }
        }
        self.publish_progress(batch_id, &slots, &resolved);

        self.registry.set_stage(batch_id, BatchStage::Dispatching);
        for (n, chunk) in pending.chunks(self.batch_size).enumerate() {
            tracing::debug!("Batch {}: sub-batch {} with {} documents", batch_id, n + 1, chunk.len());

            for (doc, result) in chunk.iter().zip(self.extract_documents(chunk).await) {
                if result.is_cacheable() {
                    self.cache.store(&doc.fingerprint, &result, self.cache_ttl).await?;
                }
                resolved.insert(doc.fingerprint.clone(), result);
            }
            self.publish_progress(batch_id, &slots, &resolved);
        }

        self.registry.set_stage(batch_id, BatchStage::Merging);
        let results = slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Settled(result) => result,
                Slot::Pending { path, fingerprint } => match resolved.get(&fingerprint) {
                    Some(result) => result.for_source(&path),
                    None => ExtractionResult::failure(
                        &path,
                        Some(fingerprint),
                        ExtractionError::new(ErrorKind::Extraction, "document was never dispatched"),
                    ),
                },
            })
            .collect();

        Ok(results)
    }

    /// Read and hash every input, a few at a time, keeping input order
    async fn fingerprint_all(&self, paths: Vec<PathBuf>) -> Vec<Slot> {
        stream::iter(paths)
            .map(|path| async move {
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Slot::Pending {
                        fingerprint: fingerprint(&bytes),
                        path,
                    },
                    Err(e) => {
                        tracing::warn!("Cannot read {}: {}", path.display(), e);
                        Slot::Settled(ExtractionResult::failure(
                            &path,
                            None,
                            ExtractionError::new(
                                ErrorKind::Fingerprint,
                                format!("failed to read {}: {}", path.display(), e),
                            ),
                        ))
                    }
                }
            })
            .buffered(self.runner.workers())
            .collect()
            .await
    }

    /// Open, split and extract one sub-batch; one result per document in order
    async fn extract_documents(&self, docs: &[Document]) -> Vec<ExtractionResult> {
        let extractor = self.extractor;
        let opened = self
            .runner
            .run_untracked(docs.to_vec(), move |doc: Document| Ok(open_document(&extractor, &doc)))
            .await;

        let mut settled: Vec<Option<ExtractionResult>> = vec![None; docs.len()];
        let mut page_counts = vec![0u32; docs.len()];
        let mut jobs: Vec<(Arc<OpenedDocument>, ExtractionUnit)> = Vec::new();
        let mut owners: Vec<usize> = Vec::new();

        for (idx, (doc, outcome)) in docs.iter().zip(opened).enumerate() {
            self.metrics.record_extraction();

            let opened = match outcome {
                Ok(Ok(opened)) => opened,
                Ok(Err(error)) => {
                    tracing::warn!("Cannot open {}: {}", doc.filename(), error.message);
                    settled[idx] = Some(ExtractionResult::failure(&doc.path, Some(doc.fingerprint.clone()), error));
                    continue;
                }
                Err(task_err) => {
                    settled[idx] = Some(ExtractionResult::failure(
                        &doc.path,
                        Some(doc.fingerprint.clone()),
                        task_error(&task_err),
                    ));
                    continue;
                }
            };

            page_counts[idx] = opened.page_count();
            let opened = Arc::new(opened);
            for unit in self.extractor.split(page_counts[idx]) {
                jobs.push((Arc::clone(&opened), unit));
                owners.push(idx);
            }
        }

        let units: Vec<ExtractionUnit> = jobs.iter().map(|(_, unit)| *unit).collect();
        let extract_unit = self.extract_unit;
        let outcomes = self
            .runner
            .run(jobs, move |(doc, unit): (Arc<OpenedDocument>, ExtractionUnit)| {
                extract_unit(&doc, unit)
            })
            .await;

        let mut per_doc: Vec<Vec<(ExtractionUnit, TaskOutcome<Vec<TextNode>>)>> =
            docs.iter().map(|_| Vec::new()).collect();
        for ((owner, unit), outcome) in owners.into_iter().zip(units).zip(outcomes) {
            per_doc[owner].push((unit, outcome));
        }

        let mut results = Vec::with_capacity(docs.len());
        for (idx, (doc, units)) in docs.iter().zip(per_doc).enumerate() {
            let result = match settled[idx].take() {
                Some(result) => result,
                None => assemble(doc, page_counts[idx], units),
            };
            results.push(result);
        }
        results
    }

    fn publish_progress(&self, batch_id: Uuid, slots: &[Slot], resolved: &HashMap<String, ExtractionResult>) {
        let mut processed = 0;
        let mut errors = 0;
        for slot in slots {
            let result = match slot {
                Slot::Settled(result) => Some(result),
                Slot::Pending { fingerprint, .. } => resolved.get(fingerprint),
            };
            match result {
                Some(r) if r.is_success() => processed += 1,
                Some(_) => errors += 1,
                None => {}
            }
        }
        self.registry
            .update_counts(batch_id, processed, errors, self.metrics.snapshot());
    }

    /// Index the nodes of every distinct successful document. Failures are
    /// reported, never propagated.
    async fn feed_index(&self, results: &[ExtractionResult]) -> Option<IndexReport> {
        let target = self.index.as_ref()?;

        let mut seen = HashSet::new();
        let nodes: Vec<TextNode> = results
            .iter()
            .filter(|r| r.is_success())
            .filter(|r| r.fingerprint.as_ref().map_or(true, |fp| seen.insert(fp.clone())))
            .flat_map(|r| r.nodes.iter().cloned())
            .collect();

        let outcome = match target.builder.build(&nodes, &target.model).await {
            Ok(handle) => handle.persist(&target.dir).await,
            Err(e) => Err(e),
        };

        let report = match outcome {
            Ok(path) => {
                tracing::info!("Indexed {} nodes into {}", nodes.len(), path.display());
                IndexReport {
                    nodes: nodes.len(),
                    persisted_to: Some(path.display().to_string()),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Index update failed: {}", e);
                IndexReport {
                    nodes: nodes.len(),
                    persisted_to: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Some(report)
    }
}

/// First input of each distinct fingerprint, in input order
fn unique_documents(slots: &[Slot]) -> Vec<Document> {
    let mut seen = HashSet::new();
    slots
        .iter()
        .filter_map(|slot| match slot {
            Slot::Pending { path, fingerprint } if seen.insert(fingerprint.as_str()) => Some(Document {
                path: path.clone(),
                fingerprint: fingerprint.clone(),
                page_count: None,
            }),
            _ => None,
        })
        .collect()
}

/// Re-read a fingerprinted document and parse it
fn open_document(
    extractor: &ChunkExtractor,
    doc: &Document,
) -> std::result::Result<OpenedDocument, ExtractionError> {
    let bytes = std::fs::read(&doc.path).map_err(|e| {
        ExtractionError::new(
            ErrorKind::Fingerprint,
            format!("failed to read {}: {}", doc.path.display(), e),
        )
    })?;

    if fingerprint(&bytes) != doc.fingerprint {
        return Err(ExtractionError::new(
            ErrorKind::Fingerprint,
            "file changed since it was fingerprinted",
        ));
    }

    extractor
        .open(&doc.filename(), &bytes)
        .map_err(|e| ExtractionError::new(ErrorKind::Extraction, e.to_string()))
}

fn task_error(err: &TaskError) -> ExtractionError {
    let kind = match err {
        TaskError::Failed(_) => ErrorKind::Extraction,
        TaskError::TimedOut(_) => ErrorKind::Timeout,
        TaskError::Panicked(_) => ErrorKind::Panic,
    };
    ExtractionError::new(kind, err.to_string())
}

/// Fold unit outcomes into one document result.
///
/// A document succeeds when it has no pages or at least one unit succeeded;
/// otherwise it carries the first unit's error.
fn assemble(
    doc: &Document,
    page_count: u32,
    units: Vec<(ExtractionUnit, TaskOutcome<Vec<TextNode>>)>,
) -> ExtractionResult {
    let mut metadata = ResultMetadata::new(doc.filename());
    metadata.page_count = Some(page_count);
    metadata.units = units.len();

    let mut nodes = Vec::new();
    let mut first_error = None;
    for (unit, outcome) in units {
        match outcome {
            Ok(mut unit_nodes) => nodes.append(&mut unit_nodes),
            Err(e) => {
                tracing::warn!("[{}] unit {} failed: {}", metadata.filename, unit, e);
                metadata.failed_units += 1;
                if matches!(e, TaskError::TimedOut(_) | TaskError::Panicked(_)) {
                    metadata.interrupted_units += 1;
                }
                if first_error.is_none() {
                    first_error = Some(task_error(&e));
                }
            }
        }
    }

    match first_error {
        Some(error) if metadata.failed_units == metadata.units => {
            let mut result = ExtractionResult::failure(&doc.path, Some(doc.fingerprint.clone()), error);
            result.metadata = metadata;
            result
        }
        _ => ExtractionResult::success(&doc.path, doc.fingerprint.clone(), nodes, metadata),
    }
}
