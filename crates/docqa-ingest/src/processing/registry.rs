//! In-memory registry of batch snapshots for status polling

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::metrics::MetricsSnapshot;
use crate::types::{BatchResult, BatchStage, BatchStatus};

/// Tracks submitted batches until finished ones age out
#[derive(Default)]
pub struct BatchRegistry {
    batches: DashMap<Uuid, BatchResult>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new batch with all inputs pending
    pub fn register(&self, total: usize, metrics: MetricsSnapshot) -> Uuid {
        let batch_id = Uuid::new_v4();
        self.batches
            .insert(batch_id, BatchResult::received(batch_id, total, metrics));
        batch_id
    }

    /// Get a batch snapshot
    pub fn get(&self, batch_id: Uuid) -> Option<BatchResult> {
        self.batches.get(&batch_id).map(|b| b.clone())
    }

    /// All batches, most recent first
    pub fn list(&self) -> Vec<BatchResult> {
        let mut batches: Vec<BatchResult> = self.batches.iter().map(|e| e.value().clone()).collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        batches
    }

    /// Advance the batch state machine
    pub fn set_stage(&self, batch_id: Uuid, stage: BatchStage) {
        if let Some(mut batch) = self.batches.get_mut(&batch_id) {
            batch.stage = stage;
            batch.updated_at = chrono::Utc::now();
        }
        tracing::debug!("Batch {} -> {:?}", batch_id, stage);
    }

    /// Update progress counters while sub-batches complete
    pub fn update_counts(&self, batch_id: Uuid, processed: usize, errors: usize, metrics: MetricsSnapshot) {
        if let Some(mut batch) = self.batches.get_mut(&batch_id) {
            batch.tally(processed, errors);
            batch.metrics = metrics;
        }
    }

    /// Store the final result of a batch
    pub fn complete(&self, result: BatchResult) {
        self.batches.insert(result.batch_id, result);
    }

    /// Record a batch-level failure
    pub fn fail(&self, batch_id: Uuid, message: &str, metrics: MetricsSnapshot) {
        if let Some(mut batch) = self.batches.get_mut(&batch_id) {
            batch.metrics = metrics;
            batch.fail(message);
        }
    }

    /// Drop finished batches not updated within `retention`; batches still
    /// processing are always kept. Returns how many were removed.
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return 0;
        };

        let before = self.batches.len();
        self.batches
            .retain(|_, batch| batch.status == BatchStatus::Processing || batch.updated_at > cutoff);
        before - self.batches.len()
    }

    /// Sweep finished batches every `interval` until the handle is aborted
    pub fn spawn_purge_task(self: Arc<Self>, interval: Duration, retention: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = self.purge_finished(retention);
                if purged > 0 {
                    tracing::debug!("Dropped {} finished batches", purged);
                }
            }
        })
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for batch in self.batches.iter() {
            match batch.status {
                BatchStatus::Processing => stats.processing += 1,
                BatchStatus::Complete => stats.complete += 1,
                BatchStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Batch counts by status
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub processing: usize,
    pub complete: usize,
    pub failed: usize,
}
