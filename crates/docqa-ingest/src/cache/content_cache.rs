//! Fingerprint-keyed cache of extraction results
//!
//! Entries carry their own write time and TTL, so a lookup after expiry is a
//! miss even when the backend has not evicted the key yet. Writes are
//! last-write-wins and the read-then-write sequence used by the coordinator
//! is not transactional: concurrent batches may both extract the same
//! document and both store it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics::PipelineMetrics;
use crate::types::ExtractionResult;

use super::backend::CacheBackend;

const KEY_PREFIX: &str = "doc_result:";

/// Backend key for a document fingerprint
pub fn cache_key(fingerprint: &str) -> String {
    format!("{}{}", KEY_PREFIX, fingerprint)
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
    result: ExtractionResult,
}

impl CacheEnvelope {
    /// An expiry past the representable range never arrives
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::try_milliseconds(self.ttl_ms.min(i64::MAX as u64) as i64)
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
            .map_or(false, |expires_at| now >= expires_at)
    }
}

/// Extraction result cache over a pluggable backend
#[derive(Clone)]
pub struct ContentCache {
    backend: Arc<dyn CacheBackend>,
    metrics: Arc<PipelineMetrics>,
}

impl ContentCache {
    pub fn new(backend: Arc<dyn CacheBackend>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { backend, metrics }
    }

    /// Fail fast when the backend is unreachable
    pub async fn ping(&self) -> Result<()> {
        self.backend
            .ping()
            .await
            .map_err(|e| Error::backend(format!("cache backend unreachable: {}", e)))
    }

    /// Cached result for `fingerprint`, or `None` on a miss.
    ///
    /// Returned results have `cached` set. Undecodable and logically expired
    /// entries count as misses and are deleted best effort.
    pub async fn lookup(&self, fingerprint: &str) -> Result<Option<ExtractionResult>> {
        let key = cache_key(fingerprint);
        let raw = self.backend.get(&key).await.map_err(into_backend_error)?;

        let Some(raw) = raw else {
            self.metrics.record_cache_miss();
            return Ok(None);
        };

        let envelope = match serde_json::from_str::<CacheEnvelope>(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key, e);
                self.evict(&key).await;
                self.metrics.record_cache_miss();
                return Ok(None);
            }
        };

        if envelope.is_expired(Utc::now()) {
            tracing::debug!("Cache miss (TTL expired): {}", fingerprint.get(..12).unwrap_or(fingerprint));
            self.evict(&key).await;
            self.metrics.record_cache_miss();
            return Ok(None);
        }

        self.metrics.record_cache_hit();
        let mut result = envelope.result;
        result.cached = true;
        Ok(Some(result))
    }

    /// Store `result` under `fingerprint`, replacing any previous entry
    pub async fn store(&self, fingerprint: &str, result: &ExtractionResult, ttl: Duration) -> Result<()> {
        let mut result = result.clone();
        result.cached = false;

        let envelope = CacheEnvelope {
            stored_at: Utc::now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
            result,
        };
        let value = serde_json::to_string(&envelope)?;

        self.backend
            .setex(&cache_key(fingerprint), ttl, value)
            .await
            .map_err(into_backend_error)
    }

    /// Drop the entry for `fingerprint`
    pub async fn invalidate(&self, fingerprint: &str) -> Result<bool> {
        self.backend
            .delete(&cache_key(fingerprint))
            .await
            .map_err(into_backend_error)
    }

    /// Whether the backend still holds a key for `fingerprint`
    pub async fn contains(&self, fingerprint: &str) -> Result<bool> {
        self.backend
            .exists(&cache_key(fingerprint))
            .await
            .map_err(into_backend_error)
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!("Failed to evict cache entry {}: {}", key, e);
        }
    }
}

fn into_backend_error(err: Error) -> Error {
    match err {
        Error::Backend(_) => err,
        other => Error::backend(other.to_string()),
    }
}
