//! Observability counters for the ingestion pipeline
//!
//! Counters are plain atomics; the metrics collaborator reads them through
//! [`PipelineMetrics::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bounds (seconds) of the batch duration histogram buckets
const DURATION_BUCKETS: [f64; 8] = [0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

/// Thread-safe counters describing pipeline activity
#[derive(Default)]
pub struct PipelineMetrics {
    units_attempted: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    units_timed_out: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    extraction_invocations: AtomicU64,
    batches_completed: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    batch_duration: DurationHistogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a unit as in progress until the returned guard drops
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.units_attempted.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn record_unit_success(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_failure(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Timeouts also count as failures
    pub fn record_unit_timeout(&self) {
        self.units_timed_out.fetch_add(1, Ordering::Relaxed);
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A document was sent to extraction (as opposed to served from cache)
    pub fn record_extraction(&self) {
        self.extraction_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self, elapsed: Duration) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.batch_duration.observe(elapsed);
    }

    /// Units currently executing
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Return a snapshot of the current counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        MetricsSnapshot {
            units_attempted: self.units_attempted.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_timed_out: self.units_timed_out.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            extraction_invocations: self.extraction_invocations.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
            batch_duration: self.batch_duration.snapshot(),
        }
    }
}

/// Decrements the in-flight gauge on drop
pub struct InFlightGuard {
    metrics: Arc<PipelineMetrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Cumulative histogram of batch durations
struct DurationHistogram {
    buckets: [AtomicU64; DURATION_BUCKETS.len()],
    overflow: AtomicU64,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            overflow: AtomicU64::new(0),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }
}

impl DurationHistogram {
    fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        match DURATION_BUCKETS.iter().position(|bound| secs <= *bound) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = DURATION_BUCKETS
            .iter()
            .zip(self.buckets.iter())
            .map(|(bound, count)| {
                cumulative += count.load(Ordering::Relaxed);
                BucketCount {
                    le: *bound,
                    count: cumulative,
                }
            })
            .collect();

        HistogramSnapshot {
            buckets,
            count: self.count.load(Ordering::Relaxed),
            sum_secs: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Immutable view of pipeline counters used for reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub units_attempted: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub units_timed_out: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub extraction_invocations: u64,
    pub batches_completed: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
    pub batch_duration: HistogramSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    /// Cumulative counts per upper bound
    pub buckets: Vec<BucketCount>,
    pub count: u64,
    pub sum_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub le: f64,
    pub count: u64,
}
