//! Thread-safe pipeline metrics
//!
//! Atomic counters for the high-frequency paths (records in, drops, writes)
//! and a mutex-protected window of flush sizes for percentile reporting.

use crate::aggregation::FlushTrigger;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Flush sizes kept for percentile calculation
const MAX_FLUSH_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and a mutex
pub struct MetricsCollector {
    // Intake
    records_received: AtomicU64,
    records_dropped_by_agent: AtomicU64,
    records_dropped_by_time_frame: AtomicU64,
    leaves_extracted: AtomicU64,

    // Aggregation
    aggregates_created: AtomicU64,
    records_aggregated: AtomicU64,
    flushes_bucket_expired: AtomicU64,
    flushes_size_exceeded: AtomicU64,
    flushes_explicit: AtomicU64,
    aggregates_flushed: AtomicU64,

    // Storage
    writes_issued: AtomicU64,
    annotated_writes_issued: AtomicU64,

    flush_sizes: Mutex<Vec<u64>>,
    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            records_received: AtomicU64::new(0),
            records_dropped_by_agent: AtomicU64::new(0),
            records_dropped_by_time_frame: AtomicU64::new(0),
            leaves_extracted: AtomicU64::new(0),
            aggregates_created: AtomicU64::new(0),
            records_aggregated: AtomicU64::new(0),
            flushes_bucket_expired: AtomicU64::new(0),
            flushes_size_exceeded: AtomicU64::new(0),
            flushes_explicit: AtomicU64::new(0),
            aggregates_flushed: AtomicU64::new(0),
            writes_issued: AtomicU64::new(0),
            annotated_writes_issued: AtomicU64::new(0),
            flush_sizes: Mutex::new(Vec::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_by_agent(&self) {
        self.records_dropped_by_agent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_by_time_frame(&self) {
        self.records_dropped_by_time_frame
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn leaf_extracted(&self) {
        self.leaves_extracted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregated(&self, created: bool) {
        self.records_aggregated.fetch_add(1, Ordering::Relaxed);
        if created {
            self.aggregates_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one flush of `size` accumulators
    pub fn aggregates_flushed(&self, trigger: FlushTrigger, size: usize) {
        let counter = match trigger {
            FlushTrigger::BucketExpired => &self.flushes_bucket_expired,
            FlushTrigger::SizeExceeded => &self.flushes_size_exceeded,
            FlushTrigger::Explicit => &self.flushes_explicit,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.aggregates_flushed
            .fetch_add(size as u64, Ordering::Relaxed);

        if let Ok(mut sizes) = self.flush_sizes.lock() {
            sizes.push(size as u64);
            if sizes.len() > MAX_FLUSH_SAMPLES {
                sizes.remove(0);
            }
        }
    }

    pub fn write_issued(&self, annotated: bool) {
        self.writes_issued.fetch_add(1, Ordering::Relaxed);
        if annotated {
            self.annotated_writes_issued
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.records_received,
            &self.records_dropped_by_agent,
            &self.records_dropped_by_time_frame,
            &self.leaves_extracted,
            &self.aggregates_created,
            &self.records_aggregated,
            &self.flushes_bucket_expired,
            &self.flushes_size_exceeded,
            &self.flushes_explicit,
            &self.aggregates_flushed,
            &self.writes_issued,
            &self.annotated_writes_issued,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut sizes) = self.flush_sizes.lock() {
            sizes.clear();
        }
        self.started_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Average and percentiles of recent flush sizes (pure function)
    fn flush_size_statistics(&self) -> (f64, f64, f64) {
        match self.flush_sizes.lock() {
            Ok(sizes) if !sizes.is_empty() => {
                let mut sorted = sizes.clone();
                sorted.sort_unstable();
                let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
                (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
            }
            _ => (0.0, 0.0, 0.0),
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_flush_size, flush_size_p50, flush_size_p95) = self.flush_size_statistics();

        MetricsSnapshot {
            intake: IntakeMetrics {
                records_received: self.records_received.load(Ordering::Relaxed),
                records_dropped_by_agent: self.records_dropped_by_agent.load(Ordering::Relaxed),
                records_dropped_by_time_frame: self
                    .records_dropped_by_time_frame
                    .load(Ordering::Relaxed),
                leaves_extracted: self.leaves_extracted.load(Ordering::Relaxed),
            },
            aggregation: AggregationMetrics {
                aggregates_created: self.aggregates_created.load(Ordering::Relaxed),
                records_aggregated: self.records_aggregated.load(Ordering::Relaxed),
                flushes_bucket_expired: self.flushes_bucket_expired.load(Ordering::Relaxed),
                flushes_size_exceeded: self.flushes_size_exceeded.load(Ordering::Relaxed),
                flushes_explicit: self.flushes_explicit.load(Ordering::Relaxed),
                aggregates_flushed: self.aggregates_flushed.load(Ordering::Relaxed),
                avg_flush_size,
                flush_size_p50,
                flush_size_p95,
            },
            storage: StorageMetrics {
                writes_issued: self.writes_issued.load(Ordering::Relaxed),
                annotated_writes_issued: self.annotated_writes_issued.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub intake: IntakeMetrics,
    pub aggregation: AggregationMetrics,
    pub storage: StorageMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct IntakeMetrics {
    pub records_received: u64,
    pub records_dropped_by_agent: u64,
    pub records_dropped_by_time_frame: u64,
    pub leaves_extracted: u64,
}

#[derive(Debug, Serialize)]
pub struct AggregationMetrics {
    pub aggregates_created: u64,
    pub records_aggregated: u64,
    pub flushes_bucket_expired: u64,
    pub flushes_size_exceeded: u64,
    pub flushes_explicit: u64,
    pub aggregates_flushed: u64,
    pub avg_flush_size: f64,
    pub flush_size_p50: f64,
    pub flush_size_p95: f64,
}

#[derive(Debug, Serialize)]
pub struct StorageMetrics {
    pub writes_issued: u64,
    pub annotated_writes_issued: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
