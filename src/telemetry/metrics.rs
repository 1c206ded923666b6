//! Chunk-level metrics for scheduler jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use hdrhistogram::Histogram;
use parking_lot::RwLock;

/// Scheduler metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Chunk counters
    chunks_executed: AtomicU64,
    chunks_failed: AtomicU64,
    items_processed: AtomicU64,
    jobs_completed: AtomicU64,

    busy_time_ns: AtomicU64,

    // Chunk latency histogram (protected by RwLock for interior mutability)
    latency_histogram: RwLock<Histogram<u64>>,

    per_device: Vec<DeviceCounters>,

    start_time: Instant,
}

#[derive(Debug, Default)]
struct DeviceCounters {
    chunks: AtomicU64,
    failed: AtomicU64,
    items: AtomicU64,
    busy_time_ns: AtomicU64,
}

impl Metrics {
    /// Create a collector for `devices` contexts
    pub fn new(devices: usize) -> Self {
        // 3 significant figures, auto-resizing so long chunks are never dropped
        let mut histogram = Histogram::new(3).expect("3 significant figures is a valid histogram");
        histogram.auto(true);

        Self {
            chunks_executed: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            per_device: (0..devices).map(|_| DeviceCounters::default()).collect(),
            start_time: Instant::now(),
        }
    }

    /// Record a chunk that finished on device `index`
    pub fn record_chunk(&self, index: usize, items: u64, elapsed: Duration) {
        let ns = elapsed.as_nanos().min(u64::MAX as u128) as u64;

        self.chunks_executed.fetch_add(1, Ordering::Relaxed);
        self.items_processed.fetch_add(items, Ordering::Relaxed);
        self.busy_time_ns.fetch_add(ns, Ordering::Relaxed);

        if let Some(device) = self.per_device.get(index) {
            device.chunks.fetch_add(1, Ordering::Relaxed);
            device.items.fetch_add(items, Ordering::Relaxed);
            device.busy_time_ns.fetch_add(ns, Ordering::Relaxed);
        }

        let _ = self.latency_histogram.write().record(ns.max(1));
    }

    /// Record a chunk whose submission failed
    pub fn record_failure(&self, index: usize) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(device) = self.per_device.get(index) {
            device.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a job that ran to completion
    pub fn record_job(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();
        let recorded = histogram.len() > 0;

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            chunks_executed: self.chunks_executed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            avg_chunk_ns: if recorded { histogram.mean() as u64 } else { 0 },
            p50_chunk_ns: histogram.value_at_quantile(0.50),
            p99_chunk_ns: histogram.value_at_quantile(0.99),
            max_chunk_ns: histogram.max(),
            per_device: self
                .per_device
                .iter()
                .map(|d| DeviceLoad {
                    chunks: d.chunks.load(Ordering::Relaxed),
                    failed: d.failed.load(Ordering::Relaxed),
                    items: d.items.load(Ordering::Relaxed),
                    busy_time_ns: d.busy_time_ns.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.chunks_executed.store(0, Ordering::Relaxed);
        self.chunks_failed.store(0, Ordering::Relaxed);
        self.items_processed.store(0, Ordering::Relaxed);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.busy_time_ns.store(0, Ordering::Relaxed);
        for d in &self.per_device {
            d.chunks.store(0, Ordering::Relaxed);
            d.failed.store(0, Ordering::Relaxed);
            d.items.store(0, Ordering::Relaxed);
            d.busy_time_ns.store(0, Ordering::Relaxed);
        }
        self.latency_histogram.write().reset();
    }
}

/// Work done by one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceLoad {
    pub chunks: u64,
    /// Submissions that returned an error or panicked
    pub failed: u64,
    pub items: u64,
    pub busy_time_ns: u64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub jobs_completed: u64,
    pub chunks_executed: u64,
    pub chunks_failed: u64,
    pub items_processed: u64,
    pub busy_time_ns: u64,
    pub avg_chunk_ns: u64,
    pub p50_chunk_ns: u64,
    pub p99_chunk_ns: u64,
    pub max_chunk_ns: u64,
    pub per_device: Vec<DeviceLoad>,
}

impl MetricsSnapshot {
    /// Work items per second of device busy time
    pub fn items_per_second(&self) -> f64 {
        if self.busy_time_ns == 0 {
            return 0.0;
        }
        self.items_processed as f64 / (self.busy_time_ns as f64 / 1e9)
    }

    /// Share of all chunks each device executed (0.0 to 1.0)
    pub fn device_shares(&self) -> Vec<f64> {
        let total: u64 = self.per_device.iter().map(|d| d.chunks).sum();
        self.per_device
            .iter()
            .map(|d| if total == 0 { 0.0 } else { d.chunks as f64 / total as f64 })
            .collect()
    }
}
