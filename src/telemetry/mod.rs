//! Telemetry for scheduler jobs.
//!
//! Counts chunks and work items per device and keeps a chunk latency
//! histogram, so callers can see how the work-stealing loop actually spread
//! a job across fast and slow devices.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub use metrics::{DeviceLoad, Metrics, MetricsSnapshot};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub struct Metrics;

    impl Metrics {
        pub fn new(_: usize) -> Self { Self }
        pub fn record_chunk(&self, _: usize, _: u64, _: Duration) {}
        pub fn record_failure(&self, _: usize) {}
        pub fn record_job(&self) {}
        pub fn snapshot(&self) -> MetricsSnapshot { MetricsSnapshot::default() }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DeviceLoad {
        pub chunks: u64,
        pub failed: u64,
        pub items: u64,
        pub busy_time_ns: u64,
    }

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
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{DeviceLoad, Metrics, MetricsSnapshot};
