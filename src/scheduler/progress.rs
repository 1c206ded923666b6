//! Progress notification.
//!
//! A job reports a value in `[0.0, 1.0]` that never decreases and ends at
//! exactly `1.0` when the job completes. Nobody has to listen: a scheduler
//! without a sink simply skips the reports.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

/// Receiver of progress reports.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(f64) + Send + Sync,
{
    fn report(&self, progress: f64) {
        self(progress)
    }
}

/// Sink forwarding every report into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<f64>,
}

impl ProgressSink for ChannelSink {
    fn report(&self, progress: f64) {
        // a dropped receiver just means nobody is watching
        let _ = self.tx.send(progress);
    }
}

/// A sink and the receiver the caller reads reports from.
pub fn progress_channel() -> (ChannelSink, Receiver<f64>) {
    let (tx, rx) = unbounded();
    (ChannelSink { tx }, rx)
}

/// Per-job progress bookkeeping.
///
/// One report per sub-range: assignments `1..n-1` report `started / n`, and
/// the report for the last one is held back until the job has drained, so
/// the final `1.0` always means every sub-range finished.
pub(crate) struct ProgressTracker {
    sink: Option<Arc<dyn ProgressSink>>,
    total: usize,
    started: usize,
    last: f64,
}

impl ProgressTracker {
    pub fn new(sink: Option<Arc<dyn ProgressSink>>, total: usize) -> Self {
        Self {
            sink,
            total,
            started: 0,
            last: 0.0,
        }
    }

    /// Record one more sub-range handed to a device.
    pub fn assigned(&mut self) {
        self.started += 1;
        if self.started < self.total {
            self.emit(self.started as f64 / self.total as f64);
        }
    }

    pub fn started(&self) -> usize {
        self.started
    }

    pub fn complete(&mut self) {
        self.emit(1.0);
    }

    fn emit(&mut self, value: f64) {
        let value = value.clamp(self.last, 1.0);
        self.last = value;
        if let Some(sink) = &self.sink {
            sink.report(value);
        }
    }
}
