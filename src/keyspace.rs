//! Sweeps over keyspaces larger than one job.
//!
//! A single job covers at most `u32::MAX` work items, so a 64-bit keyspace
//! is walked in passes. Before each pass the search parameters are rebound
//! with the number of items already covered; the kernel derives its
//! starting keys from that offset.

use crate::error::{Error, Result};
use crate::kernel::SearchParams;
use crate::scheduler::{Scheduler, WorkRange};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Largest number of work items handed to the scheduler in one pass.
pub const DEFAULT_PASS_SIZE: u64 = u32::MAX as u64;

/// Progress of one finished pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassReport {
    pub index: u64,
    pub passes: u64,
    pub range: WorkRange,
    /// Items covered after this pass, counted from the start of the keyspace.
    pub completed: u64,
    pub lower: u64,
    pub upper: u64,
    pub elapsed: Duration,
    pub total_elapsed: Duration,
}

impl PassReport {
    /// Average items per second since the sweep started.
    pub fn items_per_second(&self, started_at: u64) -> f64 {
        let secs = self.total_elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.completed - started_at) as f64 / secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSummary {
    pub passes: u64,
    pub completed: u64,
    pub elapsed: Duration,
}

/// Walks `[params.completed, total)` in passes of at most `pass_size` items.
#[derive(Debug, Clone)]
pub struct KeyspaceSweep {
    total: u64,
    pass_size: u64,
    params: SearchParams,
}

impl KeyspaceSweep {
    pub fn new(total: u64, params: SearchParams) -> Self {
        Self {
            total,
            pass_size: DEFAULT_PASS_SIZE,
            params,
        }
    }

    pub fn with_pass_size(mut self, pass_size: u64) -> Result<Self> {
        if pass_size == 0 {
            return Err(Error::config("pass size must be > 0"));
        }
        self.pass_size = pass_size;
        Ok(self)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn pass_size(&self) -> u64 {
        self.pass_size
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.params.completed)
    }

    /// Passes left to run.
    pub fn passes(&self) -> u64 {
        let remaining = self.remaining();
        remaining / self.pass_size + u64::from(remaining % self.pass_size != 0)
    }

    /// Run every remaining pass on `scheduler`, calling `on_pass` after each.
    ///
    /// The completed count advances after every pass, so a sweep stopped by
    /// an error can be resumed from [`params`](Self::params).
    pub fn run<F>(&mut self, scheduler: &mut Scheduler, mut on_pass: F) -> Result<SweepSummary>
    where
        F: FnMut(&PassReport),
    {
        let passes = self.passes();
        let started_at = self.params.completed;
        let sweep_start = Instant::now();

        info!(
            total = self.total,
            remaining = self.remaining(),
            passes,
            pass_size = self.pass_size,
            "keyspace sweep started"
        );

        for index in 0..passes {
            let size = self.remaining().min(self.pass_size);
            let range = WorkRange::new(0, size);
            let pass_start = Instant::now();

            scheduler.set_parameters(&self.params.to_args())?;
            scheduler.invoke_auto(range)?;
            self.params.advance(size);

            let (lower, upper) = self.params.current_offsets();
            let report = PassReport {
                index,
                passes,
                range,
                completed: self.params.completed,
                lower,
                upper,
                elapsed: pass_start.elapsed(),
                total_elapsed: sweep_start.elapsed(),
            };
            debug!(
                pass = index,
                completed = report.completed,
                rate = report.items_per_second(started_at),
                "pass complete"
            );
            on_pass(&report);
        }

        let summary = SweepSummary {
            passes,
            completed: self.params.completed,
            elapsed: sweep_start.elapsed(),
        };
        info!(passes, completed = summary.completed, elapsed = ?summary.elapsed, "keyspace sweep complete");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::device::{DeviceProvider, HostLaunch, HostProvider};
    use crate::kernel::{IncrementMode, KernelArg};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_pass_count() {
        let params = SearchParams::new(0, 0, IncrementMode::NONE);
        let sweep = KeyspaceSweep::new(10, params).with_pass_size(4).unwrap();
        assert_eq!(sweep.passes(), 3);

        let sweep = KeyspaceSweep::new(u64::MAX, params);
        assert_eq!(sweep.passes(), u64::MAX / DEFAULT_PASS_SIZE);

        assert!(KeyspaceSweep::new(1, params).with_pass_size(0).is_err());
    }

    #[test]
    fn test_resume_from_completed() {
        let mut params = SearchParams::new(0, 0, IncrementMode::NONE);
        params.advance(6);
        let sweep = KeyspaceSweep::new(10, params).with_pass_size(4).unwrap();
        assert_eq!(sweep.remaining(), 4);
        assert_eq!(sweep.passes(), 1);
    }

    #[test]
    fn test_sweep_rebinds_completed_each_pass() {
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&offsets);

        let provider = HostProvider::with_devices(2).register(
            "sweep",
            move |launch: &HostLaunch<'_>, _: &mut [u8]| -> std::result::Result<(), String> {
                if let Some(KernelArg::U64(completed)) = launch.args.get(3) {
                    seen.lock().push((*completed, launch.range));
                }
                Ok(())
            },
        );
        let contexts = provider
            .enumerate()
            .unwrap()
            .iter()
            .map(|d| provider.create_context(d).unwrap())
            .collect();
        let mut scheduler = Scheduler::new(contexts, Config::default()).unwrap();
        scheduler.set_kernel("sweep", "sweep").unwrap();

        let params = SearchParams::new(100, 200, IncrementMode::LOWER);
        let mut sweep = KeyspaceSweep::new(10, params).with_pass_size(4).unwrap();

        let mut reports = Vec::new();
        let summary = sweep.run(&mut scheduler, |r| reports.push(*r)).unwrap();

        assert_eq!(summary.passes, 3);
        assert_eq!(summary.completed, 10);
        assert_eq!(
            reports.iter().map(|r| r.completed).collect::<Vec<_>>(),
            vec![4, 8, 10]
        );
        assert_eq!(reports[2].range, WorkRange::new(0, 2));
        assert_eq!((reports[0].lower, reports[0].upper), (104, 200));

        let mut offsets = offsets.lock().clone();
        offsets.sort();
        let completed: Vec<u64> = offsets.iter().map(|(c, _)| *c).collect();
        assert_eq!(completed, vec![0, 0, 4, 4, 8, 8]);
    }
}
