//! Multi-device job scheduling.
//!
//! A job moves through [`Phase::Planning`] (split the range),
//! [`Phase::Dispatching`] (hand every context its first sub-range),
//! [`Phase::Draining`] (wait for any context to finish and give it the next
//! unassigned sub-range) and [`Phase::Complete`]. Fast devices therefore
//! pick up more of the range than slow ones without any up-front weighting.
//!
//! Each context gets its own dispatch lane, started with the scheduler and
//! reused by every job, so blocking device calls run truly in parallel
//! while every piece of bookkeeping stays on the calling thread.

pub mod partition;
pub mod progress;

pub use partition::{compute_global_size, compute_local_size, split_range, split_static, WorkRange};
pub use progress::{progress_channel, ChannelSink, ProgressSink};

use crate::config::{Config, LocalSize};
use crate::device::{self, AcceleratorDevice, DeviceCatalog};
use crate::error::{Error, Result};
use crate::executor::lane::{Completion, LaneId, Lanes, SharedContext, Submission};
use crate::executor::ComputeContext;
use crate::kernel::{KernelArg, KernelTemplate};
use crate::telemetry::{Metrics, MetricsSnapshot};
use parking_lot::Mutex;
use progress::ProgressTracker;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Planning,
    Dispatching,
    Draining,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Planning => "planning",
            Phase::Dispatching => "dispatching",
            Phase::Draining => "draining",
            Phase::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Dispatcher-side bookkeeping for one job.
struct ScheduleState {
    phase: Phase,
    pending: VecDeque<WorkRange>,
    busy: Vec<Option<WorkRange>>,
    progress: ProgressTracker,
}

impl ScheduleState {
    fn new(chunks: Vec<WorkRange>, lanes: usize, progress: ProgressTracker) -> Self {
        Self {
            phase: Phase::Idle,
            pending: chunks.into(),
            busy: vec![None; lanes],
            progress,
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "job phase");
        self.phase = phase;
    }

    /// Pop the lowest unassigned sub-range and mark `lane` busy with it.
    fn assign(&mut self, lane: LaneId) -> Option<WorkRange> {
        debug_assert!(self.busy[lane].is_none(), "lane {} already has work", lane);
        let chunk = self.pending.pop_front()?;
        self.busy[lane] = Some(chunk);
        self.progress.assigned();
        trace!(lane, range = %chunk, remaining = self.pending.len(), "assigned sub-range");
        Some(chunk)
    }

    fn release(&mut self, lane: LaneId) {
        self.busy[lane] = None;
    }
}

/// Distributes work ranges over a fixed set of compute contexts.
pub struct Scheduler {
    contexts: Vec<SharedContext>,
    lanes: Lanes,
    devices: Vec<AcceleratorDevice>,
    config: Config,
    sink: Option<Arc<dyn ProgressSink>>,
    metrics: Metrics,
    phase: Phase,
}

impl Scheduler {
    /// Build a scheduler over already opened contexts.
    ///
    /// The contexts are owned by the scheduler from here on; their order is
    /// the order results are concatenated in by [`invoke_return`](Self::invoke_return).
    /// Each one gets a dispatch lane that runs until the scheduler is dropped.
    pub fn new(contexts: Vec<Box<dyn ComputeContext>>, config: Config) -> Result<Self> {
        config.validate()?;

        if contexts.is_empty() {
            return Err(Error::config("no compute contexts to schedule on"));
        }

        let devices: Vec<AcceleratorDevice> =
            contexts.iter().map(|ctx| ctx.device().clone()).collect();
        let contexts: Vec<SharedContext> = contexts
            .into_iter()
            .map(|ctx| Arc::new(Mutex::new(ctx)))
            .collect();
        let lanes = Lanes::spawn(&contexts, &config)?;

        info!(
            contexts = devices.len(),
            warp_size = device::warp_size(&devices),
            max_local_size = device::max_local_size(&devices),
            "scheduler ready"
        );

        Ok(Self {
            metrics: Metrics::new(contexts.len()),
            contexts,
            lanes,
            devices,
            config,
            sink: None,
            phase: Phase::Idle,
        })
    }

    /// Discover devices with the filter and integrated-vendor rules of
    /// `config` and open a context on each.
    pub fn from_catalog(catalog: &DeviceCatalog, config: Config) -> Result<Self> {
        let devices = catalog.discover_with(&config)?;
        if devices.is_empty() {
            return Err(Error::config(format!(
                "no devices match filter {:#06b}",
                config.device_filter.bits()
            )));
        }
        let contexts = catalog.open(&devices)?;
        Self::new(contexts, config)
    }

    pub fn devices(&self) -> &[AcceleratorDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Phase the most recent job ended in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn warp_size(&self) -> u64 {
        device::warp_size(&self.devices)
    }

    pub fn max_local_size(&self) -> u64 {
        device::max_local_size(&self.devices)
    }

    pub fn has_nvidia(&self) -> bool {
        device::has_nvidia(&self.devices)
    }

    pub fn has_amd(&self) -> bool {
        device::has_amd(&self.devices)
    }

    /// `requested` rounded up to the warp size of this device set.
    pub fn global_size(&self, requested: u64) -> Result<u64> {
        compute_global_size(requested, self.warp_size())
    }

    /// Largest work-group size dividing `global` that every device accepts.
    pub fn local_size(&self, global: u64) -> Result<u64> {
        compute_local_size(global, self.max_local_size())
    }

    /// Route progress reports to `sink`. Without one, reports are dropped.
    pub fn set_progress_sink<S: ProgressSink + 'static>(&mut self, sink: S) {
        self.sink = Some(Arc::new(sink));
    }

    pub fn clear_progress_sink(&mut self) {
        self.sink = None;
    }

    /// Compile `source` on every context. The first failure is returned.
    pub fn set_kernel(&mut self, source: &str, entry_point: &str) -> Result<()> {
        for ctx in &self.contexts {
            ctx.lock().bind_kernel(source, entry_point)?;
        }
        info!(entry_point, contexts = self.contexts.len(), "kernel bound");
        Ok(())
    }

    /// Render `template` and compile the result on every context.
    pub fn set_template(&mut self, template: KernelTemplate, entry_point: &str) -> Result<()> {
        let source = template.render()?;
        self.set_kernel(&source, entry_point)
    }

    /// Bind `args` on every context for all following jobs.
    pub fn set_parameters(&mut self, args: &[KernelArg]) -> Result<()> {
        for ctx in &self.contexts {
            ctx.lock().bind_parameters(args)?;
        }
        debug!(count = args.len(), "parameters bound");
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Run the bound kernel over `range`, split into `parts` sub-ranges and
    /// balanced across contexts as they free up. Blocks until the whole
    /// range is done.
    ///
    /// On the first failing sub-range no further work is assigned; work
    /// already submitted still runs to completion before the error is
    /// returned. An inverted range is rejected before anything is
    /// dispatched.
    pub fn invoke<R: Into<WorkRange>>(&mut self, range: R, parts: usize) -> Result<()> {
        let range = range.into();
        range.validate()?;
        let local_size = self.job_local_size(range.len())?;

        info!(range = %range, parts, contexts = self.contexts.len(), "job started");

        let outcome = if range.is_empty() {
            let mut state = ScheduleState::new(Vec::new(), 0, ProgressTracker::new(self.sink.clone(), 1));
            state.enter(Phase::Planning);
            Ok(state)
        } else if self.contexts.len() == 1 || parts <= 1 {
            self.invoke_single(range, local_size)
        } else {
            self.invoke_balanced(range, parts, local_size)
        };

        self.finish(outcome)
    }

    /// [`invoke`](Self::invoke) with `contexts * chunks_per_device` parts.
    pub fn invoke_auto<R: Into<WorkRange>>(&mut self, range: R) -> Result<()> {
        let parts = self.config.parts_for(self.contexts.len());
        self.invoke(range, parts)
    }

    fn invoke_single(&mut self, range: WorkRange, local_size: Option<u64>) -> Result<ScheduleState> {
        let mut state = ScheduleState::new(vec![range], 1, ProgressTracker::new(self.sink.clone(), 1));
        state.enter(Phase::Planning);
        state.enter(Phase::Dispatching);
        state.assign(0);

        self.lanes.submit(0, Submission::execute(range, local_size))?;
        state.enter(Phase::Draining);

        let done = self.lanes.wait_any()?;
        state.release(done.lane);
        record_completion(&self.metrics, done)?;
        Ok(state)
    }

    fn invoke_balanced(
        &mut self,
        range: WorkRange,
        parts: usize,
        local_size: Option<u64>,
    ) -> Result<ScheduleState> {
        let chunks = split_range(range.len(), parts)?
            .into_iter()
            .map(|chunk| chunk.offset(range.start))
            .collect::<Result<Vec<WorkRange>>>()?;

        let total = chunks.len();
        let mut state = ScheduleState::new(
            chunks,
            self.contexts.len(),
            ProgressTracker::new(self.sink.clone(), total),
        );
        state.enter(Phase::Planning);
        debug!(sub_ranges = total, "range split");

        let lanes = &mut self.lanes;
        let metrics = &self.metrics;
        let mut failure: Option<Error> = None;

        state.enter(Phase::Dispatching);
        for lane in 0..lanes.len() {
            let chunk = match state.assign(lane) {
                Some(chunk) => chunk,
                None => break,
            };
            if let Err(e) = lanes.submit(lane, Submission::execute(chunk, local_size)) {
                state.release(lane);
                failure = Some(e);
                break;
            }
        }

        state.enter(Phase::Draining);
        while lanes.in_flight() > 0 {
            let done = lanes.wait_any()?;
            let lane = done.lane;
            state.release(lane);

            if let Err(e) = record_completion(metrics, done) {
                failure.get_or_insert(e);
            }
            if failure.is_some() {
                continue;
            }

            if let Some(chunk) = state.assign(lane) {
                if let Err(e) = lanes.submit(lane, Submission::execute(chunk, local_size)) {
                    state.release(lane);
                    failure = Some(e);
                }
            }
        }

        failure.map_or(Ok(state), Err)
    }

    /// Run the bound kernel over `[0, work_size)` with every context at once
    /// and return the concatenated output buffers.
    ///
    /// The range is split into one share per context (remainder on the last
    /// one) and each context writes `outputs_per_item` values of `T` per
    /// work item. Buffers are joined in context order, so the result is
    /// ordered by work item regardless of which device finished first.
    pub fn invoke_return<T: bytemuck::Pod>(
        &mut self,
        work_size: u64,
        local_size: Option<u64>,
        outputs_per_item: usize,
    ) -> Result<Vec<T>> {
        let item_bytes = std::mem::size_of::<T>()
            .checked_mul(outputs_per_item)
            .ok_or_else(|| Error::partition("output size per work item overflows"))?;
        if item_bytes == 0 {
            return Err(Error::partition("output size per work item is zero"));
        }

        info!(work_size, outputs_per_item, contexts = self.contexts.len(), "returning job started");

        let n = self.contexts.len();
        let mut state = ScheduleState::new(Vec::new(), n, ProgressTracker::new(self.sink.clone(), n));
        state.enter(Phase::Planning);

        let shares = split_static(work_size, n)?;
        let lens = shares
            .iter()
            .map(|share| output_bytes(share.len(), item_bytes))
            .collect::<Result<Vec<usize>>>()?;

        let mut buffers: Vec<Option<Vec<u8>>> = vec![None; n];
        let mut failure: Option<Error> = None;

        state.enter(Phase::Dispatching);
        for (lane, share) in shares.iter().enumerate() {
            if share.is_empty() {
                continue;
            }
            trace!(lane, range = %share, bytes = lens[lane], "static share");
            if let Err(e) = self.lanes.submit(lane, Submission::execute_return(*share, local_size, lens[lane])) {
                failure = Some(e);
                break;
            }
        }

        state.enter(Phase::Draining);
        while self.lanes.in_flight() > 0 {
            let done = self.lanes.wait_any()?;
            let lane = done.lane;
            let expected = lens[lane];

            let bytes = match done.outcome {
                Ok(Some(bytes)) if bytes.len() == expected => Ok(bytes),
                Ok(Some(bytes)) => Err(Error::execution(
                    self.devices[lane].name(),
                    format!("returned {} bytes, expected {}", bytes.len(), expected),
                )),
                Ok(None) => Err(Error::execution(self.devices[lane].name(), "no output buffer returned")),
                Err(e) => Err(e),
            };

            match bytes {
                Ok(bytes) => {
                    self.metrics.record_chunk(lane, done.range.len(), done.elapsed);
                    buffers[lane] = Some(bytes);
                }
                Err(e) => {
                    self.metrics.record_failure(lane);
                    warn!(lane, range = %done.range, error = %e, "share failed");
                    failure.get_or_insert(e);
                }
            }
        }

        let mut joined = Vec::new();
        let outcome = failure.map_or(Ok(()), Err).map(|_| {
            joined.reserve(lens.iter().sum());
            for buffer in buffers {
                if let Some(bytes) = buffer {
                    joined.extend_from_slice(&bytes);
                }
                state.progress.assigned();
            }
            state
        });

        self.finish(outcome)?;
        Ok(bytemuck::pod_collect_to_vec(&joined))
    }

    fn job_local_size(&self, len: u64) -> Result<Option<u64>> {
        match self.config.local_size {
            LocalSize::DeviceDefault => Ok(None),
            LocalSize::Fixed(size) => Ok(Some(size)),
            LocalSize::Auto if len == 0 => Ok(None),
            LocalSize::Auto => {
                let global = self.global_size(len)?;
                Ok(Some(self.local_size(global)?))
            }
        }
    }

    fn finish(&mut self, outcome: Result<ScheduleState>) -> Result<()> {
        match outcome {
            Ok(mut state) => {
                state.enter(Phase::Complete);
                state.progress.complete();
                self.metrics.record_job();
                self.phase = Phase::Complete;
                info!(sub_ranges = state.progress.started(), "job complete");
                Ok(())
            }
            Err(e) => {
                self.phase = Phase::Draining;
                warn!(error = %e, "job aborted");
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("devices", &self.devices)
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("progress_sink", &self.sink.is_some())
            .finish()
    }
}

fn record_completion(metrics: &Metrics, done: Completion) -> Result<()> {
    match done.outcome {
        Ok(_) => {
            metrics.record_chunk(done.lane, done.range.len(), done.elapsed);
            trace!(lane = done.lane, range = %done.range, elapsed = ?done.elapsed, "sub-range done");
            Ok(())
        }
        Err(e) => {
            metrics.record_failure(done.lane);
            warn!(lane = done.lane, range = %done.range, error = %e, "sub-range failed");
            Err(e)
        }
    }
}

fn output_bytes(items: u64, item_bytes: usize) -> Result<usize> {
    usize::try_from(items)
        .ok()
        .and_then(|items| items.checked_mul(item_bytes))
        .ok_or_else(|| Error::partition(format!("output buffer for {} items does not fit in memory", items)))
}
