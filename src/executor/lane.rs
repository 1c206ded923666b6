// dispatch lanes: one long-lived named thread per compute context
use super::context::ComputeContext;
use super::panic_handler::catch_panic;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::scheduler::WorkRange;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub(crate) type LaneId = usize;

/// A context shared between the scheduler, which binds kernels and
/// parameters between jobs, and the lane that executes on it during a job.
pub(crate) type SharedContext = Arc<Mutex<Box<dyn ComputeContext>>>;

/// One blocking call to issue on a lane's context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Submission {
    pub range: WorkRange,
    pub local_size: Option<u64>,
    /// `Some(bytes)` reads back an output buffer of that size.
    pub output_len: Option<usize>,
}

impl Submission {
    pub fn execute(range: WorkRange, local_size: Option<u64>) -> Self {
        Self {
            range,
            local_size,
            output_len: None,
        }
    }

    pub fn execute_return(range: WorkRange, local_size: Option<u64>, output_len: usize) -> Self {
        Self {
            range,
            local_size,
            output_len: Some(output_len),
        }
    }
}

/// Outcome of one submission, sent back to the dispatcher.
#[derive(Debug)]
pub(crate) struct Completion {
    pub lane: LaneId,
    pub range: WorkRange,
    pub outcome: Result<Option<Vec<u8>>>,
    pub elapsed: Duration,
}

/// Dispatch threads, one per context, alive as long as the scheduler.
///
/// The dispatcher only submits to a lane after it reported back, so no
/// context ever has two invocations outstanding. Every job waits until
/// `in_flight` is back to zero before returning.
pub(crate) struct Lanes {
    senders: Vec<Sender<Submission>>,
    completions: Receiver<Completion>,
    threads: Vec<JoinHandle<()>>,
    in_flight: usize,
}

impl Lanes {
    pub fn spawn(contexts: &[SharedContext], config: &Config) -> Result<Self> {
        let (done_tx, done_rx) = unbounded();
        let mut senders = Vec::with_capacity(contexts.len());
        let mut threads = Vec::with_capacity(contexts.len());

        for (lane, ctx) in contexts.iter().enumerate() {
            let (tx, rx) = bounded::<Submission>(1);
            let done = done_tx.clone();
            let ctx = Arc::clone(ctx);

            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, lane));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            threads.push(builder.spawn(move || run_lane(lane, ctx, rx, done))?);
            senders.push(tx);
        }

        debug!(lanes = threads.len(), prefix = %config.thread_name_prefix, "dispatch lanes started");

        Ok(Self {
            senders,
            completions: done_rx,
            threads,
            in_flight: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn submit(&mut self, lane: LaneId, submission: Submission) -> Result<()> {
        let sender = self
            .senders
            .get(lane)
            .ok_or_else(|| Error::WorkerPanic(format!("no lane {}", lane)))?;

        sender
            .send(submission)
            .map_err(|_| Error::WorkerPanic(format!("lane {} exited", lane)))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Block until any in-flight submission finishes.
    pub fn wait_any(&mut self) -> Result<Completion> {
        if self.in_flight == 0 {
            return Err(Error::WorkerPanic("wait on lanes with nothing in flight".into()));
        }

        match self.completions.recv() {
            Ok(completion) => {
                self.in_flight -= 1;
                Ok(completion)
            }
            Err(_) => {
                // nothing can report back any more
                self.in_flight = 0;
                Err(Error::WorkerPanic("every lane exited with work in flight".into()))
            }
        }
    }
}

impl Drop for Lanes {
    fn drop(&mut self) {
        // lanes exit once their submission channel closes
        self.senders.clear();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("dispatch lane terminated abnormally");
            }
        }
    }
}

fn run_lane(
    lane: LaneId,
    ctx: SharedContext,
    submissions: Receiver<Submission>,
    done: Sender<Completion>,
) {
    let label = ctx.lock().label().to_string();

    for submission in submissions.iter() {
        trace!(lane, context = %label, range = %submission.range, "submission started");
        let start = Instant::now();

        let outcome = {
            let mut ctx = ctx.lock();
            catch_panic(&label, || match submission.output_len {
                None => ctx
                    .execute(submission.range, submission.local_size)
                    .map(|_| None),
                Some(len) => ctx
                    .execute_return(submission.range, submission.local_size, len)
                    .map(Some),
            })
            .and_then(|r| r)
        };

        let completion = Completion {
            lane,
            range: submission.range,
            outcome,
            elapsed: start.elapsed(),
        };

        if done.send(completion).is_err() {
            break;
        }
    }

    trace!(lane, context = %label, "lane exited");
}
