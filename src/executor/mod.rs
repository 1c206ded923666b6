//! Execution side of the scheduler.
//!
//! A [`ComputeContext`] wraps one device with one bound kernel. Every
//! context is driven from its own dispatch lane, a named thread that lives
//! as long as the scheduler, and a panic raised inside a device call is
//! caught there and reported as [`Error::WorkerPanic`](crate::Error::WorkerPanic).

pub mod context;
pub(crate) mod lane;
pub(crate) mod panic_handler;

pub use context::ComputeContext;
