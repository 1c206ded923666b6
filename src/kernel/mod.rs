//! Kernel source preparation and invocation arguments.
//!
//! The kernel program itself is opaque to the scheduler. This module covers
//! the two steps that happen around it: filling placeholders into the source
//! before compilation, and building the argument list bound to each context.

pub mod args;
pub mod search;
pub mod template;

pub use args::{pack_args, KernelArg};
pub use search::{IncrementMode, SearchParams};
pub use template::KernelTemplate;
