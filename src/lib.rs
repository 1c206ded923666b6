//! multidev - run one compute kernel across every device in the machine
//!
//! A job is a contiguous range of work items. The scheduler splits it into
//! sub-ranges and keeps every device busy: whenever a device finishes a
//! sub-range it is handed the next unassigned one, so a fast discrete GPU
//! ends up doing most of the work while a slower device still contributes.
//!
//! # Quick Start
//!
//! ```no_run
//! use multidev_rs::prelude::*;
//!
//! let provider = HostProvider::with_devices(4).register(
//!     "count",
//!     |_: &HostLaunch<'_>, _: &mut [u8]| Ok::<(), String>(()),
//! );
//! let catalog = DeviceCatalog::new().with_provider(provider);
//!
//! let mut scheduler = Scheduler::from_catalog(&catalog, Config::default()).unwrap();
//! scheduler.set_kernel("count", "count").unwrap();
//! scheduler.set_progress_sink(|p: f64| println!("{:.0}%", p * 100.0));
//! scheduler.invoke(0u64..1_000_000, 16).unwrap();
//! ```
//!
//! # Features
//!
//! - **Device Catalog**: discovery across backends with class filtering and
//!   integrated-GPU exclusion
//! - **Partition Planner**: global/local work sizes and range splitting
//! - **Work Stealing**: greedy wait-any assignment over per-device lanes
//! - **Ordered Results**: static split with buffers joined in device order
//! - **Telemetry**: per-device load and chunk latency (optional)
//! - **GPU Support**: WGSL kernels on every wgpu adapter (optional)

pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod kernel;
pub mod keyspace;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use config::{Config, ConfigBuilder, LocalSize};
pub use device::{AcceleratorDevice, DeviceCatalog, DeviceClass, DeviceFilter};
pub use error::{Error, Result};
pub use scheduler::{Phase, Scheduler, WorkRange};
