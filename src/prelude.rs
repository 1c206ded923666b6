pub use crate::config::{Config, ConfigBuilder, LocalSize};
pub use crate::device::{
    AcceleratorDevice, DeviceCatalog, DeviceClass, DeviceFilter, DeviceProvider, HostKernel,
    HostLaunch, HostProvider,
};
pub use crate::error::{Error, Result};
pub use crate::executor::ComputeContext;
pub use crate::kernel::{IncrementMode, KernelArg, KernelTemplate, SearchParams};
pub use crate::keyspace::{KeyspaceSweep, PassReport, SweepSummary};
pub use crate::scheduler::{progress_channel, Phase, ProgressSink, Scheduler, WorkRange};

pub use crate::telemetry::MetricsSnapshot;

#[cfg(feature = "gpu")]
pub use crate::gpu::WgpuProvider;
