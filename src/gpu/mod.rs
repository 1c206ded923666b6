//! GPU backend on wgpu.
//!
//! Every adapter wgpu can see becomes an [`AcceleratorDevice`]. Kernels are
//! WGSL compute shaders written against a fixed binding layout:
//!
//! ```wgsl
//! struct Launch { base_lo: u32, base_hi: u32, first: u32, count: u32 }
//!
//! @group(0) @binding(0) var<storage, read> params: array<u32>;
//! @group(0) @binding(1) var<uniform> launch: Launch;
//! @group(0) @binding(2) var<storage, read_write> output: array<u32>;
//! ```
//!
//! `params` holds the bound arguments packed with
//! [`pack_args`](crate::kernel::pack_args). One work item is
//! `base + first + global_id.x` for `global_id.x < count`, and its output
//! slot is `first + global_id.x`. The shader's `@workgroup_size` must match
//! the local size the job runs with ([`DEFAULT_WORKGROUP_SIZE`] when the
//! scheduler passes no hint).

mod buffer;
mod context;

pub use context::WgpuContext;

use crate::device::{AcceleratorDevice, DeviceClass, DeviceProvider};
use crate::error::{Error, Result};
use crate::executor::ComputeContext;
use std::collections::HashSet;
use tracing::debug;

/// Local size used when the scheduler passes no hint.
pub const DEFAULT_WORKGROUP_SIZE: u64 = 64;

const PCI_NVIDIA: u32 = 0x10DE;
const PCI_AMD: u32 = 0x1002;
const PCI_INTEL: u32 = 0x8086;
const PCI_APPLE: u32 = 0x106B;

/// Vendor string for a PCI vendor id.
pub fn vendor_name(pci_id: u32) -> String {
    match pci_id {
        PCI_NVIDIA => "NVIDIA Corporation".to_string(),
        PCI_AMD => "Advanced Micro Devices, Inc.".to_string(),
        PCI_INTEL => "Intel(R) Corporation".to_string(),
        PCI_APPLE => "Apple".to_string(),
        other => format!("{:#06x}", other),
    }
}

pub fn device_class(ty: wgpu::DeviceType) -> DeviceClass {
    match ty {
        wgpu::DeviceType::DiscreteGpu
        | wgpu::DeviceType::IntegratedGpu
        | wgpu::DeviceType::VirtualGpu => DeviceClass::Gpu,
        wgpu::DeviceType::Cpu => DeviceClass::Cpu,
        wgpu::DeviceType::Other => DeviceClass::Other,
    }
}

/// Provider enumerating wgpu adapters across every native backend.
///
/// The same physical GPU is usually reachable through more than one backend
/// (Vulkan and GL, say); only the first adapter reported for each physical
/// device is kept.
pub struct WgpuProvider {
    instance: wgpu::Instance,
    backends: wgpu::Backends,
}

impl WgpuProvider {
    pub fn new() -> Self {
        Self::with_backends(wgpu::Backends::all())
    }

    pub fn with_backends(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self { instance, backends }
    }

    fn adapters(&self) -> Vec<wgpu::Adapter> {
        let mut seen = HashSet::new();
        self.instance
            .enumerate_adapters(self.backends)
            .into_iter()
            .filter(|adapter| {
                let info = adapter.get_info();
                let fresh = seen.insert((info.vendor, info.device, info.name.clone()));
                if !fresh {
                    debug!(adapter = %info.name, backend = ?info.backend, "skipping duplicate adapter");
                }
                fresh
            })
            .collect()
    }
}

impl Default for WgpuProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WgpuProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuProvider")
            .field("backends", &self.backends)
            .finish()
    }
}

impl DeviceProvider for WgpuProvider {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn enumerate(&self) -> Result<Vec<AcceleratorDevice>> {
        Ok(self
            .adapters()
            .iter()
            .map(|adapter| {
                let info = adapter.get_info();
                let limits = adapter.limits();
                AcceleratorDevice::new(info.name.clone(), vendor_name(info.vendor), device_class(info.device_type))
                    .with_max_work_group_size(u64::from(limits.max_compute_invocations_per_workgroup))
                    .with_max_work_items(u64::from(u32::MAX))
            })
            .collect())
    }

    fn create_context(&self, device: &AcceleratorDevice) -> Result<Box<dyn ComputeContext>> {
        let adapter = self
            .adapters()
            .into_iter()
            .nth(device.id().ordinal)
            .ok_or_else(|| Error::gpu(format!("adapter for {} is gone", device)))?;

        Ok(Box::new(WgpuContext::new(device.clone(), &adapter)?))
    }
}
