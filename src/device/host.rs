//! Host CPU backend.
//!
//! Kernels are ordinary Rust functions registered under an entry-point
//! name. Binding a kernel "compiles" it by looking the entry point up; the
//! source text is handed to the kernel on every launch so templated
//! constants remain visible to it.

use super::{AcceleratorDevice, DeviceClass, DeviceProvider};
use crate::error::{Error, Result};
use crate::executor::ComputeContext;
use crate::kernel::KernelArg;
use crate::scheduler::WorkRange;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const HOST_MAX_WORK_GROUP: u64 = 1024;

/// Everything a host kernel sees for one launch.
#[derive(Debug, Clone, Copy)]
pub struct HostLaunch<'a> {
    pub device: &'a AcceleratorDevice,
    pub source: &'a str,
    pub args: &'a [KernelArg],
    pub range: WorkRange,
    pub local_size: u64,
}

/// A kernel body runnable on the host.
pub trait HostKernel: Send + Sync {
    /// Process every work item in `launch.range`, writing into `output`
    /// when the launch reads a buffer back (it is empty otherwise).
    fn run(&self, launch: &HostLaunch<'_>, output: &mut [u8]) -> std::result::Result<(), String>;
}

impl<F> HostKernel for F
where
    F: Fn(&HostLaunch<'_>, &mut [u8]) -> std::result::Result<(), String> + Send + Sync,
{
    fn run(&self, launch: &HostLaunch<'_>, output: &mut [u8]) -> std::result::Result<(), String> {
        self(launch, output)
    }
}

type KernelRegistry = Arc<RwLock<HashMap<String, Arc<dyn HostKernel>>>>;

/// Provider exposing one or more host CPU "devices".
///
/// Several instances are useful to split a job across independent host
/// threads, and to exercise the scheduler without accelerator hardware.
#[derive(Clone)]
pub struct HostProvider {
    devices: Vec<AcceleratorDevice>,
    kernels: KernelRegistry,
}

impl HostProvider {
    /// A single device covering the whole host.
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    /// `count` host devices sharing the machine's cores.
    pub fn with_devices(count: usize) -> Self {
        let cores = num_cpus::get() as u32;
        let devices = (0..count)
            .map(|i| {
                let name = if count == 1 {
                    "Host CPU".to_string()
                } else {
                    format!("Host CPU #{}", i)
                };
                AcceleratorDevice::new(name, "host", DeviceClass::Cpu)
                    .with_max_work_group_size(HOST_MAX_WORK_GROUP)
                    .with_compute_units((cores / count.max(1) as u32).max(1))
            })
            .collect();

        Self {
            devices,
            kernels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Replace the advertised devices, e.g. to model a mixed machine.
    pub fn with_device_list(mut self, devices: Vec<AcceleratorDevice>) -> Self {
        self.devices = devices;
        self
    }

    /// Register `kernel` under `entry_point`.
    pub fn register<K: HostKernel + 'static>(self, entry_point: &str, kernel: K) -> Self {
        self.kernels
            .write()
            .insert(entry_point.to_string(), Arc::new(kernel));
        self
    }

    pub fn kernel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kernels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HostProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProvider")
            .field("devices", &self.devices)
            .field("kernels", &self.kernel_names())
            .finish()
    }
}

impl DeviceProvider for HostProvider {
    fn name(&self) -> &str {
        "host"
    }

    fn enumerate(&self) -> Result<Vec<AcceleratorDevice>> {
        Ok(self.devices.clone())
    }

    fn create_context(&self, device: &AcceleratorDevice) -> Result<Box<dyn ComputeContext>> {
        Ok(Box::new(HostContext {
            device: device.clone(),
            registry: Arc::clone(&self.kernels),
            bound: None,
            args: Vec::new(),
        }))
    }
}

struct BoundKernel {
    entry_point: String,
    source: String,
    kernel: Arc<dyn HostKernel>,
}

/// Context running a registered host kernel on the calling thread.
pub struct HostContext {
    device: AcceleratorDevice,
    registry: KernelRegistry,
    bound: Option<BoundKernel>,
    args: Vec<KernelArg>,
}

impl HostContext {
    fn launch(&self, range: WorkRange, local_size: Option<u64>, output: &mut [u8]) -> Result<()> {
        let bound = self
            .bound
            .as_ref()
            .ok_or_else(|| Error::execution(self.device.name(), "no kernel bound"))?;

        if range.len() > self.device.max_work_items() {
            return Err(Error::execution(
                self.device.name(),
                format!(
                    "range {} exceeds {} addressable work items",
                    range,
                    self.device.max_work_items()
                ),
            ));
        }

        let local_size = local_size.unwrap_or(1);
        if local_size == 0 || local_size > self.device.max_work_group_size() {
            return Err(Error::execution(
                self.device.name(),
                format!("invalid local size {}", local_size),
            ));
        }

        let launch = HostLaunch {
            device: &self.device,
            source: &bound.source,
            args: &self.args,
            range,
            local_size,
        };

        bound
            .kernel
            .run(&launch, output)
            .map_err(|msg| Error::execution(self.device.name(), format!("{}: {}", bound.entry_point, msg)))
    }
}

impl ComputeContext for HostContext {
    fn device(&self) -> &AcceleratorDevice {
        &self.device
    }

    fn bind_kernel(&mut self, source: &str, entry_point: &str) -> Result<()> {
        if source.trim().is_empty() {
            return Err(Error::compile(self.device.name(), "empty kernel source"));
        }

        let kernel = self.registry.read().get(entry_point).cloned().ok_or_else(|| {
            Error::compile(
                self.device.name(),
                format!("no host kernel registered for entry point `{}`", entry_point),
            )
        })?;

        debug!(device = self.device.name(), entry_point, "bound host kernel");
        self.bound = Some(BoundKernel {
            entry_point: entry_point.to_string(),
            source: source.to_string(),
            kernel,
        });
        Ok(())
    }

    fn bind_parameters(&mut self, args: &[KernelArg]) -> Result<()> {
        self.args = args.to_vec();
        Ok(())
    }

    fn execute(&mut self, range: WorkRange, local_size: Option<u64>) -> Result<()> {
        self.launch(range, local_size, &mut [])
    }

    fn execute_return(
        &mut self,
        range: WorkRange,
        local_size: Option<u64>,
        output_len: usize,
    ) -> Result<Vec<u8>> {
        let mut output = vec![0u8; output_len];
        self.launch(range, local_size, &mut output)?;
        Ok(output)
    }
}
