//! Device discovery and filtering.
//!
//! A [`DeviceCatalog`] enumerates accelerators through one or more
//! [`DeviceProvider`]s, keeps the ones whose class is selected by a
//! [`DeviceFilter`], and drops integrated GPUs when a discrete one is
//! available. The result is a plain list handed to the scheduler; there is
//! no global device registry.

pub mod host;

pub use host::{HostKernel, HostLaunch, HostProvider};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::ComputeContext;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use tracing::{debug, info};

/// Broad class of a compute device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Cpu,
    Gpu,
    Accelerator,
    Other,
}

impl DeviceClass {
    pub const fn filter(self) -> DeviceFilter {
        match self {
            DeviceClass::Cpu => DeviceFilter::CPU,
            DeviceClass::Gpu => DeviceFilter::GPU,
            DeviceClass::Accelerator => DeviceFilter::ACCELERATOR,
            DeviceClass::Other => DeviceFilter::OTHER,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Cpu => "CPU",
            DeviceClass::Gpu => "GPU",
            DeviceClass::Accelerator => "Accelerator",
            DeviceClass::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Bitmask of acceptable device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceFilter(u32);

impl DeviceFilter {
    pub const CPU: Self = Self(1 << 0);
    pub const GPU: Self = Self(1 << 1);
    pub const ACCELERATOR: Self = Self(1 << 2);
    pub const OTHER: Self = Self(1 << 3);
    pub const ALL: Self = Self(0b1111);

    /// Build a filter from raw bits. Zero and unknown bits are rejected.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits == 0 {
            return Err(Error::config("device filter selects no device class"));
        }
        if bits & !Self::ALL.0 != 0 {
            return Err(Error::config(format!(
                "device filter has unknown bits {:#x}",
                bits & !Self::ALL.0
            )));
        }
        Ok(Self(bits))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, class: DeviceClass) -> bool {
        self.0 & class.filter().0 != 0
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        DeviceFilter::ALL
    }
}

impl BitOr for DeviceFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DeviceFilter {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Stable identity of a device: which provider found it, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId {
    pub provider: usize,
    pub ordinal: usize,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.ordinal)
    }
}

/// Metadata of one discovered accelerator. Immutable after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorDevice {
    id: DeviceId,
    name: String,
    vendor: String,
    class: DeviceClass,
    max_work_group_size: u64,
    max_work_items: u64,
    compute_units: u32,
}

impl AcceleratorDevice {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, vendor: V, class: DeviceClass) -> Self {
        Self {
            id: DeviceId {
                provider: 0,
                ordinal: 0,
            },
            name: name.into(),
            vendor: vendor.into(),
            class,
            max_work_group_size: 1,
            max_work_items: u64::MAX,
            compute_units: 1,
        }
    }

    pub fn with_max_work_group_size(mut self, size: u64) -> Self {
        self.max_work_group_size = size.max(1);
        self
    }

    pub fn with_max_work_items(mut self, items: u64) -> Self {
        self.max_work_items = items;
        self
    }

    pub fn with_compute_units(mut self, units: u32) -> Self {
        self.compute_units = units;
        self
    }

    pub(crate) fn with_id(mut self, id: DeviceId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn max_work_group_size(&self) -> u64 {
        self.max_work_group_size
    }

    pub fn max_work_items(&self) -> u64 {
        self.max_work_items
    }

    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// Case-insensitive substring match on the vendor string.
    pub fn is_vendor(&self, needle: &str) -> bool {
        self.vendor.to_lowercase().contains(&needle.to_lowercase())
    }

    pub fn is_nvidia(&self) -> bool {
        self.is_vendor("nvidia")
    }

    pub fn is_amd(&self) -> bool {
        self.is_vendor("amd") || self.is_vendor("advanced micro devices")
    }
}

impl fmt::Display for AcceleratorDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.vendor, self.class)
    }
}

/// A device API backend: enumerates devices and opens contexts on them.
pub trait DeviceProvider: Send + Sync {
    /// Backend name used in logs.
    fn name(&self) -> &str;

    /// Every device this backend can see, in a stable order.
    fn enumerate(&self) -> Result<Vec<AcceleratorDevice>>;

    /// Open a fresh context on a device previously returned by `enumerate`.
    fn create_context(&self, device: &AcceleratorDevice) -> Result<Box<dyn ComputeContext>>;
}

/// Enumerates devices across providers and applies the selection rules.
pub struct DeviceCatalog {
    providers: Vec<Arc<dyn DeviceProvider>>,
    integrated_vendors: Vec<String>,
    exclude_integrated: bool,
}

impl DeviceCatalog {
    /// Catalog with no providers; add some with [`with_provider`](Self::with_provider).
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            integrated_vendors: vec!["intel".to_string()],
            exclude_integrated: true,
        }
    }

    /// Catalog over the host CPU only.
    pub fn host() -> Self {
        Self::new().with_provider(HostProvider::new())
    }

    /// Catalog over every backend compiled in.
    pub fn system() -> Self {
        #[allow(unused_mut)]
        let mut catalog = Self::host();

        #[cfg(feature = "gpu")]
        {
            catalog = catalog.with_provider(crate::gpu::WgpuProvider::new());
        }

        catalog
    }

    pub fn with_provider<P: DeviceProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn with_shared_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Take the exclusion settings from `config`.
    pub fn configure(mut self, config: &Config) -> Self {
        self.integrated_vendors = config.integrated_vendors.clone();
        self.exclude_integrated = config.exclude_integrated;
        self
    }

    pub fn providers(&self) -> usize {
        self.providers.len()
    }

    /// Devices selected by `filter`, in provider then enumeration order.
    ///
    /// Returns an empty list when nothing matches; whether that is fatal is
    /// up to the caller.
    pub fn discover(&self, filter: DeviceFilter) -> Result<Vec<AcceleratorDevice>> {
        self.select(filter, self.exclude_integrated, &self.integrated_vendors)
    }

    /// Like [`discover`](Self::discover), with the filter and the
    /// integrated-vendor rules taken from `config` instead of this catalog.
    pub fn discover_with(&self, config: &Config) -> Result<Vec<AcceleratorDevice>> {
        self.select(
            config.device_filter,
            config.exclude_integrated,
            &config.integrated_vendors,
        )
    }

    fn select(
        &self,
        filter: DeviceFilter,
        exclude: bool,
        integrated_vendors: &[String],
    ) -> Result<Vec<AcceleratorDevice>> {
        let mut devices = Vec::new();

        for (provider_index, provider) in self.providers.iter().enumerate() {
            let found = provider.enumerate()?;
            debug!(provider = provider.name(), count = found.len(), "enumerated devices");

            for (ordinal, device) in found.into_iter().enumerate() {
                if filter.contains(device.class()) {
                    devices.push(device.with_id(DeviceId {
                        provider: provider_index,
                        ordinal,
                    }));
                }
            }
        }

        if exclude {
            devices = exclude_integrated(devices, filter, integrated_vendors);
        }

        for device in &devices {
            info!(id = %device.id(), device = %device, "selected device");
        }

        Ok(devices)
    }

    /// Open one context per device, in order.
    pub fn open(&self, devices: &[AcceleratorDevice]) -> Result<Vec<Box<dyn ComputeContext>>> {
        devices
            .iter()
            .map(|device| {
                let provider = self.providers.get(device.id().provider).ok_or_else(|| {
                    Error::config(format!("device {} has no provider in this catalog", device.id()))
                })?;
                provider.create_context(device)
            })
            .collect()
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("integrated_vendors", &self.integrated_vendors)
            .field("exclude_integrated", &self.exclude_integrated)
            .finish()
    }
}

/// Drop integrated-vendor devices from a GPU-only selection when at least
/// one other device remains. Never empties the list.
pub fn exclude_integrated(
    devices: Vec<AcceleratorDevice>,
    filter: DeviceFilter,
    integrated_vendors: &[String],
) -> Vec<AcceleratorDevice> {
    if filter != DeviceFilter::GPU || integrated_vendors.is_empty() {
        return devices;
    }

    let is_integrated =
        |d: &AcceleratorDevice| integrated_vendors.iter().any(|v| d.is_vendor(v));

    if devices.iter().all(is_integrated) {
        return devices;
    }

    devices
        .into_iter()
        .filter(|d| {
            let drop = is_integrated(d);
            if drop {
                debug!(device = %d, "excluding integrated device");
            }
            !drop
        })
        .collect()
}

/// Work-group alignment: 64 when every device is AMD, otherwise 32.
pub fn warp_size(devices: &[AcceleratorDevice]) -> u64 {
    if !devices.is_empty() && devices.iter().all(AcceleratorDevice::is_amd) {
        64
    } else {
        32
    }
}

/// Smallest maximum work-group size across `devices`.
pub fn max_local_size(devices: &[AcceleratorDevice]) -> u64 {
    devices
        .iter()
        .map(AcceleratorDevice::max_work_group_size)
        .min()
        .unwrap_or(1)
}

pub fn has_nvidia(devices: &[AcceleratorDevice]) -> bool {
    devices.iter().any(AcceleratorDevice::is_nvidia)
}

pub fn has_amd(devices: &[AcceleratorDevice]) -> bool {
    devices.iter().any(AcceleratorDevice::is_amd)
}
