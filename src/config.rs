use crate::device::DeviceFilter;
use crate::error::{Error, Result};

const MIN_STACK_SIZE: usize = 64 * 1024;
const MAX_CHUNKS_PER_DEVICE: usize = 4096;

/// How the local (work-group) size hint for a job is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSize {
    /// Pass no hint; each device picks its own.
    DeviceDefault,
    /// Largest divisor of the aligned global size that every device accepts.
    Auto,
    Fixed(u64),
}

impl Default for LocalSize {
    fn default() -> Self {
        LocalSize::DeviceDefault
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub device_filter: DeviceFilter,
    pub chunks_per_device: usize,
    pub local_size: LocalSize,

    pub exclude_integrated: bool,
    pub integrated_vendors: Vec<String>,

    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_filter: DeviceFilter::ALL,
            chunks_per_device: 1,
            local_size: LocalSize::default(),

            exclude_integrated: true,
            integrated_vendors: vec!["intel".to_string()],

            thread_name_prefix: "multidev-lane".to_string(),
            stack_size: Some(2 * 1024 * 1024),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        // round-trips the bitmask checks
        DeviceFilter::from_bits(self.device_filter.bits())?;

        if self.chunks_per_device == 0 {
            return Err(Error::config("chunks_per_device must be > 0"));
        }
        if self.chunks_per_device > MAX_CHUNKS_PER_DEVICE {
            return Err(Error::config(format!(
                "chunks_per_device too large (max {})",
                MAX_CHUNKS_PER_DEVICE
            )));
        }

        if let LocalSize::Fixed(0) = self.local_size {
            return Err(Error::config("fixed local size must be > 0"));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        if let Some(size) = self.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(Error::config(format!(
                    "stack_size must be at least {} bytes",
                    MIN_STACK_SIZE
                )));
            }
        }

        Ok(())
    }

    /// Number of sub-ranges a job over `devices` contexts is split into.
    pub fn parts_for(&self, devices: usize) -> usize {
        devices.max(1) * self.chunks_per_device
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn device_filter(mut self, filter: DeviceFilter) -> Self {
        self.config.device_filter = filter;
        self
    }

    pub fn chunks_per_device(mut self, n: usize) -> Self {
        self.config.chunks_per_device = n;
        self
    }

    pub fn local_size(mut self, local_size: LocalSize) -> Self {
        self.config.local_size = local_size;
        self
    }

    pub fn exclude_integrated(mut self, exclude: bool) -> Self {
        self.config.exclude_integrated = exclude;
        self
    }

    pub fn integrated_vendors<I, S>(mut self, vendors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.integrated_vendors = vendors.into_iter().map(Into::into).collect();
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
