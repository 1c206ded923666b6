//! The per-device compute context seam.

use crate::device::AcceleratorDevice;
use crate::error::Result;
use crate::kernel::KernelArg;
use crate::scheduler::WorkRange;

/// One accelerator bound to one compiled kernel and one parameter set.
///
/// Every method blocks until the device is done. A context is only ever
/// driven by one thread at a time: its dispatch lane during a job, the
/// scheduler's caller between jobs.
pub trait ComputeContext: Send {
    /// The device this context runs on.
    fn device(&self) -> &AcceleratorDevice;

    /// Compile `source` and select `entry_point`. Replaces any kernel bound
    /// earlier.
    fn bind_kernel(&mut self, source: &str, entry_point: &str) -> Result<()>;

    /// Attach the ordered argument list used by every later invocation.
    fn bind_parameters(&mut self, args: &[KernelArg]) -> Result<()>;

    /// Run the bound kernel over `range`. Any output stays on the device.
    fn execute(&mut self, range: WorkRange, local_size: Option<u64>) -> Result<()>;

    /// Run the bound kernel over `range` and read back `output_len` bytes.
    ///
    /// The returned bytes belong at element offset `range.start` of the
    /// aggregate result.
    fn execute_return(
        &mut self,
        range: WorkRange,
        local_size: Option<u64>,
        output_len: usize,
    ) -> Result<Vec<u8>>;

    /// Short label used in logs and errors.
    fn label(&self) -> &str {
        self.device().name()
    }
}

impl std::fmt::Debug for dyn ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("device", self.device())
            .finish()
    }
}
