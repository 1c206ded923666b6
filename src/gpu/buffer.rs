//! Buffer helpers for the wgpu context.

use crate::error::{Error, Result};
use wgpu::util::DeviceExt;

/// Bindings may not be empty; round every size up to at least one word.
pub(super) fn binding_size(len: usize) -> u64 {
    (len.max(4) as u64 + 3) & !3
}

/// Storage buffer holding packed kernel arguments.
pub(super) fn params_buffer(device: &wgpu::Device, packed: &[u8]) -> wgpu::Buffer {
    let mut contents = packed.to_vec();
    contents.resize(binding_size(packed.len()) as usize, 0);
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("multidev-params"),
        contents: &contents,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
    })
}

pub(super) fn launch_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("multidev-launch"),
        size: std::mem::size_of::<LaunchUniform>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(super) fn output_buffer(device: &wgpu::Device, len: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("multidev-output"),
        size: binding_size(len),
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Copy the first `len` bytes of `source` back to the host.
pub(super) fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    len: usize,
) -> Result<Vec<u8>> {
    let size = binding_size(len);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("multidev-staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("multidev-readback"),
    });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    rx.recv()
        .map_err(|_| Error::gpu("readback callback never ran"))?
        .map_err(|e| Error::gpu(format!("readback failed: {}", e)))?;

    let bytes = slice.get_mapped_range()[..len].to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Per-dispatch uniform, mirrored by the shader's `Launch` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub(super) struct LaunchUniform {
    pub base_lo: u32,
    pub base_hi: u32,
    pub first: u32,
    pub count: u32,
}

impl LaunchUniform {
    pub fn new(base: u64, first: u32, count: u32) -> Self {
        Self {
            base_lo: base as u32,
            base_hi: (base >> 32) as u32,
            first,
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_size() {
        assert_eq!(binding_size(0), 4);
        assert_eq!(binding_size(5), 8);
        assert_eq!(binding_size(16), 16);
    }

    #[test]
    fn test_launch_uniform_layout() {
        let launch = LaunchUniform::new(0x1_0000_0002, 7, 9);
        assert_eq!(launch.base_lo, 2);
        assert_eq!(launch.base_hi, 1);
        assert_eq!(bytemuck::bytes_of(&launch).len(), 16);
    }
}
