use super::buffer::{self, LaunchUniform};
use super::DEFAULT_WORKGROUP_SIZE;
use crate::device::AcceleratorDevice;
use crate::error::{Error, Result};
use crate::executor::ComputeContext;
use crate::kernel::{pack_args, KernelArg};
use crate::scheduler::WorkRange;
use tracing::{debug, info};

struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
    entry_point: String,
}

/// A wgpu device and queue with one bound compute pipeline.
pub struct WgpuContext {
    info: AcceleratorDevice,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    pipeline: Option<Pipeline>,
    params: wgpu::Buffer,
    launch: wgpu::Buffer,
}

impl WgpuContext {
    pub fn new(info: AcceleratorDevice, adapter: &wgpu::Adapter) -> Result<Self> {
        let limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(info.name()),
                required_limits: limits.clone(),
                ..Default::default()
            },
            None,
        ))
        .map_err(|e| Error::gpu(format!("{}: device request failed: {}", info.name(), e)))?;

        info!(device = %info, backend = ?adapter.get_info().backend, "opened wgpu device");

        let params = buffer::params_buffer(&device, &[]);
        let launch = buffer::launch_buffer(&device);

        Ok(Self {
            info,
            device,
            queue,
            limits,
            pipeline: None,
            params,
            launch,
        })
    }

    fn layout(&self) -> wgpu::BindGroupLayout {
        let entry = |binding: u32, ty: wgpu::BufferBindingType| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("multidev-layout"),
            entries: &[
                entry(0, wgpu::BufferBindingType::Storage { read_only: true }),
                entry(1, wgpu::BufferBindingType::Uniform),
                entry(2, wgpu::BufferBindingType::Storage { read_only: false }),
            ],
        })
    }

    fn group_size(&self, local_size: Option<u64>) -> Result<u32> {
        let size = local_size.unwrap_or(DEFAULT_WORKGROUP_SIZE);
        if size == 0 || size > u64::from(self.limits.max_compute_invocations_per_workgroup) {
            return Err(Error::execution(
                self.info.name(),
                format!("invalid local size {}", size),
            ));
        }
        Ok(size as u32)
    }

    /// Dispatch the bound pipeline over `range`, writing into `output`.
    fn run(&self, range: WorkRange, local_size: Option<u64>, output: &wgpu::Buffer) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| Error::execution(self.info.name(), "no kernel bound"))?;

        let count = u32::try_from(range.len()).map_err(|_| {
            Error::execution(
                self.info.name(),
                format!("range {} exceeds {} work items", range, u32::MAX),
            )
        })?;
        let group = self.group_size(local_size)?;
        let plan = dispatch_plan(count, group, self.limits.max_compute_workgroups_per_dimension);

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("multidev-bind-group"),
            layout: &pipeline.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.launch.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.as_entire_binding(),
                },
            ],
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        for (first, items) in plan {
            let launch = LaunchUniform::new(range.start, first, items);
            self.queue.write_buffer(&self.launch, 0, bytemuck::bytes_of(&launch));

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("multidev-dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pipeline.entry_point.as_str()),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(items.div_ceil(group), 1, 1);
            }
            self.queue.submit(Some(encoder.finish()));
        }

        self.device.poll(wgpu::Maintain::Wait);

        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(Error::execution(self.info.name(), e.to_string())),
            None => Ok(()),
        }
    }
}

impl ComputeContext for WgpuContext {
    fn device(&self) -> &AcceleratorDevice {
        &self.info
    }

    fn bind_kernel(&mut self, source: &str, entry_point: &str) -> Result<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(entry_point),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = self.layout();
        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("multidev-pipeline-layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(Error::compile(self.info.name(), e.to_string()));
        }

        debug!(device = self.info.name(), entry_point, "compiled compute pipeline");
        self.pipeline = Some(Pipeline {
            pipeline,
            layout,
            entry_point: entry_point.to_string(),
        });
        Ok(())
    }

    fn bind_parameters(&mut self, args: &[KernelArg]) -> Result<()> {
        self.params = buffer::params_buffer(&self.device, &pack_args(args));
        Ok(())
    }

    fn execute(&mut self, range: WorkRange, local_size: Option<u64>) -> Result<()> {
        let scratch = buffer::output_buffer(&self.device, 0);
        self.run(range, local_size, &scratch)
    }

    fn execute_return(
        &mut self,
        range: WorkRange,
        local_size: Option<u64>,
        output_len: usize,
    ) -> Result<Vec<u8>> {
        let size = buffer::binding_size(output_len);
        if size > u64::from(self.limits.max_storage_buffer_binding_size) {
            return Err(Error::execution(
                self.info.name(),
                format!("output of {} bytes exceeds the storage binding limit", output_len),
            ));
        }

        let output = buffer::output_buffer(&self.device, output_len);
        self.run(range, local_size, &output)?;
        buffer::read_back(&self.device, &self.queue, &output, output_len)
    }
}

/// Split `count` items into dispatches of at most `max_groups` workgroups.
/// Yields `(first item, item count)` pairs.
fn dispatch_plan(count: u32, group: u32, max_groups: u32) -> Vec<(u32, u32)> {
    let per_dispatch = u64::from(group) * u64::from(max_groups.max(1));
    let mut plan = Vec::new();
    let mut first: u64 = 0;
    while first < u64::from(count) {
        let items = (u64::from(count) - first).min(per_dispatch);
        plan.push((first as u32, items as u32));
        first += items;
    }
    plan
}
