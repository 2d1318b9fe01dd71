use crate::config::ClusterConfig;
use crate::error::RendererResult;
use crate::render::buffers::{frame_bind_group, storage_entry, uniform_entry, FrameBuffers};
use crate::render::context::RenderContext;
use crate::render::shaders;

/// Compute pass that rebuilds every cluster's light list from the current
/// light set. One invocation per cluster.
pub struct AssignmentPass {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    workgroups: u32,
}

impl AssignmentPass {
    pub fn new(ctx: &RenderContext, config: &ClusterConfig, buffers: &FrameBuffers) -> RendererResult<Self> {
        let source = shaders::assignment_source(config);
        ctx.validated("light assignment pipeline", |device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("assignment-shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("assignment-bind-layout"),
                entries: &[
                    uniform_entry(0, wgpu::ShaderStages::COMPUTE),
                    storage_entry(1, wgpu::ShaderStages::COMPUTE, true),
                    storage_entry(2, wgpu::ShaderStages::COMPUTE, false),
                ],
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("assignment-pipeline-layout"),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("assignment-pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("assign_lights"),
                compilation_options: Default::default(),
                cache: None,
            });
            let bind_group = frame_bind_group(device, &layout, buffers, "assignment-bind-group");
            Self {
                pipeline,
                bind_group,
                workgroups: config.workgroup_count(),
            }
        })
    }

    pub fn workgroups(&self) -> u32 {
        self.workgroups
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("light-assignment"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(self.workgroups, 1, 1);
    }
}
