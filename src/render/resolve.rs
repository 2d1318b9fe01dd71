use crate::config::ClusterConfig;
use crate::error::RendererResult;
use crate::render::buffers::{frame_bind_group, storage_entry, uniform_entry, FrameBuffers};
use crate::render::context::RenderContext;
use crate::render::gbuffer::GBuffer;
use crate::render::shaders;

/// Fullscreen pass that shades each G-buffer pixel with the lights of its
/// cluster and writes the result to the output target.
pub struct ResolvePass {
    pipeline: wgpu::RenderPipeline,
    frame_bind_group: wgpu::BindGroup,
    gbuffer_layout: wgpu::BindGroupLayout,
    gbuffer_bind_group: wgpu::BindGroup,
}

impl ResolvePass {
    pub fn new(
        ctx: &RenderContext,
        config: &ClusterConfig,
        buffers: &FrameBuffers,
        gbuffer: &GBuffer,
    ) -> RendererResult<Self> {
        let source = shaders::resolve_source(config);
        let target_format = ctx.target_format;
        ctx.validated("lighting resolve pipeline", |device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("resolve-shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("resolve-frame-layout"),
                entries: &[
                    uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                    storage_entry(1, wgpu::ShaderStages::FRAGMENT, true),
                    storage_entry(2, wgpu::ShaderStages::FRAGMENT, true),
                ],
            });
            let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            };
            let gbuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("resolve-gbuffer-layout"),
                entries: &[texture_entry(0), texture_entry(1), texture_entry(2), texture_entry(3)],
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("resolve-pipeline-layout"),
                bind_group_layouts: &[&frame_layout, &gbuffer_layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("resolve-pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_fullscreen"),
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_resolve"),
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: target_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            });
            let frame_bind_group = frame_bind_group(device, &frame_layout, buffers, "resolve-frame-bind-group");
            let gbuffer_bind_group = gbuffer_bind_group(device, &gbuffer_layout, gbuffer);
            Self {
                pipeline,
                frame_bind_group,
                gbuffer_layout,
                gbuffer_bind_group,
            }
        })
    }

    /// Rebinds the G-buffer after it was recreated.
    pub fn rebind(&mut self, device: &wgpu::Device, gbuffer: &GBuffer) {
        self.gbuffer_bind_group = gbuffer_bind_group(device, &self.gbuffer_layout, gbuffer);
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lighting-resolve"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.frame_bind_group, &[]);
        pass.set_bind_group(1, &self.gbuffer_bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

fn gbuffer_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    gbuffer: &GBuffer,
) -> wgpu::BindGroup {
    let [albedo, normal, position, depth] = gbuffer.color_views();
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("resolve-gbuffer-bind-group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(albedo),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(normal),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(position),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(depth),
            },
        ],
    })
}
