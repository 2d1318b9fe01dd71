use crate::error::RendererResult;
use crate::obj::VERTEX_STRIDE;
use crate::render::buffers::{uniform_entry, FrameBuffers};
use crate::render::context::RenderContext;
use crate::render::gbuffer::{GBuffer, COLOR_FORMATS, DEPTH_FORMAT};
use crate::render::mesh::{GpuMaterial, GpuMesh, GpuNode, GpuScene, SceneLayouts};
use crate::render::shaders;
use crate::scene::{SceneTraversal, SceneVisitor};

/// Rasterizes scene primitives into the G-buffer.
pub struct GeometryPass {
    pipeline: wgpu::RenderPipeline,
    camera_bind_group: wgpu::BindGroup,
    scene_layouts: SceneLayouts,
}

impl GeometryPass {
    pub fn new(ctx: &RenderContext, buffers: &FrameBuffers) -> RendererResult<Self> {
        ctx.validated("geometry pipeline", |device| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("geometry-shader"),
                source: wgpu::ShaderSource::Wgsl(shaders::geometry_source().into()),
            });
            let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("geometry-camera-layout"),
                entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
            });
            let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("geometry-camera-bind-group"),
                layout: &camera_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffers.camera.as_entire_binding(),
                }],
            });
            let scene_layouts = SceneLayouts::new(device);

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("geometry-pipeline-layout"),
                bind_group_layouts: &[&camera_layout, &scene_layouts.node, &scene_layouts.material],
                push_constant_ranges: &[],
            });

            let targets = COLOR_FORMATS.map(|format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            });

            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("geometry-pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: (VERTEX_STRIDE * std::mem::size_of::<f32>()) as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &[
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x3,
                                offset: 0,
                                shader_location: 0,
                            },
                            wgpu::VertexAttribute {
                                format: wgpu::VertexFormat::Float32x3,
                                offset: (3 * std::mem::size_of::<f32>()) as u64,
                                shader_location: 1,
                            },
                        ],
                    }],
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: Default::default(),
                    bias: Default::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            });

            Self {
                pipeline,
                camera_bind_group,
                scene_layouts,
            }
        })
    }

    pub fn scene_layouts(&self) -> &SceneLayouts {
        &self.scene_layouts
    }

    /// Clears every attachment, then draws the scene into them.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, gbuffer: &GBuffer, scene: &GpuScene) {
        let color_attachments = gbuffer.color_views().map(|view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("geometry-pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: gbuffer.depth_view(),
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        scene.traverse(&mut DrawVisitor { pass: &mut pass });
    }
}

struct DrawVisitor<'a, 'p> {
    pass: &'a mut wgpu::RenderPass<'p>,
}

impl SceneVisitor<GpuNode, GpuMaterial, GpuMesh> for DrawVisitor<'_, '_> {
    fn node(&mut self, node: &GpuNode) {
        self.pass.set_bind_group(1, &node.bind_group, &[]);
    }

    fn material(&mut self, material: &GpuMaterial) {
        self.pass.set_bind_group(2, &material.bind_group, &[]);
    }

    fn primitive(&mut self, mesh: &GpuMesh) {
        self.pass.set_vertex_buffer(0, mesh.vertex.slice(..));
        self.pass
            .set_index_buffer(mesh.index.slice(..), wgpu::IndexFormat::Uint32);
        self.pass.draw_indexed(0..mesh.index_count, 0, 0..1);
    }
}
