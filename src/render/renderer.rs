use log::{debug, info, warn};

use crate::camera::CameraUniforms;
use crate::cluster::{assign_lights, AssignmentStats, ClusterGrid, ClusterLightTable};
use crate::config::ClusterConfig;
use crate::error::{RendererError, RendererResult};
use crate::light::LightSet;
use crate::render::assignment::AssignmentPass;
use crate::render::buffers::FrameBuffers;
use crate::render::context::RenderContext;
use crate::render::gbuffer::{GBuffer, GBufferLayout};
use crate::render::geometry::GeometryPass;
use crate::render::mesh::GpuScene;
use crate::render::resolve::ResolvePass;
use crate::scene::Scene;

/// Inputs for one frame.
pub struct Frame<'a> {
    /// Texture the lighting resolve writes the final image into.
    pub target: &'a wgpu::TextureView,
    pub camera: &'a CameraUniforms,
    pub lights: &'a LightSet,
}

/// A way of turning a frame's inputs into an image.
pub trait RenderStrategy {
    fn draw(&mut self, frame: &Frame<'_>) -> RendererResult<()>;

    /// Recreates resolution-sized resources. Same-size calls are no-ops.
    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()>;
}

/// Light assignment, geometry and lighting resolve recorded into a single
/// command encoder per frame, in that order.
pub struct ClusteredDeferredRenderer {
    ctx: RenderContext,
    config: ClusterConfig,
    buffers: FrameBuffers,
    gbuffer: GBuffer,
    scene: GpuScene,
    assignment: AssignmentPass,
    geometry: GeometryPass,
    resolve: ResolvePass,
    last_stats: Option<AssignmentStats>,
}

impl ClusteredDeferredRenderer {
    /// Builds every pipeline and uploads the scene. Any failure aborts
    /// construction; there is no partially built renderer.
    pub fn new(
        ctx: &RenderContext,
        config: ClusterConfig,
        width: u32,
        height: u32,
        scene: &Scene,
    ) -> RendererResult<Self> {
        config.validate()?;
        config.check_limits(&ctx.device.limits())?;
        ctx.check_device()?;

        let buffers = ctx.allocated("frame buffers", |device| FrameBuffers::new(device, &config))?;
        let gbuffer = ctx.allocated("G-buffer", |device| {
            GBuffer::new(device, GBufferLayout::new(width, height))
        })?;
        let assignment = AssignmentPass::new(ctx, &config, &buffers)?;
        let geometry = GeometryPass::new(ctx, &buffers)?;
        let resolve = ResolvePass::new(ctx, &config, &buffers, &gbuffer)?;
        let scene = ctx.allocated("scene upload", |device| {
            GpuScene::upload(device, geometry.scene_layouts(), scene)
        })??;

        info!(
            "clustered renderer ready: grid {}x{}x{}, {} lights per cluster, {} workgroups, {} nodes",
            config.dims[0],
            config.dims[1],
            config.dims[2],
            config.max_lights_per_cluster,
            assignment.workgroups(),
            scene.node_count()
        );

        Ok(Self {
            ctx: ctx.clone(),
            config,
            buffers,
            gbuffer,
            scene,
            assignment,
            geometry,
            resolve,
            last_stats: None,
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn gbuffer_layout(&self) -> GBufferLayout {
        self.gbuffer.layout()
    }

    /// Statistics of the last host-side assignment, when diagnostics are on.
    pub fn last_stats(&self) -> Option<AssignmentStats> {
        self.last_stats
    }

    /// Copies the cluster light table written by the last assignment pass
    /// back to host memory, in the layout of [`ClusterLightTable::as_bytes`].
    pub fn read_cluster_table(&self) -> RendererResult<Vec<u8>> {
        let device = &self.ctx.device;
        let size = self.buffers.clusters.size();
        let staging = self.ctx.allocated("cluster readback", |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("cluster-readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("cluster-readback"),
        });
        encoder.copy_buffer_to_buffer(&self.buffers.clusters, 0, &staging, 0, size);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx.drain()?;
        rx.recv()
            .map_err(|_| RendererError::DeviceLost("cluster readback was dropped".to_string()))?
            .map_err(|err| RendererError::DeviceLost(format!("mapping cluster readback: {err}")))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn report_overflow(&mut self, grid: &ClusterGrid, frame: &Frame<'_>) -> RendererResult<()> {
        let mut table = ClusterLightTable::for_grid(grid, self.config.max_lights_per_cluster);
        let stats = assign_lights(grid, frame.camera.view, frame.lights.lights(), &mut table)?;
        debug!(
            "assigned {} light references, busiest cluster holds {}",
            stats.assigned, stats.max_count
        );
        if stats.overflowed_clusters > 0 {
            warn!(
                "{} clusters overflowed their {} light slots, {} references dropped",
                stats.overflowed_clusters, self.config.max_lights_per_cluster, stats.dropped_lights
            );
        }
        self.last_stats = Some(stats);
        Ok(())
    }
}

/// Checks a frame's inputs against the renderer's fixed capacities and
/// returns the cluster grid for its camera.
fn prepare_frame(config: &ClusterConfig, camera: &CameraUniforms, lights: &LightSet) -> RendererResult<ClusterGrid> {
    if lights.len() > config.max_lights as usize {
        return Err(RendererError::LightCapacity {
            count: lights.len(),
            capacity: config.max_lights as usize,
        });
    }
    ClusterGrid::new(config.dims, camera)
}

impl RenderStrategy for ClusteredDeferredRenderer {
    fn draw(&mut self, frame: &Frame<'_>) -> RendererResult<()> {
        self.ctx.check_device()?;
        let grid = prepare_frame(&self.config, frame.camera, frame.lights)?;
        if self.config.diagnostics {
            self.report_overflow(&grid, frame)?;
        }

        self.buffers.write_camera(&self.ctx.queue, frame.camera);
        self.buffers.write_lights(&self.ctx.queue, frame.lights);

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clustered-frame"),
            });
        self.assignment.encode(&mut encoder);
        self.geometry.encode(&mut encoder, &self.gbuffer, &self.scene);
        self.resolve.encode(&mut encoder, frame.target);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RendererResult<()> {
        if !self.gbuffer.layout().needs_rebuild(width, height) {
            debug!("resize to {width}x{height} keeps the current G-buffer");
            return Ok(());
        }
        self.ctx.check_device()?;
        // Frames in flight still reference the old attachments.
        self.ctx.drain()?;
        let gbuffer = self.ctx.allocated("G-buffer", |device| {
            GBuffer::new(device, GBufferLayout::new(width, height))
        })?;
        self.ctx
            .allocated("G-buffer bind group", |device| self.resolve.rebind(device, &gbuffer))?;
        self.gbuffer = gbuffer;
        info!("G-buffer resized to {width}x{height}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::*;
    use crate::app::{camera_from_scene, frame_lights};
    use crate::light::Light;

    fn camera() -> CameraUniforms {
        CameraUniforms::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            60f32.to_radians(),
            Vec2::new(320.0, 180.0),
            0.1,
            50.0,
        )
    }

    #[test]
    fn oversized_light_set_is_rejected() {
        let config = ClusterConfig::default().with_max_lights(2);
        let lights: Vec<_> = (0..3)
            .map(|i| Light::new(Vec3::splat(i as f32), 1.0, Vec3::ONE))
            .collect();
        let set = LightSet::from_lights(lights, 3).unwrap();
        let err = prepare_frame(&config, &camera(), &set).unwrap_err();
        assert!(matches!(err, RendererError::LightCapacity { count: 3, capacity: 2 }));
    }

    #[test]
    fn invalid_camera_planes_are_rejected() {
        let mut camera = camera();
        camera.far = camera.near;
        let set = LightSet::with_capacity(1);
        assert!(matches!(
            prepare_frame(&ClusterConfig::default(), &camera, &set),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn grid_follows_config() {
        let config = ClusterConfig::default().with_dims(4, 2, 8);
        let grid = prepare_frame(&config, &camera(), &LightSet::with_capacity(1)).unwrap();
        assert_eq!(grid.cluster_count(), 64);
    }

    fn gpu() -> Option<RenderContext> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let request = RenderContext::request(&instance, None, Some(wgpu::TextureFormat::Rgba8Unorm));
        match pollster::block_on(request) {
            Ok((ctx, _)) => Some(ctx),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }

    /// Renderer over the demo scene, or `None` when the adapter cannot host
    /// the G-buffer formats.
    fn build(ctx: &RenderContext, config: ClusterConfig, width: u32, height: u32) -> Option<ClusteredDeferredRenderer> {
        match ClusteredDeferredRenderer::new(ctx, config, width, height, &Scene::demo()) {
            Ok(renderer) => Some(renderer),
            Err(err @ RendererError::Resource { .. }) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
            Err(err) => panic!("renderer setup failed: {err}"),
        }
    }

    fn target(ctx: &RenderContext, width: u32, height: u32) -> wgpu::TextureView {
        ctx.device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("test-target"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: ctx.target_format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    }

    #[test]
    fn oversized_resources_come_back_as_errors() {
        let Some(ctx) = gpu() else { return };
        let limits = ctx.device.limits();

        let buffer = ctx.allocated("huge buffer", |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("huge"),
                size: limits.max_buffer_size + 4,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        });
        assert!(matches!(buffer, Err(RendererError::Resource { .. })));

        let gbuffer = ctx.allocated("G-buffer", |device| {
            GBuffer::new(device, GBufferLayout::new(limits.max_texture_dimension_2d + 1, 1))
        });
        assert!(matches!(gbuffer, Err(RendererError::Resource { .. })));
    }

    #[test]
    fn device_limits_are_checked_before_allocation() {
        let Some(ctx) = gpu() else { return };
        let config = ClusterConfig::default().with_max_lights_per_cluster(100_000);
        assert!(matches!(
            ClusteredDeferredRenderer::new(&ctx, config, 64, 64, &Scene::demo()),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn failed_resize_keeps_the_previous_gbuffer() {
        let Some(ctx) = gpu() else { return };
        let Some(mut renderer) = build(&ctx, ClusterConfig::default().with_dims(4, 4, 4), 64, 64) else {
            return;
        };
        renderer.resize(96, 48).unwrap();
        assert_eq!(renderer.gbuffer_layout(), GBufferLayout::new(96, 48));

        let too_wide = ctx.device.limits().max_texture_dimension_2d + 1;
        assert!(matches!(
            renderer.resize(too_wide, 48),
            Err(RendererError::Resource { .. })
        ));
        assert_eq!(renderer.gbuffer_layout(), GBufferLayout::new(96, 48));
        ctx.drain().unwrap();
    }

    #[test]
    fn gpu_assignment_matches_host_table() {
        let Some(ctx) = gpu() else { return };
        let scene = Scene::demo();
        let (width, height) = (320, 180);
        let camera = camera_from_scene(&scene, Vec2::new(width as f32, height as f32));
        let view = target(&ctx, width, height);

        // Second case forces overflow so first-K selection is compared too.
        for (k, count) in [(256, 64), (2, 300)] {
            let config = ClusterConfig::default()
                .with_dims(8, 4, 12)
                .with_max_lights_per_cluster(k)
                .with_max_lights(512);
            let Some(mut renderer) = build(&ctx, config, width, height) else {
                return;
            };
            let lights = frame_lights(&scene, count, 0.5, &config).unwrap();
            renderer
                .draw(&Frame {
                    target: &view,
                    camera: &camera,
                    lights: &lights,
                })
                .unwrap();
            let bytes = renderer.read_cluster_table().unwrap();

            let grid = ClusterGrid::new(config.dims, &camera).unwrap();
            let mut table = ClusterLightTable::for_grid(&grid, k);
            let stats = assign_lights(&grid, camera.view, lights.lights(), &mut table).unwrap();
            if k == 2 {
                assert!(stats.overflowed_clusters > 0);
            }

            let words: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
                .collect();
            assert_eq!(words[0] as usize, table.cluster_count());
            let stride = 1 + k as usize;
            for (cluster, record) in table.records().enumerate() {
                let gpu = &words[1 + cluster * stride..1 + (cluster + 1) * stride];
                let count = gpu[0] as usize;
                assert_eq!(gpu[0], record.count, "cluster {cluster}");
                assert_eq!(&gpu[1..1 + count], record.indices, "cluster {cluster}");
            }
        }
    }
}
