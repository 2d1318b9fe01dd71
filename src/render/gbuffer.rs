/// Formats of the geometry pass outputs, in colour attachment order.
pub const ALBEDO_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const NORMAL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const POSITION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const LINEAR_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
/// Hardware depth used only for depth testing during the geometry pass.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

pub const COLOR_FORMATS: [wgpu::TextureFormat; 4] =
    [ALBEDO_FORMAT, NORMAL_FORMAT, POSITION_FORMAT, LINEAR_DEPTH_FORMAT];

/// Size of the G-buffer. Textures are recreated only when this changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferLayout {
    pub width: u32,
    pub height: u32,
}

impl GBufferLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// True when a resize to `width`x`height` needs new textures.
    pub fn needs_rebuild(&self, width: u32, height: u32) -> bool {
        *self != Self::new(width, height)
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

struct Target {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl Target {
    fn create(
        device: &wgpu::Device,
        layout: GBufferLayout,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        label: &str,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: layout.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

/// Screen-sized attachments written by the geometry pass and sampled by the
/// lighting resolve.
pub struct GBuffer {
    layout: GBufferLayout,
    albedo: Target,
    normal: Target,
    position: Target,
    linear_depth: Target,
    depth: Target,
}

impl GBuffer {
    pub fn new(device: &wgpu::Device, layout: GBufferLayout) -> Self {
        let attachment = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        Self {
            layout,
            albedo: Target::create(device, layout, ALBEDO_FORMAT, attachment, "gbuffer-albedo"),
            normal: Target::create(device, layout, NORMAL_FORMAT, attachment, "gbuffer-normal"),
            position: Target::create(device, layout, POSITION_FORMAT, attachment, "gbuffer-position"),
            linear_depth: Target::create(
                device,
                layout,
                LINEAR_DEPTH_FORMAT,
                attachment,
                "gbuffer-linear-depth",
            ),
            depth: Target::create(
                device,
                layout,
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
                "gbuffer-depth",
            ),
        }
    }

    pub fn layout(&self) -> GBufferLayout {
        self.layout
    }

    /// Colour views in attachment order.
    pub fn color_views(&self) -> [&wgpu::TextureView; 4] {
        [
            &self.albedo.view,
            &self.normal.view,
            &self.position.view,
            &self.linear_depth.view,
        ]
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth.view
    }
}
