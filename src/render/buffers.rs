use bytemuck::bytes_of;

use crate::camera::{CameraUniforms, GpuCamera};
use crate::cluster::ClusterLightTable;
use crate::config::ClusterConfig;
use crate::light::{light_buffer_size, LightSet};

/// GPU buffers shared across passes: camera uniforms, the light storage
/// buffer and the cluster light table. Sized once from the config.
pub struct FrameBuffers {
    pub camera: wgpu::Buffer,
    pub lights: wgpu::Buffer,
    pub clusters: wgpu::Buffer,
}

impl FrameBuffers {
    pub fn new(device: &wgpu::Device, config: &ClusterConfig) -> Self {
        let camera = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("camera-uniform"),
            size: std::mem::size_of::<GpuCamera>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let lights = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light-set"),
            size: light_buffer_size(config.max_lights),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let clusters = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("cluster-set"),
            size: ClusterLightTable::byte_size(config.cluster_count(), config.max_lights_per_cluster),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            camera,
            lights,
            clusters,
        }
    }

    pub fn write_camera(&self, queue: &wgpu::Queue, camera: &CameraUniforms) {
        queue.write_buffer(&self.camera, 0, bytes_of(&camera.to_gpu()));
    }

    /// Uploads the light set. The caller has already checked it fits.
    pub fn write_lights(&self, queue: &wgpu::Queue, lights: &LightSet) {
        queue.write_buffer(&self.lights, 0, &lights.to_gpu_bytes());
    }
}

pub(crate) fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn storage_entry(
    binding: u32,
    visibility: wgpu::ShaderStages,
    read_only: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Bind group over `camera`, `lights` and `clusters` at bindings 0..=2.
pub(crate) fn frame_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffers: &FrameBuffers,
    label: &str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: buffers.camera.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: buffers.lights.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: buffers.clusters.as_entire_binding(),
            },
        ],
    })
}
