use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{RendererError, RendererResult};

/// Point light in world space. `radius` bounds its influence sphere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn new(position: Vec3, radius: f32, color: Vec3) -> Self {
        Self {
            position,
            radius,
            color,
            intensity: 1.0,
        }
    }

    /// Checks that the influence sphere is usable: a finite radius above
    /// zero and a finite position.
    pub fn check(&self) -> Result<(), String> {
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(format!("radius must be positive and finite, got {}", self.radius));
        }
        if !self.position.is_finite() {
            return Err(format!("position must be finite, got {}", self.position));
        }
        Ok(())
    }

    fn to_gpu(self) -> GpuLight {
        GpuLight {
            position: self.position.to_array(),
            radius: self.radius,
            color: self.color.to_array(),
            intensity: self.intensity,
        }
    }
}

/// Contiguous, bounded collection of lights handed to the renderer each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LightSet {
    lights: Vec<Light>,
    capacity: usize,
}

impl LightSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lights: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a set from existing lights, rejecting more than `capacity`
    /// and any light without a usable radius.
    pub fn from_lights(lights: Vec<Light>, capacity: usize) -> RendererResult<Self> {
        if lights.len() > capacity {
            return Err(RendererError::LightCapacity {
                count: lights.len(),
                capacity,
            });
        }
        for (index, light) in lights.iter().enumerate() {
            light
                .check()
                .map_err(|reason| RendererError::InvalidLight { index, reason })?;
        }
        Ok(Self { lights, capacity })
    }

    pub fn push(&mut self, light: Light) -> RendererResult<()> {
        if self.lights.len() >= self.capacity {
            return Err(RendererError::LightCapacity {
                count: self.lights.len() + 1,
                capacity: self.capacity,
            });
        }
        light.check().map_err(|reason| RendererError::InvalidLight {
            index: self.lights.len(),
            reason,
        })?;
        self.lights.push(light);
        Ok(())
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut [Light] {
        &mut self.lights
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Encodes the set as `{count: u32, pad: [u32; 3], lights: [GpuLight]}`.
    pub(crate) fn to_gpu_bytes(&self) -> Vec<u8> {
        let header = [self.lights.len() as u32, 0, 0, 0];
        let mut bytes = Vec::with_capacity(
            LIGHT_SET_HEADER_SIZE + self.lights.len() * std::mem::size_of::<GpuLight>(),
        );
        bytes.extend_from_slice(bytemuck::cast_slice(&header));
        for light in &self.lights {
            bytes.extend_from_slice(bytemuck::bytes_of(&light.to_gpu()));
        }
        bytes
    }
}

pub(crate) const LIGHT_SET_HEADER_SIZE: usize = 16;

/// Byte size of a light storage buffer holding `capacity` lights.
pub(crate) fn light_buffer_size(capacity: u32) -> u64 {
    LIGHT_SET_HEADER_SIZE as u64 + u64::from(capacity) * std::mem::size_of::<GpuLight>() as u64
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct GpuLight {
    pub position: [f32; 3],
    pub radius: f32,
    pub color: [f32; 3],
    pub intensity: f32,
}
