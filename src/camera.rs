use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

/// Per-frame camera state shared by all three passes.
///
/// View space is right-handed with the camera looking down `-Z`, and the
/// projection maps the near plane to NDC depth 0 (wgpu convention).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub resolution: Vec2,
    pub near: f32,
    pub far: f32,
}

impl CameraUniforms {
    /// Builds a perspective camera looking from `eye` towards `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        fov_y_radians: f32,
        resolution: Vec2,
        near: f32,
        far: f32,
    ) -> Self {
        let aspect = if resolution.y > 0.0 {
            resolution.x / resolution.y
        } else {
            1.0
        };
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection: Mat4::perspective_rh(fov_y_radians, aspect.max(0.01), near, far),
            resolution,
            near,
            far,
        }
    }

    pub fn inverse_projection(&self) -> Mat4 {
        self.projection.inverse()
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection * self.view
    }

    /// Transforms a world-space point into view space.
    pub fn to_view(&self, world: Vec3) -> Vec3 {
        (self.view * world.extend(1.0)).truncate()
    }

    pub(crate) fn to_gpu(self) -> GpuCamera {
        GpuCamera {
            view_proj: self.view_proj().to_cols_array_2d(),
            view: self.view.to_cols_array_2d(),
            inv_proj: self.inverse_projection().to_cols_array_2d(),
            resolution: self.resolution.into(),
            near: self.near,
            far: self.far,
        }
    }

    /// Projects a view-space point to normalized screen coordinates, with
    /// `(0, 0)` at the top-left corner of the viewport.
    pub fn view_to_screen_uv(&self, view: Vec3) -> Vec2 {
        let clip = self.projection * Vec4::new(view.x, view.y, view.z, 1.0);
        let ndc = clip.truncate() / clip.w;
        Vec2::new((ndc.x + 1.0) * 0.5, (1.0 - ndc.y) * 0.5)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct GpuCamera {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub inv_proj: [[f32; 4]; 4],
    pub resolution: [f32; 2],
    pub near: f32,
    pub far: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_block_is_uniform_aligned() {
        assert_eq!(std::mem::size_of::<GpuCamera>(), 208);
        assert_eq!(std::mem::size_of::<GpuCamera>() % 16, 0);
    }

    #[test]
    fn screen_uv_has_top_left_origin() {
        let camera = CameraUniforms::look_at(
            Vec3::ZERO,
            Vec3::NEG_Z,
            60f32.to_radians(),
            Vec2::new(800.0, 600.0),
            0.1,
            100.0,
        );
        let centre = camera.view_to_screen_uv(Vec3::new(0.0, 0.0, -5.0));
        assert!((centre - Vec2::splat(0.5)).length() < 1e-5);
        let upper_left = camera.view_to_screen_uv(Vec3::new(-1.0, 1.0, -5.0));
        assert!(upper_left.x < 0.5 && upper_left.y < 0.5);
    }
}
