//! Host-side mirror of the lighting resolve. The WGSL resolve shader uses
//! the same constants and falloff; this version backs diagnostics and tests.

use glam::{Vec2, Vec3};

use crate::cluster::{ClusterGrid, ClusterLightTable};
use crate::light::Light;

/// Uniform ambient term added before light contributions.
pub const AMBIENT: f32 = 0.05;

/// Colour written for pixels the geometry pass never touched.
pub const BACKGROUND: Vec3 = Vec3::new(0.02, 0.02, 0.03);

/// One pixel's worth of G-buffer data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    /// `albedo.w == 0` marks a cleared (empty) pixel.
    pub albedo: glam::Vec4,
    pub normal: Vec3,
    pub position: Vec3,
    pub view_depth: f32,
}

/// Diffuse contribution of one point light, windowed to zero at its radius.
pub fn point_light(light: &Light, position: Vec3, normal: Vec3) -> Vec3 {
    let to_light = light.position - position;
    let distance = to_light.length();
    if distance >= light.radius {
        return Vec3::ZERO;
    }
    let direction = to_light / distance.max(1e-4);
    let lambert = normal.dot(direction).max(0.0);
    let ratio = distance / light.radius;
    let window = (1.0 - ratio.powi(4)).clamp(0.0, 1.0);
    let attenuation = window * window / (distance * distance + 1.0);
    light.color * light.intensity * lambert * attenuation
}

/// Resolves a pixel using only the lights listed for its cluster. Returns
/// `None` for background pixels.
pub fn resolve_pixel(
    grid: &ClusterGrid,
    table: &ClusterLightTable,
    lights: &[Light],
    pixel: Vec2,
    sample: &SurfaceSample,
) -> Option<Vec3> {
    if sample.albedo.w == 0.0 {
        return None;
    }
    let cluster = grid.linear_index(grid.cluster_for_pixel(pixel, sample.view_depth));
    let normal = sample.normal.normalize_or_zero();
    let lit: Vec3 = table
        .record(cluster)
        .indices
        .iter()
        .map(|&index| point_light(&lights[index as usize], sample.position, normal))
        .sum();
    Some(sample.albedo.truncate() * (Vec3::splat(AMBIENT) + lit))
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec4};

    use super::*;
    use crate::camera::CameraUniforms;
    use crate::cluster::assign_lights;

    fn setup(lights: &[Light]) -> (ClusterGrid, ClusterLightTable) {
        let camera = CameraUniforms {
            view: Mat4::IDENTITY,
            projection: Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0),
            resolution: Vec2::new(64.0, 64.0),
            near: 0.1,
            far: 100.0,
        };
        let grid = ClusterGrid::new([4, 4, 8], &camera).unwrap();
        let mut table = ClusterLightTable::for_grid(&grid, 8);
        assign_lights(&grid, camera.view, lights, &mut table).unwrap();
        (grid, table)
    }

    #[test]
    fn falloff_reaches_zero_at_radius() {
        let light = Light::new(Vec3::ZERO, 2.0, Vec3::ONE);
        let facing = Vec3::Z;
        assert_eq!(point_light(&light, Vec3::new(0.0, 0.0, -2.0), facing), Vec3::ZERO);
        let near = point_light(&light, Vec3::new(0.0, 0.0, -0.5), facing);
        let far = point_light(&light, Vec3::new(0.0, 0.0, -1.5), facing);
        assert!(near.x > far.x && far.x > 0.0);
        // Surfaces facing away receive nothing.
        assert_eq!(point_light(&light, Vec3::new(0.0, 0.0, -0.5), -facing), Vec3::ZERO);
    }

    #[test]
    fn background_pixels_are_not_lit() {
        let (grid, table) = setup(&[Light::new(Vec3::new(0.0, 0.0, -5.0), 10.0, Vec3::ONE)]);
        let sample = SurfaceSample {
            albedo: Vec4::ZERO,
            normal: Vec3::Z,
            position: Vec3::new(0.0, 0.0, -5.0),
            view_depth: 5.0,
        };
        assert_eq!(resolve_pixel(&grid, &table, &[], Vec2::splat(32.0), &sample), None);
    }

    #[test]
    fn only_cluster_lights_contribute() {
        let lights = [
            Light::new(Vec3::new(0.0, 0.0, -4.0), 2.0, Vec3::X),
            Light::new(Vec3::new(0.0, 0.0, -60.0), 2.0, Vec3::Y),
        ];
        let (grid, table) = setup(&lights);
        let sample = SurfaceSample {
            albedo: Vec4::ONE,
            normal: Vec3::Z,
            position: Vec3::new(0.0, 0.0, -5.0),
            view_depth: 5.0,
        };
        let color = resolve_pixel(&grid, &table, &lights, Vec2::splat(32.0), &sample).unwrap();
        assert!(color.x > AMBIENT);
        assert_eq!(color.y, AMBIENT);
    }
}
