use std::f32::consts::TAU;

use anyhow::{Context, Result};
use glam::{Vec2, Vec3};

use crate::camera::CameraUniforms;
use crate::cluster::{assign_lights, AssignmentStats, ClusterGrid, ClusterLightTable};
use crate::config::ClusterConfig;
use crate::light::{Light, LightSet};
use crate::scene::Scene;

/// Camera described by the scene, or the default view when it has none.
pub fn camera_from_scene(scene: &Scene, resolution: Vec2) -> CameraUniforms {
    let camera = scene.camera.unwrap_or_default();
    CameraUniforms::look_at(
        camera.position,
        camera.target,
        camera.fov.to_radians(),
        resolution,
        camera.near,
        camera.far,
    )
}

/// Deterministic field of `count` coloured point lights spread over the
/// scene's footprint, each orbiting its anchor as `time` advances.
pub fn demo_lights(scene: &Scene, count: usize, time: f32) -> Vec<Light> {
    let (mut lo, mut hi) = scene.extent();
    if lo.x > hi.x {
        lo = Vec3::splat(-10.0);
        hi = Vec3::splat(10.0);
    }
    let size = (hi - lo).max(Vec3::splat(4.0));
    let centre = (lo + hi) * 0.5;
    let radius = (size.x.max(size.z) / (count.max(1) as f32).sqrt()).clamp(1.5, 8.0);

    (0..count)
        .map(|i| {
            // Low-discrepancy placement so the field looks the same every run.
            let u = fract(i as f32 * 0.618_034 + 0.5);
            let v = fract(i as f32 * 0.754_878 + 0.5);
            let anchor = Vec3::new(
                centre.x + (u - 0.5) * size.x,
                lo.y + 0.5 + fract(i as f32 * 0.569_840) * 2.0,
                centre.z + (v - 0.5) * size.z,
            );
            let phase = i as f32 * 2.399_963;
            let speed = 0.3 + fract(i as f32 * 0.381_966) * 0.4;
            let angle = phase + time * speed;
            let orbit = Vec3::new(angle.cos(), 0.0, angle.sin()) * 1.5;
            let mut light = Light::new(anchor + orbit, radius, hue(fract(i as f32 / 7.3)));
            light.intensity = 4.0;
            light
        })
        .collect()
}

/// Scene lights followed by `demo_count` demo lights, bounded by the
/// configured light capacity.
pub fn frame_lights(scene: &Scene, demo_count: usize, time: f32, config: &ClusterConfig) -> Result<LightSet> {
    let mut lights = scene.lights.clone();
    lights.extend(demo_lights(scene, demo_count, time));
    LightSet::from_lights(lights, config.max_lights as usize).context("building the frame light set")
}

/// Outcome of running the host-side assignment for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignmentSummary {
    pub clusters: usize,
    pub lit_clusters: usize,
    pub lights: usize,
    pub stats: AssignmentStats,
}

pub fn summarize(
    config: &ClusterConfig,
    camera: &CameraUniforms,
    lights: &LightSet,
) -> Result<AssignmentSummary> {
    config.validate()?;
    let grid = ClusterGrid::new(config.dims, camera)?;
    let mut table = ClusterLightTable::for_grid(&grid, config.max_lights_per_cluster);
    let stats = assign_lights(&grid, camera.view, lights.lights(), &mut table)?;
    Ok(AssignmentSummary {
        clusters: table.cluster_count(),
        lit_clusters: table.records().filter(|record| record.count > 0).count(),
        lights: lights.len(),
        stats,
    })
}

pub fn print_summary(scene: &Scene, config: &ClusterConfig, summary: &AssignmentSummary) {
    println!(
        "Scene: {} nodes, {} materials, {} lights",
        scene.nodes.len(),
        scene.materials.len(),
        summary.lights
    );
    println!(
        "Grid: {}x{}x{} ({} clusters), {} lights per cluster",
        config.dims[0], config.dims[1], config.dims[2], summary.clusters, config.max_lights_per_cluster
    );
    println!(
        "Assigned {} light references; {} clusters lit",
        summary.stats.assigned, summary.lit_clusters
    );
    println!("Busiest cluster: {} lights", summary.stats.max_count);
    println!(
        "Overflow: {} clusters, {} references dropped",
        summary.stats.overflowed_clusters, summary.stats.dropped_lights
    );
}

fn fract(x: f32) -> f32 {
    x - x.floor()
}

fn hue(h: f32) -> Vec3 {
    let channel = |offset: f32| ((fract(h + offset) * TAU).cos() * 0.5 + 0.5).clamp(0.0, 1.0);
    Vec3::new(channel(0.0), channel(2.0 / 3.0), channel(1.0 / 3.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_lights_are_deterministic() {
        let scene = Scene::demo();
        let a = demo_lights(&scene, 32, 1.5);
        let b = demo_lights(&scene, 32, 1.5);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.iter().all(|l| l.radius > 0.0 && l.color.min_element() >= 0.0));
    }

    #[test]
    fn demo_lights_move_over_time() {
        let scene = Scene::demo();
        let a = demo_lights(&scene, 4, 0.0);
        let b = demo_lights(&scene, 4, 2.0);
        assert_ne!(a[0].position, b[0].position);
        assert_eq!(a[0].radius, b[0].radius);
    }

    #[test]
    fn frame_lights_respect_capacity() {
        let scene = Scene::demo();
        let config = ClusterConfig::default().with_max_lights(8);
        assert_eq!(frame_lights(&scene, 8, 0.0, &config).unwrap().len(), 8);
        assert!(frame_lights(&scene, 9, 0.0, &config).is_err());
    }

    #[test]
    fn summary_counts_lit_clusters() {
        let scene = Scene::demo();
        let config = ClusterConfig::default().with_dims(8, 4, 8);
        let camera = camera_from_scene(&scene, Vec2::new(640.0, 360.0));
        let lights = frame_lights(&scene, 16, 0.0, &config).unwrap();
        let summary = summarize(&config, &camera, &lights).unwrap();
        assert_eq!(summary.clusters, 256);
        assert_eq!(summary.lights, 16);
        assert!(summary.lit_clusters > 0);
        assert!(summary.stats.assigned >= summary.lit_clusters as u64);
        assert_eq!(summary.stats.dropped_lights, 0);
    }
}
