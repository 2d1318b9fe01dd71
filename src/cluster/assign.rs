use glam::{Mat4, Vec3};
use rayon::prelude::*;

use crate::cluster::grid::ClusterGrid;
use crate::error::{RendererError, RendererResult};
use crate::light::Light;

/// Clusters handed to one rayon task at a time by [`assign_lights`].
pub const ASSIGNMENT_BATCH: usize = 64;

/// Number of fixed-size batches needed to cover `clusters` workers.
pub fn workgroup_count(clusters: u32, batch: u32) -> u32 {
    clusters.div_ceil(batch.max(1))
}

/// Per-cluster light lists in the exact layout of the GPU storage buffer:
/// a `u32` cluster count, then one `{count: u32, indices: [u32; K]}` record
/// per cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLightTable {
    max_lights_per_cluster: u32,
    words: Vec<u32>,
}

/// Borrowed view of one cluster's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterRecord<'a> {
    pub count: u32,
    pub indices: &'a [u32],
}

impl ClusterLightTable {
    pub fn new(cluster_count: usize, max_lights_per_cluster: u32) -> Self {
        let stride = 1 + max_lights_per_cluster as usize;
        let mut words = vec![0u32; 1 + cluster_count * stride];
        words[0] = cluster_count as u32;
        Self {
            max_lights_per_cluster,
            words,
        }
    }

    pub fn for_grid(grid: &ClusterGrid, max_lights_per_cluster: u32) -> Self {
        Self::new(grid.cluster_count(), max_lights_per_cluster)
    }

    /// Size in bytes of a table for `cluster_count` clusters of capacity `k`.
    pub fn byte_size(cluster_count: u32, k: u32) -> u64 {
        4 + u64::from(cluster_count) * (1 + u64::from(k)) * 4
    }

    pub fn cluster_count(&self) -> usize {
        self.words[0] as usize
    }

    pub fn max_lights_per_cluster(&self) -> u32 {
        self.max_lights_per_cluster
    }

    fn stride(&self) -> usize {
        1 + self.max_lights_per_cluster as usize
    }

    pub fn record(&self, cluster: usize) -> ClusterRecord<'_> {
        let start = 1 + cluster * self.stride();
        let count = self.words[start];
        ClusterRecord {
            count,
            indices: &self.words[start + 1..start + 1 + count as usize],
        }
    }

    pub fn records(&self) -> impl Iterator<Item = ClusterRecord<'_>> + '_ {
        (0..self.cluster_count()).map(|cluster| self.record(cluster))
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }
}

/// Summary of one assignment run. Overflow is reported here rather than as
/// an error: lights beyond a cluster's capacity are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignmentStats {
    pub assigned: u64,
    pub max_count: u32,
    pub overflowed_clusters: u32,
    pub dropped_lights: u64,
}

impl AssignmentStats {
    fn merge(self, other: Self) -> Self {
        Self {
            assigned: self.assigned + other.assigned,
            max_count: self.max_count.max(other.max_count),
            overflowed_clusters: self.overflowed_clusters + other.overflowed_clusters,
            dropped_lights: self.dropped_lights + other.dropped_lights,
        }
    }
}

/// Fills `table` with the lights intersecting each cluster of `grid`.
///
/// Lights are given in world space and moved into view space with `view`.
/// Each cluster writes only its own record, so records are filled in
/// parallel without synchronisation. Within a cluster, lights are recorded
/// in light-set order and the first `K` hits win.
pub fn assign_lights(
    grid: &ClusterGrid,
    view: Mat4,
    lights: &[Light],
    table: &mut ClusterLightTable,
) -> RendererResult<AssignmentStats> {
    if table.cluster_count() != grid.cluster_count() {
        return Err(RendererError::config(format!(
            "cluster table holds {} clusters but the grid has {}",
            table.cluster_count(),
            grid.cluster_count()
        )));
    }

    let spheres: Vec<(Vec3, f32)> = lights
        .iter()
        .map(|light| ((view * light.position.extend(1.0)).truncate(), light.radius))
        .collect();
    let capacity = table.max_lights_per_cluster as usize;
    let stride = table.stride();

    let stats = table.words[1..]
        .par_chunks_mut(stride)
        .with_min_len(ASSIGNMENT_BATCH)
        .enumerate()
        .map(|(cluster, record)| {
            let bounds = grid.cluster_bounds(grid.index_from_linear(cluster));
            let (count_slot, slots) = record.split_at_mut(1);
            let mut count = 0usize;
            let mut dropped = 0u64;
            for (light_index, &(center, radius)) in spheres.iter().enumerate() {
                if !bounds.intersects_sphere(center, radius) {
                    continue;
                }
                if count < capacity {
                    slots[count] = light_index as u32;
                    count += 1;
                } else {
                    dropped += 1;
                }
            }
            count_slot[0] = count as u32;
            AssignmentStats {
                assigned: count as u64,
                max_count: count as u32,
                overflowed_clusters: u32::from(dropped > 0),
                dropped_lights: dropped,
            }
        })
        .reduce(AssignmentStats::default, AssignmentStats::merge);

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;
    use crate::camera::CameraUniforms;
    use crate::cluster::grid::ClusterIndex;

    fn camera(near: f32, far: f32) -> CameraUniforms {
        CameraUniforms {
            view: Mat4::IDENTITY,
            projection: Mat4::perspective_rh(60f32.to_radians(), 1.0, near, far),
            resolution: Vec2::new(512.0, 512.0),
            near,
            far,
        }
    }

    fn run(dims: [u32; 3], k: u32, lights: &[Light]) -> (ClusterGrid, ClusterLightTable, AssignmentStats) {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new(dims, &camera).unwrap();
        let mut table = ClusterLightTable::for_grid(&grid, k);
        let stats = assign_lights(&grid, camera.view, lights, &mut table).unwrap();
        (grid, table, stats)
    }

    fn point(x: f32, y: f32, z: f32, radius: f32) -> Light {
        Light::new(Vec3::new(x, y, z), radius, Vec3::ONE)
    }

    #[test]
    fn no_lights_leaves_every_cluster_empty() {
        for dims in [[1, 1, 1], [4, 4, 4], [16, 9, 24]] {
            let (_, table, stats) = run(dims, 8, &[]);
            assert!(table.records().all(|record| record.count == 0));
            assert_eq!(stats, AssignmentStats::default());
        }
    }

    #[test]
    fn light_at_view_origin_reaches_only_nearby_clusters() {
        let light = point(0.0, 0.0, 0.0, 5.0);
        let (grid, table, _) = run([4, 4, 4], 8, &[light]);
        let mut lit = 0;
        for index in grid.iter() {
            let record = table.record(grid.linear_index(index));
            let bounds = grid.cluster_bounds(index);
            let expected = bounds.intersects_sphere(Vec3::ZERO, 5.0);
            assert_eq!(record.count, u32::from(expected), "cluster {index:?}");
            if expected {
                assert_eq!(record.indices, &[0]);
                lit += 1;
            }
        }
        // Slice 0 spans depths 0.1..0.56 and lies entirely within the sphere;
        // slice 3 starts beyond 17 units and cannot be reached.
        for x in 0..4 {
            for y in 0..4 {
                let near = grid.linear_index(ClusterIndex::new(x, y, 0));
                let far = grid.linear_index(ClusterIndex::new(x, y, 3));
                assert_eq!(table.record(near).count, 1);
                assert_eq!(table.record(far).count, 0);
            }
        }
        assert!(lit > 16 && lit < 64);
    }

    #[test]
    fn overflow_keeps_first_k_and_reports_drops() {
        let lights = [
            point(0.0, 0.0, -1.0, 0.05),
            point(0.01, 0.0, -1.0, 0.05),
            point(0.0, 0.01, -1.0, 0.05),
        ];
        let (grid, table, stats) = run([1, 1, 1], 2, &lights);
        let record = table.record(grid.linear_index(ClusterIndex::new(0, 0, 0)));
        assert_eq!(record.count, 2);
        assert_eq!(record.indices, &[0, 1]);
        assert_eq!(stats.overflowed_clusters, 1);
        assert_eq!(stats.dropped_lights, 1);
        assert_eq!(stats.max_count, 2);
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let lights: Vec<Light> = (0..200)
            .map(|i| {
                let t = i as f32 * 0.37;
                point(t.sin() * 3.0, t.cos() * 2.0, -2.0 - (i % 40) as f32, 4.0)
            })
            .collect();
        let (_, table, stats) = run([8, 8, 8], 16, &lights);
        assert!(table.records().all(|record| record.count <= 16));
        assert!(stats.max_count <= 16);
        assert!(stats.dropped_lights > 0);
        assert_eq!(
            stats.assigned,
            table.records().map(|record| u64::from(record.count)).sum::<u64>()
        );
    }

    #[test]
    fn light_inside_a_cluster_is_never_missed() {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new([6, 5, 7], &camera).unwrap();
        for index in grid.iter() {
            let bounds = grid.cluster_bounds(index);
            let centre = (bounds.min + bounds.max) * 0.5;
            let light = point(centre.x, centre.y, centre.z, 1e-3);
            let mut table = ClusterLightTable::for_grid(&grid, 4);
            assign_lights(&grid, camera.view, &[light], &mut table).unwrap();
            assert_eq!(table.record(grid.linear_index(index)).indices, &[0]);
        }
    }

    #[test]
    fn disjoint_lights_produce_disjoint_records() {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new([4, 4, 4], &camera).unwrap();
        let near_slice = (grid.slice_depth(0) * grid.slice_depth(1)).sqrt();
        let far_slice = (grid.slice_depth(3) * grid.slice_depth(4)).sqrt();
        let a = point(0.0, 0.0, -near_slice, 0.01);
        let b = point(0.0, 0.0, -far_slice, 0.01);
        let mut table = ClusterLightTable::for_grid(&grid, 4);
        assign_lights(&grid, camera.view, &[a, b], &mut table).unwrap();

        let with = |light: u32| -> Vec<usize> {
            (0..grid.cluster_count())
                .filter(|&c| table.record(c).indices.contains(&light))
                .collect()
        };
        let clusters_a = with(0);
        let clusters_b = with(1);
        assert!(!clusters_a.is_empty() && !clusters_b.is_empty());
        assert!(clusters_a.iter().all(|c| !clusters_b.contains(c)));
        assert!(clusters_a
            .iter()
            .all(|&c| grid.index_from_linear(c).z == 0));
        assert!(clusters_b
            .iter()
            .all(|&c| grid.index_from_linear(c).z == 3));
    }

    #[test]
    fn tangent_light_lands_in_both_neighbours() {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new([4, 4, 4], &camera).unwrap();
        let depth = (grid.slice_depth(2) * grid.slice_depth(3)).sqrt();
        let half_height = (30f32.to_radians()).tan() * depth;
        let radius = 0.015625;
        // Touches the x = 0 plane separating tile columns 1 and 2 from the left.
        let light = point(-radius, half_height * 0.25, -depth, radius);
        let mut table = ClusterLightTable::for_grid(&grid, 4);
        assign_lights(&grid, camera.view, &[light], &mut table).unwrap();

        let count = |x| table.record(grid.linear_index(ClusterIndex::new(x, 1, 2))).count;
        assert_eq!(count(1), 1);
        assert_eq!(count(2), 1);
        assert_eq!(count(0), 0);
        assert_eq!(count(3), 0);
    }

    #[test]
    fn light_touching_a_slice_plane_lands_in_both_slices() {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new([4, 4, 4], &camera).unwrap();
        let boundary = grid.slice_depth(2);
        let radius = 0.5;
        // Centre sits in slice 2, its sphere just reaching the plane shared with slice 1.
        let light = point(0.0, 0.0, -(boundary + radius), radius);
        assert_eq!(grid.slice_for_depth(boundary + radius), 2);
        let mut table = ClusterLightTable::for_grid(&grid, 4);
        assign_lights(&grid, camera.view, &[light], &mut table).unwrap();

        let count = |z| table.record(grid.linear_index(ClusterIndex::new(1, 1, z))).count;
        assert_eq!(count(1), 1);
        assert_eq!(count(2), 1);
        assert_eq!(count(0), 0);
        assert_eq!(count(3), 0);

        // Just short of the plane, slice 1 is no longer reached.
        let light = point(0.0, 0.0, -(boundary + radius), radius * 0.99);
        let mut table = ClusterLightTable::for_grid(&grid, 4);
        assign_lights(&grid, camera.view, &[light], &mut table).unwrap();
        assert_eq!(table.record(grid.linear_index(ClusterIndex::new(1, 1, 1))).count, 0);
        assert_eq!(table.record(grid.linear_index(ClusterIndex::new(1, 1, 2))).count, 1);
    }

    #[test]
    fn table_bytes_match_gpu_layout() {
        let light = point(0.0, 0.0, -1.0, 0.1);
        let (grid, table, _) = run([2, 1, 1], 3, &[light]);
        let bytes = table.as_bytes();
        assert_eq!(bytes.len() as u64, ClusterLightTable::byte_size(2, 3));
        let words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(words[0], 2);
        let left = grid.linear_index(ClusterIndex::new(0, 0, 0));
        assert_eq!(words[1 + left * 4], 1);
        assert_eq!(words[2 + left * 4], 0);
    }

    #[test]
    fn mismatched_table_is_a_configuration_error() {
        let camera = camera(0.1, 100.0);
        let grid = ClusterGrid::new([4, 4, 4], &camera).unwrap();
        let mut table = ClusterLightTable::new(8, 4);
        assert!(matches!(
            assign_lights(&grid, camera.view, &[], &mut table),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn dispatch_covers_all_clusters() {
        assert_eq!(workgroup_count(64, 64), 1);
        assert_eq!(workgroup_count(65, 64), 2);
        assert_eq!(workgroup_count(16 * 9 * 24, 64), 54);
    }
}
