use glam::{Mat4, UVec3, Vec2, Vec3, Vec4};

use crate::camera::CameraUniforms;
use crate::error::{RendererError, RendererResult};

/// Integer coordinate of one cell of the cluster grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClusterIndex {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl ClusterIndex {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }
}

/// Closed axis-aligned box in view space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(
            Self {
                min: Vec3::splat(f32::INFINITY),
                max: Vec3::splat(f32::NEG_INFINITY),
            },
            |aabb, p| Self {
                min: aabb.min.min(p),
                max: aabb.max.max(p),
            },
        )
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn squared_distance_to(&self, point: Vec3) -> f32 {
        let closest = point.clamp(self.min, self.max);
        point.distance_squared(closest)
    }

    /// Inclusive sphere test: touching the surface counts as intersecting.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.squared_distance_to(center) <= radius * radius
    }
}

/// Partition of the view frustum into `Sx × Sy × Sz` clusters.
///
/// X and Y are split uniformly in screen space; Z is split exponentially so
/// that slice `z` starts at `near * (far / near)^(z / Sz)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterGrid {
    dims: UVec3,
    near: f32,
    far: f32,
    projection: Mat4,
    inv_projection: Mat4,
    resolution: Vec2,
}

impl ClusterGrid {
    pub fn new(dims: [u32; 3], camera: &CameraUniforms) -> RendererResult<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(RendererError::config("grid dimensions must be non-zero"));
        }
        if !(camera.near > 0.0) || !(camera.far > camera.near) {
            return Err(RendererError::config(format!(
                "clip planes must satisfy 0 < near < far, got near={} far={}",
                camera.near, camera.far
            )));
        }
        Ok(Self {
            dims: UVec3::from_array(dims),
            near: camera.near,
            far: camera.far,
            projection: camera.projection,
            inv_projection: camera.inverse_projection(),
            resolution: camera.resolution,
        })
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn cluster_count(&self) -> usize {
        (self.dims.x * self.dims.y * self.dims.z) as usize
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    /// View depth of the boundary in front of slice `z`; `slice_depth(Sz)` is `far`.
    pub fn slice_depth(&self, z: u32) -> f32 {
        if z == 0 {
            self.near
        } else if z >= self.dims.z {
            self.far
        } else {
            self.near * (self.far / self.near).powf(z as f32 / self.dims.z as f32)
        }
    }

    /// Slice containing a positive view depth, clamped to the grid.
    pub fn slice_for_depth(&self, depth: f32) -> u32 {
        if !(depth > self.near) {
            return 0;
        }
        let t = (depth / self.near).ln() / (self.far / self.near).ln();
        let last = self.dims.z - 1;
        let mut z = ((t * self.dims.z as f32).floor().max(0.0) as u32).min(last);
        // Settle rounding at slice boundaries against slice_depth itself.
        while z > 0 && depth < self.slice_depth(z) {
            z -= 1;
        }
        while z < last && depth >= self.slice_depth(z + 1) {
            z += 1;
        }
        z
    }

    pub fn linear_index(&self, index: ClusterIndex) -> usize {
        (index.x + index.y * self.dims.x + index.z * self.dims.x * self.dims.y) as usize
    }

    pub fn index_from_linear(&self, linear: usize) -> ClusterIndex {
        let linear = linear as u32;
        ClusterIndex {
            x: linear % self.dims.x,
            y: (linear / self.dims.x) % self.dims.y,
            z: linear / (self.dims.x * self.dims.y),
        }
    }

    /// View-space bounds of one cluster.
    pub fn cluster_bounds(&self, index: ClusterIndex) -> Aabb {
        let u0 = index.x as f32 / self.dims.x as f32;
        let u1 = (index.x + 1) as f32 / self.dims.x as f32;
        let v0 = index.y as f32 / self.dims.y as f32;
        let v1 = (index.y + 1) as f32 / self.dims.y as f32;
        let near_depth = self.slice_depth(index.z);
        let far_depth = self.slice_depth(index.z + 1);

        let corners = [
            self.unproject_uv(Vec2::new(u0, v0)),
            self.unproject_uv(Vec2::new(u1, v0)),
            self.unproject_uv(Vec2::new(u0, v1)),
            self.unproject_uv(Vec2::new(u1, v1)),
        ];
        Aabb::from_points(corners.into_iter().flat_map(|ray| {
            [at_depth(ray, near_depth), at_depth(ray, far_depth)]
        }))
    }

    /// Cluster owning a pixel at the given linear view depth.
    pub fn cluster_for_pixel(&self, pixel: Vec2, depth: f32) -> ClusterIndex {
        self.cluster_for_uv(pixel / self.resolution.max(Vec2::ONE), depth)
    }

    /// Cluster containing a view-space point; points outside the frustum are
    /// clamped to the nearest border cluster.
    pub fn cluster_for_view_position(&self, view: Vec3) -> ClusterIndex {
        let clip = self.projection * Vec4::new(view.x, view.y, view.z, 1.0);
        let ndc = clip.truncate() / clip.w;
        let uv = Vec2::new((ndc.x + 1.0) * 0.5, (1.0 - ndc.y) * 0.5);
        self.cluster_for_uv(uv, -view.z)
    }

    fn cluster_for_uv(&self, uv: Vec2, depth: f32) -> ClusterIndex {
        let tile = |t: f32, n: u32| ((t * n as f32).floor().max(0.0) as u32).min(n - 1);
        ClusterIndex {
            x: tile(uv.x, self.dims.x),
            y: tile(uv.y, self.dims.y),
            z: self.slice_for_depth(depth),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ClusterIndex> + '_ {
        (0..self.cluster_count()).map(|linear| self.index_from_linear(linear))
    }

    /// Point on the near plane through screen coordinate `uv` (top-left origin).
    fn unproject_uv(&self, uv: Vec2) -> Vec3 {
        let ndc = Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
        let p = self.inv_projection * ndc;
        p.truncate() / p.w
    }
}

/// Scales a near-plane point along its eye ray to the plane `z = -depth`.
fn at_depth(ray: Vec3, depth: f32) -> Vec3 {
    let scale = depth / -ray.z;
    Vec3::new(ray.x * scale, ray.y * scale, -depth)
}
