//! Clustered deferred renderer built on wgpu.
//!
//! The view frustum is split into a grid of clusters (uniform in screen
//! space, exponential in depth). Every frame a compute pass lists the point
//! lights touching each cluster, a geometry pass fills the G-buffer, and a
//! fullscreen pass shades each pixel with only its cluster's lights. The
//! grid and assignment logic is plain host code so it can be tested and
//! reused without a GPU.

pub mod app;
pub mod camera;
pub mod cluster;
pub mod config;
pub mod error;
pub mod light;
pub mod obj;
pub mod render;
pub mod scene;
pub mod shading;

pub use camera::CameraUniforms;
pub use cluster::{
    assign_lights, Aabb, AssignmentStats, ClusterGrid, ClusterIndex, ClusterLightTable,
};
pub use config::ClusterConfig;
pub use error::{RendererError, RendererResult};
pub use light::{Light, LightSet};
pub use obj::ObjMesh;
pub use render::{ClusteredDeferredRenderer, Frame, RenderContext, RenderStrategy};
pub use scene::{Scene, SceneTraversal, SceneVisitor};
