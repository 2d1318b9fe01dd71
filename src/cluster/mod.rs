//! View-frustum clustering: the grid partition and the light-to-cluster
//! assignment that runs over it.

pub mod assign;
pub mod grid;

pub use assign::{
    assign_lights, workgroup_count, AssignmentStats, ClusterLightTable, ClusterRecord,
    ASSIGNMENT_BATCH,
};
pub use grid::{Aabb, ClusterGrid, ClusterIndex};
