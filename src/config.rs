use serde::{Deserialize, Serialize};

use crate::cluster::ClusterLightTable;
use crate::error::{RendererError, RendererResult};
use crate::light::light_buffer_size;

/// Largest workgroup the assignment kernel may be compiled with.
pub const MAX_WORKGROUP_SIZE: u32 = 256;

/// Static sizing of the cluster grid and the buffers derived from it.
///
/// Everything here is baked into shader constants and buffer sizes when the
/// renderer is built, so changing any field means building a new renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Grid dimensions `(Sx, Sy, Sz)`.
    #[serde(default = "default_dims")]
    pub dims: [u32; 3],
    /// Capacity `K` of each cluster's light list.
    #[serde(default = "default_max_lights_per_cluster")]
    pub max_lights_per_cluster: u32,
    /// Capacity of the light storage buffer.
    #[serde(default = "default_max_lights")]
    pub max_lights: u32,
    /// Clusters handled per assignment workgroup.
    #[serde(default = "default_workgroup_size")]
    pub workgroup_size: u32,
    /// Mirror the assignment on the CPU each frame to report overflow.
    #[serde(default)]
    pub diagnostics: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
            max_lights_per_cluster: default_max_lights_per_cluster(),
            max_lights: default_max_lights(),
            workgroup_size: default_workgroup_size(),
            diagnostics: false,
        }
    }
}

impl ClusterConfig {
    pub fn with_dims(mut self, x: u32, y: u32, z: u32) -> Self {
        self.dims = [x, y, z];
        self
    }

    pub fn with_max_lights_per_cluster(mut self, k: u32) -> Self {
        self.max_lights_per_cluster = k;
        self
    }

    pub fn with_max_lights(mut self, max: u32) -> Self {
        self.max_lights = max;
        self
    }

    /// Total number of clusters, `Sx·Sy·Sz`.
    pub fn cluster_count(&self) -> u32 {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Number of assignment workgroups needed to cover every cluster.
    pub fn workgroup_count(&self) -> u32 {
        crate::cluster::workgroup_count(self.cluster_count(), self.workgroup_size)
    }

    /// Checks the configuration before any GPU resources are sized from it.
    pub fn validate(&self) -> RendererResult<()> {
        if self.dims.iter().any(|&d| d == 0) {
            return Err(RendererError::config(format!(
                "grid dimensions must be non-zero, got {}x{}x{}",
                self.dims[0], self.dims[1], self.dims[2]
            )));
        }
        let total = self
            .dims
            .iter()
            .try_fold(1u32, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| RendererError::config("grid has too many clusters"))?;
        if self.max_lights_per_cluster == 0 {
            return Err(RendererError::config(
                "max lights per cluster must be at least 1",
            ));
        }
        if self.max_lights == 0 {
            return Err(RendererError::config("light capacity must be at least 1"));
        }
        if self.workgroup_size == 0 || self.workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(RendererError::config(format!(
                "workgroup size must be within 1..={MAX_WORKGROUP_SIZE}, got {}",
                self.workgroup_size
            )));
        }
        let record_words = 1u64 + u64::from(self.max_lights_per_cluster);
        let table_bytes = 4 + u64::from(total) * record_words * 4;
        if table_bytes > u64::from(u32::MAX) {
            return Err(RendererError::config(format!(
                "cluster table would need {table_bytes} bytes"
            )));
        }
        Ok(())
    }

    /// Checks the dispatch and buffer sizes this configuration implies
    /// against what a device supports.
    pub fn check_limits(&self, limits: &wgpu::Limits) -> RendererResult<()> {
        let workgroups = self.workgroup_count();
        if workgroups > limits.max_compute_workgroups_per_dimension {
            return Err(RendererError::config(format!(
                "{workgroups} assignment workgroups exceed the device limit of {}",
                limits.max_compute_workgroups_per_dimension
            )));
        }
        if self.workgroup_size > limits.max_compute_workgroup_size_x
            || self.workgroup_size > limits.max_compute_invocations_per_workgroup
        {
            return Err(RendererError::config(format!(
                "workgroup size {} is not supported by the device",
                self.workgroup_size
            )));
        }
        let binding = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        let buffers = [
            (
                "cluster table",
                ClusterLightTable::byte_size(self.cluster_count(), self.max_lights_per_cluster),
            ),
            ("light buffer", light_buffer_size(self.max_lights)),
        ];
        for (name, bytes) in buffers {
            if bytes > binding {
                return Err(RendererError::config(format!(
                    "{name} needs {bytes} bytes but the device binds at most {binding}"
                )));
            }
        }
        Ok(())
    }
}

fn default_dims() -> [u32; 3] {
    [16, 9, 24]
}

fn default_max_lights_per_cluster() -> u32 {
    256
}

fn default_max_lights() -> u32 {
    4096
}

fn default_workgroup_size() -> u32 {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ClusterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster_count(), 16 * 9 * 24);
    }

    #[test]
    fn workgroup_count_rounds_up() {
        let config = ClusterConfig::default().with_dims(4, 4, 4);
        assert_eq!(config.workgroup_count(), 1);
        let config = ClusterConfig::default().with_dims(5, 5, 5);
        assert_eq!(config.workgroup_count(), 2);
        let config = ClusterConfig::default().with_dims(16, 9, 24);
        assert_eq!(config.workgroup_count(), 54);
    }

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(ClusterConfig::default().with_dims(0, 4, 4).validate().is_err());
        assert!(ClusterConfig::default()
            .with_max_lights_per_cluster(0)
            .validate()
            .is_err());
        assert!(ClusterConfig::default().with_max_lights(0).validate().is_err());

        let mut config = ClusterConfig::default();
        config.workgroup_size = 512;
        assert!(matches!(
            config.validate(),
            Err(RendererError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_oversized_tables() {
        let config = ClusterConfig::default()
            .with_dims(1024, 1024, 64)
            .with_max_lights_per_cluster(1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn dispatch_beyond_device_limit_is_rejected() {
        let config = ClusterConfig::default()
            .with_dims(256, 256, 64)
            .with_max_lights_per_cluster(1);
        assert!(config.validate().is_ok());
        assert_eq!(config.workgroup_count(), 65536);
        assert!(matches!(
            config.check_limits(&wgpu::Limits::default()),
            Err(RendererError::InvalidConfig(message)) if message.contains("workgroups")
        ));
    }

    #[test]
    fn tables_beyond_binding_limit_are_rejected() {
        let limits = wgpu::Limits::default();
        let config = ClusterConfig::default().with_max_lights_per_cluster(100_000);
        assert!(config.validate().is_ok());
        assert!(matches!(
            config.check_limits(&limits),
            Err(RendererError::InvalidConfig(message)) if message.contains("cluster table")
        ));

        let config = ClusterConfig::default().with_max_lights(u32::MAX / 32);
        assert!(matches!(
            config.check_limits(&limits),
            Err(RendererError::InvalidConfig(message)) if message.contains("light buffer")
        ));

        assert!(ClusterConfig::default().check_limits(&limits).is_ok());
        assert!(ClusterConfig::default()
            .check_limits(&wgpu::Limits::downlevel_defaults())
            .is_ok());
    }
}
