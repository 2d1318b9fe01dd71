use thiserror::Error;

/// Failures surfaced by the renderer to its caller.
///
/// Construction-time variants abort renderer creation outright. `DeviceLost`
/// and `Surface` are runtime failures that require the caller to rebuild the
/// renderer (or reconfigure the surface); nothing at this layer retries.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("invalid cluster configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build {label}: {message}")]
    Shader { label: String, message: String },

    #[error("failed to allocate {label}: {message}")]
    Resource { label: String, message: String },

    #[error("light set holds {count} lights but the renderer was configured for {capacity}")]
    LightCapacity { count: usize, capacity: usize },

    #[error("invalid light {index}: {reason}")]
    InvalidLight { index: usize, reason: String },

    #[error("invalid mesh {name}: {reason}")]
    InvalidMesh { name: String, reason: String },

    #[error("GPU unavailable: {0}")]
    Unavailable(String),

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
}

impl RendererError {
    pub fn config<T: ToString>(msg: T) -> Self {
        RendererError::InvalidConfig(msg.to_string())
    }
}

pub type RendererResult<T> = Result<T, RendererError>;
