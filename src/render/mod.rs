//! GPU side of the renderer: an explicit device context, the three passes
//! and the renderer that records them.

pub mod assignment;
pub mod buffers;
pub mod context;
pub mod gbuffer;
pub mod geometry;
pub mod mesh;
pub mod renderer;
pub mod resolve;
pub(crate) mod shaders;

pub use context::RenderContext;
pub use gbuffer::{GBuffer, GBufferLayout};
pub use renderer::{ClusteredDeferredRenderer, Frame, RenderStrategy};
