use std::sync::Arc;

use log::{error, info};
use parking_lot::Mutex;

use crate::error::{RendererError, RendererResult};

/// Device handles shared by every pass, with an explicit lifetime: created
/// once at start-up and dropped on shutdown or device loss.
#[derive(Clone)]
pub struct RenderContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    /// Format of the texture the lighting resolve writes into.
    pub target_format: wgpu::TextureFormat,
    lost: Arc<Mutex<Option<String>>>,
}

impl RenderContext {
    /// Wraps an existing device. Installs the device-lost hook so later
    /// frames fail with [`RendererError::DeviceLost`].
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        let lost = Arc::new(Mutex::new(None));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            error!("GPU device lost ({reason:?}): {message}");
            *flag.lock() = Some(format!("{reason:?}: {message}"));
        });
        Self {
            device,
            queue,
            target_format,
            lost,
        }
    }

    /// Creates a device on the first adapter compatible with `surface`
    /// (or any adapter when rendering off-screen).
    pub async fn request(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
        target_format: Option<wgpu::TextureFormat>,
    ) -> RendererResult<(Self, wgpu::Adapter)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RendererError::Unavailable(format!("no GPU adapter: {err}")))?;
        info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("clustered-deferred-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|err| RendererError::Unavailable(format!("failed to create device: {err}")))?;

        let format = match (target_format, surface) {
            (Some(format), _) => format,
            (None, Some(surface)) => {
                let caps = surface.get_capabilities(&adapter);
                caps.formats
                    .iter()
                    .copied()
                    .find(wgpu::TextureFormat::is_srgb)
                    .or_else(|| caps.formats.first().copied())
                    .ok_or_else(|| RendererError::config("surface reports no formats"))?
            }
            (None, None) => wgpu::TextureFormat::Rgba8UnormSrgb,
        };
        Ok((Self::new(device, queue, format), adapter))
    }

    /// Fails once the device has been reported lost.
    pub fn check_device(&self) -> RendererResult<()> {
        match self.lost.lock().as_ref() {
            Some(reason) => Err(RendererError::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    /// Blocks until all submitted work has finished.
    pub fn drain(&self) -> RendererResult<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|err| RendererError::DeviceLost(format!("waiting for submitted work: {err}")))
    }

    /// Runs `build` inside a validation error scope so a bad shader or
    /// pipeline aborts setup instead of surfacing at draw time.
    pub fn validated<T>(&self, label: &str, build: impl FnOnce(&wgpu::Device) -> T) -> RendererResult<T> {
        self.scoped(build, |message| RendererError::Shader {
            label: label.to_string(),
            message,
        })
    }

    /// Like [`validated`](Self::validated) for buffers and textures. Catches
    /// out-of-memory as well as validation failures.
    pub fn allocated<T>(&self, label: &str, build: impl FnOnce(&wgpu::Device) -> T) -> RendererResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = self.scoped(build, |message| RendererError::Resource {
            label: label.to_string(),
            message,
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(RendererError::Resource {
                label: label.to_string(),
                message: err.to_string(),
            }),
            None => value,
        }
    }

    fn scoped<T>(
        &self,
        build: impl FnOnce(&wgpu::Device) -> T,
        fail: impl FnOnce(String) -> RendererError,
    ) -> RendererResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(fail(err.to_string())),
            None => Ok(value),
        }
    }
}
