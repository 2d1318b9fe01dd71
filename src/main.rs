use std::any::Any;
use std::env;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use clustered_deferred::app::{camera_from_scene, frame_lights, print_summary, summarize};
use clustered_deferred::{
    ClusterConfig, ClusteredDeferredRenderer, Frame, RenderContext, RenderStrategy, RendererError,
    RendererResult, Scene,
};

const DEFAULT_DEMO_LIGHTS: usize = 64;
const SUMMARY_RESOLUTION: Vec2 = Vec2::new(1280.0, 720.0);

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let scene = match &options.scene_path {
        Some(path) => Scene::load(path).with_context(|| format!("failed to load scene {path}"))?,
        None => Scene::demo(),
    };
    println!(
        "Loaded scene with {} nodes ({} lights)",
        scene.nodes.len(),
        scene.lights.len()
    );

    if options.summary_only {
        return run_summary(&scene, &options);
    }
    match run_interactive(scene.clone(), &options) {
        Ok(()) => Ok(()),
        Err(err) if can_fall_back(&err) => {
            eprintln!("{err}. Falling back to --summary-only mode.");
            run_summary(&scene, &options)
        }
        Err(err) => Err(err),
    }
}

fn can_fall_back(err: &anyhow::Error) -> bool {
    err.downcast_ref::<WindowInitError>().is_some()
        || matches!(err.downcast_ref::<RendererError>(), Some(RendererError::Unavailable(_)))
}

fn run_summary(scene: &Scene, options: &CliOptions) -> Result<()> {
    let camera = camera_from_scene(scene, SUMMARY_RESOLUTION);
    let lights = frame_lights(scene, options.demo_lights, 0.0, &options.config)?;
    let summary = summarize(&options.config, &camera, &lights)?;
    print_summary(scene, &options.config, &summary);
    Ok(())
}

fn run_interactive(scene: Scene, options: &CliOptions) -> Result<()> {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(|_| {}));
    let event_loop = panic::catch_unwind(AssertUnwindSafe(EventLoop::new));
    panic::set_hook(default_hook);
    let event_loop = event_loop
        .map_err(|panic| WindowInitError::from_panic("event loop", panic))?
        .map_err(|err| WindowInitError::from_error("event loop", err))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DemoApp {
        scene,
        config: options.config,
        demo_lights: options.demo_lights,
        started: Instant::now(),
        state: None,
        error: None,
    };
    event_loop.run_app(&mut app).context("event loop failed")?;

    match app.error.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct DemoApp {
    scene: Scene,
    config: ClusterConfig,
    demo_lights: usize,
    started: Instant,
    state: Option<GpuState>,
    error: Option<anyhow::Error>,
}

impl DemoApp {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for DemoApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title("Clustered Deferred")
            .with_inner_size(LogicalSize::new(1280.0, 720.0));
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => return self.fail(event_loop, WindowInitError::from_error("window", err).into()),
        };
        match block_on(GpuState::new(window, &self.scene, self.config)) {
            Ok(state) => self.state = Some(state),
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape) =>
            {
                event_loop.exit()
            }
            WindowEvent::Resized(size) => {
                if let Err(err) = state.resize(size) {
                    self.fail(event_loop, err.into());
                }
            }
            WindowEvent::RedrawRequested => {
                let time = self.started.elapsed().as_secs_f32();
                if let Err(err) = state.redraw(&self.scene, self.demo_lights, time) {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

struct GpuState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    ctx: RenderContext,
    renderer: ClusteredDeferredRenderer,
}

impl GpuState {
    async fn new(window: Arc<Window>, scene: &Scene, config: ClusterConfig) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| WindowInitError::from_error("surface", err))?;
        let (ctx, adapter) = RenderContext::request(&instance, Some(&surface), None).await?;

        let caps = surface.get_capabilities(&adapter);
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: ctx.target_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: caps
                .present_modes
                .iter()
                .copied()
                .find(|mode| matches!(mode, wgpu::PresentMode::Mailbox | wgpu::PresentMode::Immediate))
                .unwrap_or(wgpu::PresentMode::Fifo),
            desired_maximum_frame_latency: 2,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&ctx.device, &surface_config);

        let renderer = ClusteredDeferredRenderer::new(
            &ctx,
            config,
            surface_config.width,
            surface_config.height,
            scene,
        )?;
        Ok(Self {
            window,
            surface,
            surface_config,
            ctx,
            renderer,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> RendererResult<()> {
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        self.surface_config.width = size.width;
        self.surface_config.height = size.height;
        self.surface.configure(&self.ctx.device, &self.surface_config);
        self.renderer.resize(size.width, size.height)
    }

    fn redraw(&mut self, scene: &Scene, demo_lights: usize, time: f32) -> Result<()> {
        let resolution = Vec2::new(
            self.surface_config.width as f32,
            self.surface_config.height as f32,
        );
        let camera = camera_from_scene(scene, resolution);
        let lights = frame_lights(scene, demo_lights, time, self.renderer.config())?;

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.resize(self.window.inner_size())?;
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                info!("surface timeout; retrying next frame");
                return Ok(());
            }
            Err(err) => return Err(RendererError::from(err).into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.renderer.draw(&Frame {
            target: &view,
            camera: &camera,
            lights: &lights,
        })?;
        output.present();

        if let Some(stats) = self.renderer.last_stats() {
            if stats.overflowed_clusters > 0 {
                warn!("{} clusters over capacity this frame", stats.overflowed_clusters);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct WindowInitError {
    message: String,
}

impl WindowInitError {
    fn from_panic(stage: &str, panic: Box<dyn Any + Send>) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {}", panic_message(panic)),
        }
    }

    fn from_error(stage: &str, err: impl fmt::Display) -> Self {
        Self {
            message: format!("failed to initialize {stage}: {err}"),
        }
    }
}

impl fmt::Display for WindowInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WindowInitError {}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => (*msg).to_string(),
            Err(_) => "unknown panic".into(),
        },
    }
}

const USAGE: &str = "Usage: clustered-deferred [scene.xml] [--grid XxYxZ] \
[--max-lights-per-cluster K] [--lights N] [--summary-only] [--diagnostics]";

#[derive(Debug)]
struct CliOptions {
    scene_path: Option<String>,
    config: ClusterConfig,
    demo_lights: usize,
    summary_only: bool,
}

impl CliOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut options = Self {
            scene_path: None,
            config: ClusterConfig::default(),
            demo_lights: DEFAULT_DEMO_LIGHTS,
            summary_only: false,
        };
        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{flag} expects a value. {USAGE}"))
            };
            match arg.as_str() {
                "--grid" => {
                    let [x, y, z] = parse_grid(&value("--grid")?)?;
                    options.config = options.config.with_dims(x, y, z);
                }
                "--max-lights-per-cluster" => {
                    let k = value("--max-lights-per-cluster")?
                        .parse()
                        .context("--max-lights-per-cluster expects an integer")?;
                    options.config = options.config.with_max_lights_per_cluster(k);
                }
                "--lights" => {
                    options.demo_lights = value("--lights")?
                        .parse()
                        .context("--lights expects an integer")?;
                }
                "--summary-only" => options.summary_only = true,
                "--diagnostics" => options.config.diagnostics = true,
                other if other.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                path if options.scene_path.is_none() => options.scene_path = Some(path.to_string()),
                extra => return Err(anyhow!("Unexpected argument: {extra}. {USAGE}")),
            }
        }
        options.config.validate()?;
        Ok(options)
    }
}

fn parse_grid(value: &str) -> Result<[u32; 3]> {
    let dims = value
        .split('x')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .with_context(|| format!("invalid grid dimension {part}"))
        })
        .collect::<Result<Vec<_>>>()?;
    dims.try_into()
        .map_err(|_| anyhow!("--grid expects XxYxZ, got {value}"))
}
