//! Interactive ray-tracing viewer.
//!
//! Opens a window, streams the demo scene to the renderer as change events
//! and renders on a fixed timer tick.

mod demo;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use tracer_core::{Config, Timer};
use tracer_platform::Window;
use tracer_renderer::{FrameStatus, Renderer, RendererConfig};
use tracer_rhi::DeviceRef;
use tracer_rhi::vulkan::VulkanDevice;
use tracer_scene::{DirtyTracker, Scene, SceneChange, change_channel};

use crate::demo::DemoScene;

/// Everything that exists while the window is open.
///
/// Field order is drop order: the renderer, which holds the last device
/// reference, must go before the window it presents to.
struct Viewer {
    renderer: Renderer,
    demo: DemoScene,
    changes: Receiver<SceneChange>,
    window: Window,
}

impl Viewer {
    fn new(event_loop: &ActiveEventLoop, config: &Config) -> Result<Self> {
        let window = Window::from_config(event_loop, config)?;
        let device: DeviceRef = Arc::new(
            VulkanDevice::new(&window, config.validation).context("failed to create GPU device")?,
        );

        let (sender, changes) = change_channel();
        let demo = DemoScene::new(sender, aspect_ratio(&window));

        let renderer = Renderer::new(
            device,
            Arc::new(RwLock::new(Scene::new())),
            Arc::new(DirtyTracker::new()),
            RendererConfig::from(config),
            &window,
        )
        .context("failed to create renderer")?;

        Ok(Self {
            renderer,
            demo,
            changes,
            window,
        })
    }

    /// Applies pending scene changes and renders one frame.
    fn tick(&mut self, seconds: f32) {
        self.demo.update(seconds);
        let applied = self
            .renderer
            .scene()
            .write()
            .apply_pending(&self.changes, self.renderer.dirty());
        tracing::trace!("Applied {} scene change(s)", applied);

        match self.renderer.tick(&self.window) {
            Ok(FrameStatus::Presented | FrameStatus::Skipped) => {}
            Ok(FrameStatus::SwapchainStale) => {
                info!("Swapchain is stale; recreating on the next frame");
            }
            Err(e) => error!("Frame failed: {}", e),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.window.resize(width, height);
        if !self.window.is_minimized() {
            self.demo.set_aspect_ratio(aspect_ratio(&self.window));
        }
    }
}

fn aspect_ratio(window: &Window) -> f32 {
    window.width().max(1) as f32 / window.height().max(1) as f32
}

struct App {
    config: Config,
    timer: Timer,
    viewer: Option<Viewer>,
}

impl App {
    fn new(config: Config) -> Self {
        let timer = Timer::with_rate(config.frame_rate);
        Self {
            config,
            timer,
            viewer: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        match Viewer::new(event_loop, &self.config) {
            Ok(viewer) => {
                info!("Initialization complete, entering main loop");
                self.timer.reset();
                self.viewer = Some(viewer);
            }
            Err(e) => {
                error!("Failed to initialize viewer: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                viewer.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                self.timer.tick();
                viewer.tick(self.timer.elapsed_secs());
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(viewer) = self.viewer.as_ref() else {
            return;
        };
        if self.timer.is_due(Instant::now()) {
            viewer.window.request_redraw();
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.timer.next_deadline()));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut viewer) = self.viewer.take() {
            viewer.renderer.shutdown();
        }
    }
}

fn main() -> Result<()> {
    tracer_core::init_logging();

    let config = Config::from_env().unwrap_or_else(|e| {
        warn!("Ignoring invalid configuration: {}", e);
        Config::default()
    });
    info!("Starting tracer ({}x{})", config.width, config.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
