//! Platform layer: window, event loop and the three host callbacks
//! (surface created, surface changed, draw frame).
//!
//! - No busy loop: a frame is drawn only when the window asks for one.
//! - Load or draw failures are logged; the window stays open.

use std::sync::Arc;

use anyhow::{Context, Result};
use corelib::{CoreError, config::SceneConfig};
use renderer::{FrameOutcome, HeadlessBackend, Renderer, WgpuBackend};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

struct ViewerApp {
    backends: wgpu::Backends,
    size: PhysicalSize<u32>,
    config: SceneConfig,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<WgpuBackend>>,
    fatal: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(backends: wgpu::Backends, width: u32, height: u32, config: SceneConfig) -> Self {
        Self {
            backends,
            size: PhysicalSize::new(width, height),
            config,
            window: None,
            renderer: None,
            fatal: None,
        }
    }

    /// Surface created: window + GPU backend, then load the scene.
    fn create_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("objview")
            .with_inner_size(self.size);
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );
        log::info!(
            "Window created: {}x{}",
            window.inner_size().width,
            window.inner_size().height
        );

        let backend = pollster::block_on(WgpuBackend::new(window.clone(), self.backends))
            .context("failed to initialize GPU")?;
        let mut renderer = Renderer::new(backend, self.config.clone());
        if let Err(err) = renderer.initialize() {
            // Keep the window up; frames are skipped until a load succeeds.
            log::error!("Scene load failed: {err}");
        }

        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn draw(&mut self) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match renderer.draw_frame() {
            Ok(FrameOutcome::Drawn { indices }) => log::trace!("Drew {indices} indices"),
            Ok(FrameOutcome::Skipped) => log::trace!("Frame skipped: nothing loaded"),
            Err(err @ CoreError::Backend(_)) => {
                log::warn!("Frame failed: {err}");
                // Lost/outdated surfaces are reconfigured; try again.
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            Err(err) => log::error!("Frame failed: {err}"),
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.create_surface(event_loop) {
            log::error!("{err:#}");
            self.fatal = Some(err);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested. Exiting event loop.");
                // Release GPU objects while the device is still alive.
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                log::info!("Resized: {}x{}", new_size.width, new_size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(new_size.width, new_size.height);
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                log::info!("Scale factor changed: {scale_factor:.3}");
            }
            WindowEvent::RedrawRequested => self.draw(),
            _ => {}
        }
    }
}

/// Open a window and draw the configured scene until it is closed.
pub fn run_with_renderer(
    backends: wgpu::Backends,
    width: u32,
    height: u32,
    config: SceneConfig,
) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Wait);

    let mut app = ViewerApp::new(backends, width, height, config);
    event_loop
        .run_app(&mut app)
        .map_err(|e| anyhow::anyhow!("Event loop error: {e:?}"))?;

    match app.fatal.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Run the same callbacks against the no-op backend for `frames` frames.
pub fn run_headless(config: SceneConfig, width: u32, height: u32, frames: u32) -> Result<()> {
    let mut renderer = Renderer::new(HeadlessBackend::new(), config);
    renderer.initialize().context("scene load failed")?;
    renderer.resize(width, height);

    let mut indices = 0u64;
    for _ in 0..frames {
        if let FrameOutcome::Drawn { indices: n } = renderer.draw_frame()? {
            indices += u64::from(n);
        }
    }
    log::info!(
        "Headless run: {frames} frame(s), {indices} indices, {} GPU calls",
        renderer.backend().log().snapshot().len()
    );
    Ok(())
}
