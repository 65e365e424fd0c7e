//! The engine: owns the window and the frame scheduler and runs the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use ember_core::Scene;
use ember_gpu::GpuContextBuilder;
use ember_platform::{Window, WinitWindow};
use ember_render::{
    FrameOutcome, FrameScheduler, FrameStats, RenderDevice, RenderSettings, VulkanDevice,
};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::logging::init_logging;

/// Window, device and frame scheduler wired together.
///
/// The scheduler is declared first so that it, and the device and surface it
/// owns, are torn down before the window they render into.
pub struct Engine<D: RenderDevice = VulkanDevice, W: Window = WinitWindow> {
    scheduler: FrameScheduler<D>,
    window: W,
    resized: Arc<AtomicBool>,
}

impl Engine {
    /// Initialize logging, open the window, bring up Vulkan and build the
    /// frame scheduler.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        init_logging();
        info!("{} starting...", config.title);

        let window =
            WinitWindow::new(config.window_config()).context("Failed to open window")?;
        let context = GpuContextBuilder::new()
            .app_name(config.title.clone())
            .validation(config.validation)
            .build(&window)
            .context("Failed to initialize Vulkan")?;
        let device = VulkanDevice::new(
            context,
            ember_shaders::triangle_vertex_shader(),
            ember_shaders::triangle_fragment_shader(),
        )
        .context("Failed to create render device")?;

        Self::with_parts(device, window, config.render_settings())
    }
}

impl<D: RenderDevice, W: Window> Engine<D, W> {
    /// Build an engine from an existing device and window.
    pub fn with_parts(device: D, mut window: W, settings: RenderSettings) -> anyhow::Result<Self> {
        let scheduler = FrameScheduler::new(device, settings, window.drawable_size())
            .context("Failed to create frame scheduler")?;

        let resized = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&resized);
        window.set_resize_callback(Box::new(move |width, height| {
            debug!(width, height, "Window resized");
            flag.store(true, Ordering::Relaxed);
        }));

        Ok(Self {
            scheduler,
            window,
            resized,
        })
    }

    /// Replace the drawn scene. An empty scene clears every frame.
    pub fn load_scene(&mut self, scene: &Scene) -> anyhow::Result<()> {
        self.scheduler
            .load_scene(scene)
            .context("Failed to upload scene")
    }

    /// Poll events and draw one frame.
    ///
    /// Returns `None` once the window has been asked to close.
    pub fn step(&mut self) -> anyhow::Result<Option<FrameOutcome>> {
        self.window.poll_events();
        if self.window.is_closing() {
            return Ok(None);
        }

        if self.resized.swap(false, Ordering::Relaxed) {
            self.scheduler.invalidate_swapchain();
        }

        let outcome = self.scheduler.draw_frame(&mut self.window)?;
        Ok(Some(outcome))
    }

    /// Run until the window closes. Returns the frame counters.
    pub fn run(&mut self) -> anyhow::Result<FrameStats> {
        while self.step()?.is_some() {}

        let stats = self.scheduler.stats();
        info!(
            presented = stats.presented,
            skipped = stats.skipped,
            rebuilds = stats.rebuilds,
            "Shutting down"
        );
        Ok(stats)
    }

    pub fn scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    pub fn stats(&self) -> FrameStats {
        self.scheduler.stats()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;
    use ember_test::{fixtures, DeviceCall, MockDevice, MockWindow};

    use super::*;

    fn engine(device: &MockDevice, window: MockWindow) -> Engine<MockDevice, MockWindow> {
        Engine::with_parts(device.clone(), window, RenderSettings::default()).expect("engine")
    }

    #[test]
    fn runs_until_closed() {
        let device = MockDevice::new();
        let mut window = MockWindow::new(1280, 720);
        window.close_after_polls(6);
        let mut engine = engine(&device, window);
        engine.load_scene(&fixtures::white_triangle()).expect("scene");

        let stats = engine.run().expect("run");
        assert_eq!(stats.presented, 5);
        assert_eq!(stats.skipped, 0);
        assert_eq!(device.present_calls(), 5);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn resize_event_rebuilds_on_next_frame() {
        let device = MockDevice::new();
        let mut engine = engine(&device, MockWindow::new(1280, 720));

        for _ in 0..3 {
            engine.step().expect("step");
        }
        engine.window_mut().resize(640, 480);
        engine.step().expect("step");

        assert_eq!(engine.stats().rebuilds, 1);
        assert_eq!(
            engine.scheduler().swapchain().extent(),
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
        assert!(device.calls().iter().any(|c| matches!(
            c,
            DeviceCall::CreateSwapchain {
                replaces_old: true,
                ..
            }
        )));
    }

    #[test]
    fn closed_window_draws_nothing() {
        let device = MockDevice::new();
        let mut window = MockWindow::new(800, 600);
        window.close();
        let mut engine = engine(&device, window);

        assert_eq!(engine.step().expect("step"), None);
        assert_eq!(engine.run().expect("run"), FrameStats::default());
        assert_eq!(device.acquire_calls(), 0);
    }

    #[test]
    fn drop_releases_device_objects() {
        let device = MockDevice::new();
        let mut window = MockWindow::new(800, 600);
        window.close_after_polls(4);
        {
            let mut engine = engine(&device, window);
            engine.load_scene(&fixtures::triangles(2)).expect("scene");
            engine.run().expect("run");
        }
        assert!(device.leaks().is_empty(), "{:?}", device.leaks());
    }
}
