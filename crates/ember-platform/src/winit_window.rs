use std::time::Duration;

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use crate::{PlatformError, ResizeCallback, Result, Window, WindowConfig};

/// Desktop window backed by winit.
pub struct WinitWindow {
    event_loop: EventLoop<()>,
    state: WindowState,
}

struct WindowState {
    config: WindowConfig,
    window: Option<winit::window::Window>,
    size: (u32, u32),
    closing: bool,
    error: Option<PlatformError>,
    on_resize: Option<ResizeCallback>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = winit::window::Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(self.config.resizable);

        match event_loop.create_window(attributes) {
            Ok(window) => {
                let size = window.inner_size();
                self.size = (size.width, size.height);
                info!(
                    title = %self.config.title,
                    width = size.width,
                    height = size.height,
                    "Window created"
                );
                self.window = Some(window);
            }
            Err(e) => {
                self.error = Some(PlatformError::WindowCreation(e.to_string()));
                self.closing = true;
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.closing = true;
            }
            WindowEvent::Resized(size) => {
                if (size.width, size.height) == self.size {
                    return;
                }
                debug!(width = size.width, height = size.height, "Window resized");
                self.size = (size.width, size.height);
                if let Some(callback) = &mut self.on_resize {
                    callback(size.width, size.height);
                }
            }
            _ => {}
        }
    }
}

impl WinitWindow {
    /// Open a window and wait until the platform has created it.
    pub fn new(config: WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;

        let mut window = Self {
            event_loop,
            state: WindowState {
                config,
                window: None,
                size: (0, 0),
                closing: false,
                error: None,
                on_resize: None,
            },
        };

        while window.state.window.is_none() && !window.state.closing {
            window.pump(Some(Duration::ZERO));
        }

        if let Some(error) = window.state.error.take() {
            return Err(error);
        }
        if window.state.window.is_none() {
            return Err(PlatformError::WindowCreation(
                "event loop exited before the window was created".to_string(),
            ));
        }

        Ok(window)
    }

    /// The underlying winit window.
    pub fn winit(&self) -> Option<&winit::window::Window> {
        self.state.window.as_ref()
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state)
        {
            debug!(code, "Event loop exited");
            self.state.closing = true;
        }
    }
}

impl Window for WinitWindow {
    fn drawable_size(&self) -> (u32, u32) {
        self.state.size
    }

    fn is_closing(&self) -> bool {
        self.state.closing
    }

    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_while_minimized(&mut self) {
        if self.is_minimized() && !self.state.closing {
            info!("Window minimized, pausing");
        }
        while self.is_minimized() && !self.state.closing {
            self.pump(None);
        }
    }

    fn set_resize_callback(&mut self, callback: ResizeCallback) {
        self.state.on_resize = Some(callback);
    }
}

impl HasDisplayHandle for WinitWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .display_handle()
    }
}

impl HasWindowHandle for WinitWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.state
            .window
            .as_ref()
            .ok_or(HandleError::Unavailable)?
            .window_handle()
    }
}
