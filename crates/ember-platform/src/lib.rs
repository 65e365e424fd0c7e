//! Platform abstraction for the Ember engine.
//!
//! The renderer only sees the [`Window`] trait. [`WinitWindow`] is the
//! desktop implementation; it drives winit with `pump_app_events` so the
//! engine keeps ownership of its own frame loop.

mod winit_window;

use thiserror::Error;

pub use winit_window::WinitWindow;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Event loop error: {0}")]
    EventLoop(String),
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Window handle unavailable: {0}")]
    Handle(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Callback invoked with the new drawable size in pixels.
pub type ResizeCallback = Box<dyn FnMut(u32, u32)>;

/// Window configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ember Engine".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// What the renderer needs from a window.
pub trait Window {
    /// Current drawable size in pixels. Either dimension is zero while minimized.
    fn drawable_size(&self) -> (u32, u32);

    /// Whether the user asked for the window to close.
    fn is_closing(&self) -> bool;

    /// Process pending events without blocking.
    fn poll_events(&mut self);

    /// Block while either drawable dimension is zero, unless the window is closing.
    fn wait_while_minimized(&mut self);

    /// Register the callback run on every resize event. Replaces any previous one.
    fn set_resize_callback(&mut self, callback: ResizeCallback);

    /// Whether the drawable area currently has no pixels.
    fn is_minimized(&self) -> bool {
        let (width, height) = self.drawable_size();
        width == 0 || height == 0
    }
}
