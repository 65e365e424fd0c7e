//! Engine configuration.

use ember_core::constants::IS_DEBUG;
use ember_platform::WindowConfig;
use ember_render::{RenderSettings, SwapchainPreferences};

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Window title, also reported to the driver as the application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Frames in flight (None for one per swapchain image).
    pub frames_in_flight: Option<usize>,
    /// Force FIFO presentation.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Depth testing.
    pub depth: bool,
    /// Multisampling at the highest supported sample count.
    pub msaa: bool,
    pub resizable: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Ember Engine".to_string(),
            width: 1280,
            height: 720,
            frames_in_flight: None,
            vsync: false,
            validation: IS_DEBUG,
            depth: true,
            msaa: true,
            resizable: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of frames in flight.
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = Some(frames);
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    #[must_use]
    pub fn with_msaa(mut self, msaa: bool) -> Self {
        self.msaa = msaa;
        self
    }

    #[must_use]
    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: self.resizable,
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            swapchain: SwapchainPreferences {
                vsync: self.vsync,
                ..SwapchainPreferences::default()
            },
            frames_in_flight: self.frames_in_flight,
            depth: self.depth,
            msaa: self.msaa,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.frames_in_flight, None);
        assert!(!config.vsync);
        assert!(config.depth && config.msaa && config.resizable);
        assert_eq!(config.validation, IS_DEBUG);
    }

    #[test]
    fn builder_flows_into_settings() {
        let config = EngineConfig::new("Test")
            .with_size(640, 480)
            .with_frames_in_flight(2)
            .with_vsync(true)
            .with_msaa(false);

        let window = config.window_config();
        assert_eq!(window.title, "Test");
        assert_eq!((window.width, window.height), (640, 480));

        let settings = config.render_settings();
        assert!(settings.swapchain.vsync);
        assert_eq!(settings.swapchain.preferred_image_count, 3);
        assert_eq!(settings.frames_in_flight, Some(2));
        assert!(settings.depth);
        assert!(!settings.msaa);
    }
}
