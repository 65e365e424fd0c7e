//! Swapchain manager: negotiates and owns the presentable image ring.

use ash::vk;
use ember_gpu::SwapchainCreateDesc;
use tracing::info;

use crate::device::RenderDevice;
use crate::error::{RenderError, Result};

/// Image count asked for when the device allows it (triple buffering).
pub const PREFERRED_IMAGE_COUNT: u32 = 3;

/// `currentExtent` value meaning the surface size is decided by the swapchain.
const UNDEFINED_EXTENT: u32 = u32::MAX;

/// User-facing swapchain knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub preferred_image_count: u32,
    /// Force FIFO even when a non-blocking mode is available.
    pub vsync: bool,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            preferred_image_count: PREFERRED_IMAGE_COUNT,
            vsync: false,
        }
    }
}

/// Minimum image count to request.
///
/// Starts from `preferred`; if the device needs more, takes one above its
/// minimum so acquisition does not wait on the driver. Clamped to the
/// device maximum when that is bounded (non-zero).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, preferred: u32) -> u32 {
    let mut count = preferred;
    if count < capabilities.min_image_count {
        count = capabilities.min_image_count + 1;
    }
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// Swapchain extent: the surface's current extent when defined, otherwise
/// the drawable size clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != UNDEFINED_EXTENT {
        return capabilities.current_extent;
    }

    let (width, height) = drawable_size;
    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Prefer 8-bit BGRA sRGB with the sRGB nonlinear color space, else the first format.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or(RenderError::NoCompatibleFormat)
}

/// Prefer MAILBOX, fall back to FIFO. With `vsync`, always FIFO.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    vsync: bool,
) -> Result<vk::PresentModeKHR> {
    if available.is_empty() {
        return Err(RenderError::NoCompatiblePresentMode);
    }
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        return Ok(vk::PresentModeKHR::MAILBOX);
    }
    Ok(vk::PresentModeKHR::FIFO)
}

/// Owns the swapchain, its images and one color view per image.
///
/// Format and extent are fixed for the lifetime of one swapchain; a resize
/// goes through [`SwapchainManager::recreate`].
pub struct SwapchainManager {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl SwapchainManager {
    /// Negotiate and create a swapchain for the device's surface.
    pub fn create<D: RenderDevice>(
        device: &D,
        preferences: &SwapchainPreferences,
        drawable_size: (u32, u32),
    ) -> Result<Self> {
        let swapchain = Self::build(device, preferences, drawable_size, vk::SwapchainKHR::null())?;
        info!(
            width = swapchain.extent.width,
            height = swapchain.extent.height,
            image_count = swapchain.image_count(),
            format = ?swapchain.format.format,
            present_mode = ?swapchain.present_mode,
            "Swapchain created"
        );
        Ok(swapchain)
    }

    /// Replace this swapchain with a fresh one at `drawable_size`.
    ///
    /// The device must be idle and nothing may still reference the old views.
    pub fn recreate<D: RenderDevice>(
        &mut self,
        device: &D,
        preferences: &SwapchainPreferences,
        drawable_size: (u32, u32),
    ) -> Result<()> {
        self.destroy_views(device);

        let rebuilt = Self::build(device, preferences, drawable_size, self.handle)?;
        device.destroy_swapchain(self.handle);
        *self = rebuilt;

        info!(
            width = self.extent.width,
            height = self.extent.height,
            image_count = self.image_count(),
            "Swapchain rebuilt"
        );
        Ok(())
    }

    fn build<D: RenderDevice>(
        device: &D,
        preferences: &SwapchainPreferences,
        drawable_size: (u32, u32),
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let surface = device.surface_capabilities()?;
        let format = choose_surface_format(&surface.formats)?;
        let present_mode = choose_present_mode(&surface.present_modes, preferences.vsync)?;
        let capabilities = &surface.capabilities;
        let families = device.queue_families();

        let desc = SwapchainCreateDesc {
            surface: device.surface(),
            min_image_count: choose_image_count(capabilities, preferences.preferred_image_count),
            format,
            extent: choose_extent(capabilities, drawable_size),
            present_mode,
            pre_transform: capabilities.current_transform,
            graphics_family: families.graphics,
            present_family: families.present,
            old_swapchain,
        };

        let (handle, images) = device.create_swapchain(&desc)?;

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            match device.create_image_view(image, format.format, vk::ImageAspectFlags::COLOR) {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        device.destroy_image_view(view);
                    }
                    device.destroy_swapchain(handle);
                    return Err(e.into());
                }
            }
        }

        Ok(Self {
            handle,
            images,
            views,
            format,
            extent: desc.extent,
            present_mode,
        })
    }

    fn destroy_views<D: RenderDevice>(&mut self, device: &D) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
    }

    /// Destroy the views and the swapchain. Safe to call twice.
    pub fn destroy<D: RenderDevice>(&mut self, device: &D) {
        self.destroy_views(device);
        if self.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: UNDEFINED_EXTENT,
                height: UNDEFINED_EXTENT,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_prefers_triple_buffering() {
        assert_eq!(choose_image_count(&caps(2, 8), 3), 3);
        assert_eq!(choose_image_count(&caps(1, 0), 3), 3);
    }

    #[test]
    fn image_count_goes_above_high_minimum() {
        assert_eq!(choose_image_count(&caps(4, 0), 3), 5);
        assert_eq!(choose_image_count(&caps(4, 8), 3), 5);
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(choose_image_count(&caps(1, 2), 3), 2);
        assert_eq!(choose_image_count(&caps(4, 4), 3), 4);
    }

    #[test]
    fn image_count_stays_in_range_for_all_small_caps() {
        for min in 1..=6 {
            for max in std::iter::once(0).chain(min..=8) {
                let count = choose_image_count(&caps(min, max), PREFERRED_IMAGE_COUNT);
                assert!(count >= min, "min={min} max={max} count={count}");
                if max > 0 {
                    assert!(count <= max, "min={min} max={max} count={count}");
                }
                if max == 0 || max >= 3 {
                    assert!(count >= 3, "min={min} max={max} count={count}");
                }
            }
        }
    }

    #[test]
    fn defined_extent_is_used_verbatim() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&c, (1920, 1080)), c.current_extent);
    }

    #[test]
    fn undefined_extent_clamps_drawable_size() {
        let c = caps(2, 3);
        assert_eq!(
            choose_extent(&c, (640, 480)),
            vk::Extent2D {
                width: 640,
                height: 480
            }
        );
        assert_eq!(
            choose_extent(&c, (8000, 0)),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );
    }

    #[test]
    fn surface_format_prefers_bgra_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap(), srgb);
        assert_eq!(choose_surface_format(&[unorm]).unwrap(), unorm);
        assert!(matches!(
            choose_surface_format(&[]),
            Err(RenderError::NoCompatibleFormat)
        ));
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(
            choose_present_mode(&all, false).unwrap(),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&all, true).unwrap(),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false)
                .unwrap(),
            vk::PresentModeKHR::FIFO
        );
        assert!(matches!(
            choose_present_mode(&[], false),
            Err(RenderError::NoCompatiblePresentMode)
        ));
    }
}
