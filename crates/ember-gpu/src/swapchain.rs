//! Raw swapchain creation, acquisition and presentation.
//!
//! Policy (image count, extent, format and present mode) lives in the
//! renderer; this module only turns a finished [`SwapchainCreateDesc`] into
//! Vulkan calls and classifies the results.

use crate::error::{GpuError, Result};
use ash::vk;

/// Fully resolved swapchain parameters.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainCreateDesc {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub graphics_family: u32,
    pub present_family: u32,
    pub old_swapchain: vk::SwapchainKHR,
}

impl SwapchainCreateDesc {
    /// Whether images must be shared between two queue families.
    pub fn is_concurrent(&self) -> bool {
        self.graphics_family != self.present_family
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired. `suboptimal` means it is still usable but the
    /// swapchain no longer matches the surface exactly.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain is unusable and no image was acquired.
    OutOfDate,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Swapchain handle together with the images it owns.
pub struct RawSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
}

impl RawSwapchain {
    /// Create a swapchain from `desc`.
    ///
    /// `desc.old_swapchain` is handed to the driver for resource reuse but is
    /// not destroyed here.
    ///
    /// # Safety
    /// The loader and every handle in `desc` must be valid.
    pub unsafe fn new(
        swapchain_loader: &ash::khr::swapchain::Device,
        desc: &SwapchainCreateDesc,
    ) -> Result<Self> {
        let families = [desc.graphics_family, desc.present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(desc.old_swapchain);

        create_info = if desc.is_concurrent() {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = match swapchain_loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(e.into());
            }
        };

        tracing::debug!(
            images = images.len(),
            width = desc.extent.width,
            height = desc.extent.height,
            present_mode = ?desc.present_mode,
            "Swapchain created"
        );

        Ok(Self { swapchain, images })
    }

    /// Acquire the next presentable image.
    ///
    /// # Safety
    /// The loader, swapchain and semaphore must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn acquire_next_image(
        swapchain_loader: &ash::khr::swapchain::Device,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        let fence = vk::Fence::null();
        match swapchain_loader.acquire_next_image(swapchain, timeout_ns, semaphore, fence) {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation once `wait` is signaled.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn present(
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }
}
