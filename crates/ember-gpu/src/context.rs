//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use ember_core::constants::IS_DEBUG;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) surface: SurfaceContext,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the window surface.
    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the presentation queue.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the graphics and presentation queue family indices.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface.destroy();
            self.instance.destroy_instance(None);
        }
        tracing::info!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: IS_DEBUG,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for rendering into `window`.
    ///
    /// The window must outlive the returned context.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?
            .as_raw();

        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::LoaderUnavailable(e.to_string()))?;

        let instance =
            unsafe { create_instance(&entry, &self.app_name, display, self.enable_validation) }?;

        let surface = unsafe { SurfaceContext::new(&entry, &instance, display, window_handle) }?;

        let physical_device = unsafe { select_physical_device(&instance, &surface) }?;

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_families = unsafe { find_queue_families(&instance, physical_device, &surface) }?;
        tracing::info!(
            graphics = queue_families.graphics,
            present = queue_families.present,
            "Queue families selected"
        );

        let (device, graphics_queue, present_queue) =
            unsafe { create_device(&instance, physical_device, queue_families)? };

        let device = Arc::new(device);
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        tracing::info!("Device created");

        Ok(GpuContext {
            entry,
            instance,
            surface,
            physical_device,
            device,
            swapchain_loader,
            capabilities,
            allocator: Mutex::new(allocator),
            queue_families,
            graphics_queue,
            present_queue,
        })
    }
}

/// Graphics and presentation queue family indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Whether presentation happens on a different family than graphics.
    pub const fn is_distinct(&self) -> bool {
        self.graphics != self.present
    }
}

/// Pick graphics and present families from `(flags, can_present)` pairs.
///
/// A single family doing both wins; otherwise the first graphics family and
/// the first present-capable family are paired.
pub fn choose_queue_families(families: &[(vk::QueueFlags, bool)]) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;

    for (i, &(flags, can_present)) in (0u32..).zip(families) {
        let is_graphics = flags.contains(vk::QueueFlags::GRAPHICS);

        if is_graphics && can_present {
            return Some(QueueFamilyIndices {
                graphics: i,
                present: i,
            });
        }
        if is_graphics && graphics.is_none() {
            graphics = Some(i);
        }
        if can_present && present.is_none() {
            present = Some(i);
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
    })
}

/// Find queue families for graphics and presentation.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface: &SurfaceContext,
) -> Result<QueueFamilyIndices> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let families: Vec<_> = (0u32..)
        .zip(&properties)
        .map(|(i, family)| {
            let can_present = unsafe { surface.supports_presentation(physical_device, i) };
            (family.queue_flags, can_present)
        })
        .collect();

    choose_queue_families(&families).ok_or_else(|| {
        GpuError::NoCompatibleQueue("graphics and presentation queues are required".to_string())
    })
}

/// Create the logical device and retrieve queues.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let mut unique_families = vec![queue_families.graphics];
    if queue_families.is_distinct() {
        unique_families.push(queue_families.present);
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe {
        instance
            .create_device(physical_device, &device_create_info, None)
            .map_err(GpuError::from)?
    };

    let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

    Ok((device, graphics_queue, present_queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPHICS: vk::QueueFlags = vk::QueueFlags::GRAPHICS;
    const TRANSFER: vk::QueueFlags = vk::QueueFlags::TRANSFER;

    #[test]
    fn shared_family_is_preferred() {
        let families = [(GRAPHICS, false), (TRANSFER, true), (GRAPHICS, true)];
        let chosen = choose_queue_families(&families).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(!chosen.is_distinct());
    }

    #[test]
    fn distinct_families_when_no_family_does_both() {
        let families = [(GRAPHICS, false), (TRANSFER, true)];
        let chosen = choose_queue_families(&families).unwrap();
        assert_eq!(chosen, QueueFamilyIndices { graphics: 0, present: 1 });
        assert!(chosen.is_distinct());
    }

    #[test]
    fn missing_present_family() {
        assert!(choose_queue_families(&[(GRAPHICS, false)]).is_none());
        assert!(choose_queue_families(&[]).is_none());
    }
}
