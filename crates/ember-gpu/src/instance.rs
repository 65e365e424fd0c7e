//! Vulkan instance creation and physical device selection.

use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use ash::vk;
use ember_core::constants::{ENGINE_NAME, ENGINE_VERSION};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![
        // Standard validation layer
        c"VK_LAYER_KHRONOS_validation",
    ]
}

/// Create a Vulkan instance able to present to the given display.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    display: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|e| GpuError::InvalidState(format!("Invalid application name: {e}")))?;
    let engine_name = CString::new(ENGINE_NAME)
        .map_err(|e| GpuError::InvalidState(format!("Invalid engine name: {e}")))?;
    let (major, minor, patch) = ENGINE_VERSION;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, major, minor, patch))
        .api_version(vk::API_VERSION_1_1);

    // Surface extensions required by the windowing system
    #[allow(unused_mut)]
    let mut extension_names: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::ExtensionNotSupported(format!("surface extensions: {e}")))?
        .to_vec();

    #[cfg(target_os = "macos")]
    extension_names.push(ash::khr::portability_enumeration::NAME.as_ptr());

    // Only request validation layers that are actually installed
    let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let mut layers = Vec::new();
    if enable_validation {
        for layer in validation_layers() {
            let found = available_layers.iter().any(|props| {
                // SAFETY: layer_name is a NUL-terminated array filled by the driver
                let name = unsafe { CStr::from_ptr(props.layer_name.as_ptr()) };
                name == layer
            });
            if found {
                layers.push(layer);
            } else {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
        }
    }

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    tracing::info!(validation = !layers.is_empty(), "Vulkan instance created");

    Ok(instance)
}

/// Select the physical device to render with.
///
/// Devices that cannot present to `surface` are discarded. Discrete GPUs
/// win over integrated ones; on a tie the first enumerated device is kept.
///
/// # Safety
/// The instance and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: &SurfaceContext,
) -> Result<vk::PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        tracing::error!("No GPU available");
        return Err(GpuError::NoSuitableDevice);
    }

    let mut best_device = None;
    let mut best_score = -1i32;

    for device in devices {
        if !unsafe { is_device_suitable(instance, device, surface) } {
            continue;
        }
        let score = unsafe { score_physical_device(instance, device) };
        if score > best_score {
            best_score = score;
            best_device = Some(device);
        }
    }

    best_device.ok_or_else(|| {
        tracing::error!("No compatible GPU found");
        GpuError::NoSuitableDevice
    })
}

/// A device is suitable when it supports the swapchain extension, has a
/// graphics queue and a queue able to present to the surface, and exposes
/// at least one surface format and present mode.
unsafe fn is_device_suitable(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: &SurfaceContext,
) -> bool {
    let extensions = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };
    let has_swapchain = extensions.iter().any(|ext| {
        // SAFETY: extension_name is a NUL-terminated array filled by the driver
        let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
        name == ash::khr::swapchain::NAME
    });
    if !has_swapchain {
        return false;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let has_graphics = families
        .iter()
        .any(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));
    let has_present = (0u32..)
        .zip(&families)
        .any(|(index, _)| unsafe { surface.supports_presentation(device, index) });
    if !has_graphics || !has_present {
        return false;
    }

    unsafe { surface.is_compatible_with(device) }
}

/// Score a physical device for selection.
unsafe fn score_physical_device(instance: &ash::Instance, device: vk::PhysicalDevice) -> i32 {
    let properties = unsafe { instance.get_physical_device_properties(device) };

    match properties.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 0,
    }
}
