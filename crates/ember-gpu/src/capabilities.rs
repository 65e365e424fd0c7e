//! GPU capability detection.

use ash::vk;
use std::ffi::CStr;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Upper bound on the multisample count the engine asks for.
pub const MAX_SAMPLE_COUNT: vk::SampleCountFlags = vk::SampleCountFlags::TYPE_8;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Device type (discrete, integrated, ...)
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Highest sample count usable for both color and depth attachments
    pub max_sample_count: vk::SampleCountFlags,
    /// Preferred depth attachment format, if any is supported
    pub depth_format: Option<vk::Format>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let vendor = GpuVendor::from_vendor_id(properties.vendor_id);
        // SAFETY: device_name is a NUL-terminated array filled by the driver
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let limits = &properties.limits;
        let max_sample_count = max_usable_sample_count(
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
        );

        let depth_format = select_depth_format(|format| {
            let props = unsafe {
                instance.get_physical_device_format_properties(physical_device, format)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        });

        Self {
            vendor,
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            max_sample_count,
            depth_format,
        }
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM - {:?} MSAA",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            self.max_sample_count,
        )
    }
}

/// Highest single sample count contained in `supported`, capped at [`MAX_SAMPLE_COUNT`].
pub fn max_usable_sample_count(supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .filter(|count| count.as_raw() <= MAX_SAMPLE_COUNT.as_raw())
    .find(|&count| supported.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// First candidate depth format accepted by `supports`.
pub fn select_depth_format(supports: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| supports(format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn sample_count_picks_highest_supported() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4;
        assert_eq!(max_usable_sample_count(supported), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn sample_count_is_capped() {
        let supported = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_8
            | vk::SampleCountFlags::TYPE_16
            | vk::SampleCountFlags::TYPE_64;
        assert_eq!(max_usable_sample_count(supported), vk::SampleCountFlags::TYPE_8);
    }

    #[test]
    fn sample_count_falls_back_to_single() {
        assert_eq!(
            max_usable_sample_count(vk::SampleCountFlags::TYPE_1),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn depth_format_preference_order() {
        assert_eq!(select_depth_format(|_| true), Some(vk::Format::D32_SFLOAT));
        assert_eq!(
            select_depth_format(|f| f == vk::Format::D24_UNORM_S8_UINT),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(select_depth_format(|_| false), None);
    }
}
