//! GPU memory management.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, MemoryLocation};
use std::sync::Arc;

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed {
            size: 0,
            usage: "allocator creation".to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    fn allocate(
        &mut self,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
        name: &str,
        usage: String,
    ) -> Result<Allocation> {
        let allocator = self
            .allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| allocation_error(e, requirements.size, usage))
    }

    fn release(&mut self, allocation: Allocation, size: u64) -> Result<()> {
        let Some(allocator) = self.allocator.as_mut() else {
            // Shutdown already returned every block to the driver.
            return Ok(());
        };
        allocator
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed {
                size,
                usage: "free".to_string(),
                reason: e.to_string(),
            })
    }

    /// Create a buffer and bind freshly allocated memory to it.
    ///
    /// Resource exhaustion is reported with the requested size and usage.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device is valid for the allocator's lifetime
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        // SAFETY: `buffer` was just created on this device
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let bound = self
            .allocate(requirements, location, true, name, format!("{usage:?} @ {location:?}"))
            .and_then(|allocation| {
                // SAFETY: the allocation satisfies `requirements` and is unbound
                let bind = unsafe {
                    self.device
                        .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                };
                match bind {
                    Ok(()) => Ok(allocation),
                    Err(e) => {
                        self.release(allocation, size)?;
                        Err(e.into())
                    }
                }
            });
        let allocation = match bound {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: nothing references the buffer yet
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        tracing::debug!(name, size, ?usage, ?location, "Buffer allocated");
        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Destroy a buffer and return its memory.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        // SAFETY: the caller guarantees the GPU no longer uses the buffer
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        buffer.buffer = vk::Buffer::null();
        match buffer.allocation.take() {
            Some(allocation) => self.release(allocation, buffer.size),
            None => Ok(()),
        }
    }

    /// Create an optimally tiled image and bind freshly allocated memory to it.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuImage> {
        // SAFETY: the device is valid for the allocator's lifetime
        let image = unsafe { self.device.create_image(create_info, None)? };
        // SAFETY: `image` was just created on this device
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let usage = create_info.usage;

        let bound = self
            .allocate(requirements, location, false, name, format!("{usage:?} @ {location:?}"))
            .and_then(|allocation| {
                // SAFETY: the allocation satisfies `requirements` and is unbound
                let bind = unsafe {
                    self.device
                        .bind_image_memory(image, allocation.memory(), allocation.offset())
                };
                match bind {
                    Ok(()) => Ok(allocation),
                    Err(e) => {
                        self.release(allocation, requirements.size)?;
                        Err(e.into())
                    }
                }
            });
        let allocation = match bound {
            Ok(allocation) => allocation,
            Err(e) => {
                // SAFETY: nothing references the image yet
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        tracing::debug!(name, ?usage, extent = ?create_info.extent, "Image allocated");
        Ok(GpuImage {
            image,
            allocation: Some(allocation),
            format: create_info.format,
            extent: create_info.extent,
        })
    }

    /// Destroy an image and return its memory. Views must be destroyed first.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        // SAFETY: the caller guarantees the GPU no longer uses the image
        unsafe { self.device.destroy_image(image.image, None) };
        image.image = vk::Image::null();
        match image.allocation.take() {
            Some(allocation) => self.release(allocation, 0),
            None => Ok(()),
        }
    }

    /// Drop the allocator, returning all memory blocks to the driver.
    ///
    /// Must run before the device is destroyed. Live allocations are logged
    /// as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn allocation_error(error: AllocationError, size: u64, usage: String) -> GpuError {
    match error {
        AllocationError::NoCompatibleMemoryTypeFound => {
            GpuError::NoSuitableMemoryType { size, usage }
        }
        other => GpuError::AllocationFailed {
            size,
            usage,
            reason: other.to_string(),
        },
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Host pointer to the buffer memory, if the allocation is mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    fn mapped_range(&self, len: u64) -> Result<*mut u8> {
        let ptr = self
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not host-visible".to_string()))?;
        if len > self.size {
            return Err(GpuError::InvalidState(format!(
                "{len} bytes do not fit a {}-byte buffer",
                self.size
            )));
        }
        Ok(ptr)
    }

    /// Copy `data` to the start of a host-visible buffer.
    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let ptr = self.mapped_range(data.len() as u64)?;
        // SAFETY: the mapping covers `self.size >= data.len()` bytes
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        Ok(())
    }

    /// Copy the first `len` bytes out of a host-visible buffer.
    pub fn read_bytes(&self, len: u64) -> Result<Vec<u8>> {
        let ptr = self.mapped_range(len)?;
        let len = usize::try_from(len)
            .map_err(|_| GpuError::InvalidState(format!("cannot read {len} bytes on this host")))?;
        let mut out = vec![0u8; len];
        // SAFETY: the mapping covers `self.size >= len` bytes
        unsafe { std::ptr::copy_nonoverlapping(ptr.cast_const(), out.as_mut_ptr(), out.len()) };
        Ok(out)
    }
}

/// A GPU image with its allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

/// Create a 2D view covering the first mip level and layer of `image`.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .level_count(1)
                .layer_count(1),
        );

    // SAFETY: guaranteed by the caller
    Ok(unsafe { device.create_image_view(&view_info, None) }?)
}
