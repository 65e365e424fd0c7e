//! Per-frame-in-flight resources.

use ash::vk;
use ember_gpu::GpuError;
use tracing::info;

use crate::device::RenderDevice;
use crate::error::Result;

/// Resources owned by one frame in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the slot's last submission completes. Created signaled.
    pub in_flight: vk::Fence,
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_acquired: vk::Semaphore,
    /// Signaled by the submission; presentation waits on it.
    pub render_complete: vk::Semaphore,
}

/// Number of frames in flight for `image_count` swapchain images.
///
/// `desired` of `None` means one frame per image. Never zero.
pub fn frames_in_flight(image_count: usize, desired: Option<usize>) -> usize {
    desired
        .map_or(image_count, |desired| desired.min(image_count))
        .max(1)
}

/// Fixed ring of [`FrameSlot`]s, created once and reused round-robin.
pub struct FramePool {
    slots: Vec<FrameSlot>,
}

impl FramePool {
    /// Allocate `count` slots. Partially created resources are released on failure.
    pub fn new<D: RenderDevice>(device: &D, count: usize) -> Result<Self> {
        assert!(count > 0, "frame pool needs at least one slot");

        let requested = u32::try_from(count).map_err(|_| {
            GpuError::InvalidState(format!("{count} frames in flight is out of range"))
        })?;
        let command_buffers = device.allocate_command_buffers(requested)?;
        let mut pool = Self {
            slots: Vec::with_capacity(count),
        };

        for (i, &command_buffer) in command_buffers.iter().enumerate() {
            match Self::create_slot(device, command_buffer) {
                Ok(slot) => pool.slots.push(slot),
                Err(e) => {
                    pool.destroy(device);
                    device.free_command_buffers(&command_buffers[i..]);
                    return Err(e);
                }
            }
        }

        info!(frames_in_flight = count, "Frame pool created");
        Ok(pool)
    }

    fn create_slot<D: RenderDevice>(
        device: &D,
        command_buffer: vk::CommandBuffer,
    ) -> Result<FrameSlot> {
        let in_flight = device.create_fence(true)?;
        let image_acquired = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_fence(in_flight);
                return Err(e.into());
            }
        };
        let render_complete = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_acquired);
                device.destroy_fence(in_flight);
                return Err(e.into());
            }
        };
        Ok(FrameSlot {
            command_buffer,
            in_flight,
            image_acquired,
            render_complete,
        })
    }

    /// The slot for logical frame `frame_index`. Never blocks.
    pub fn slot(&self, frame_index: usize) -> &FrameSlot {
        &self.slots[frame_index % self.slots.len()]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    /// Release every slot. The device must be idle.
    pub fn destroy<D: RenderDevice>(&mut self, device: &D) {
        let command_buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
        for slot in self.slots.drain(..) {
            device.destroy_fence(slot.in_flight);
            device.destroy_semaphore(slot.image_acquired);
            device.destroy_semaphore(slot.render_complete);
        }
        if !command_buffers.is_empty() {
            device.free_command_buffers(&command_buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_frame_per_image_by_default() {
        assert_eq!(frames_in_flight(3, None), 3);
    }

    #[test]
    fn desired_count_is_capped_by_images() {
        assert_eq!(frames_in_flight(3, Some(2)), 2);
        assert_eq!(frames_in_flight(2, Some(4)), 2);
        assert_eq!(frames_in_flight(3, Some(0)), 1);
    }
}
