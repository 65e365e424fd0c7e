//! Command pools and one-shot submission.

use crate::error::Result;
use crate::sync::{create_fence, wait_for_fence};
use ash::vk;

/// Command pool bound to a single queue family.
///
/// Buffers are allocated with `RESET_COMMAND_BUFFER` so each frame slot can
/// reset its own buffer independently.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be the one this pool was created from.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Destroy the command pool and every buffer allocated from it.
    ///
    /// # Safety
    /// No buffer from this pool may still be executing.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// Submit one command buffer with at most one wait and one signal semaphore.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit(
    device: &ash::Device,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
    wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    signal: Option<vk::Semaphore>,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [cmd];
    let (wait_semaphores, wait_stages) = match wait {
        Some((semaphore, stage)) => (vec![semaphore], vec![stage]),
        None => (Vec::new(), Vec::new()),
    };
    let signal_semaphores: Vec<_> = signal.into_iter().collect();

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

/// Record and execute a throwaway command buffer, blocking until the GPU
/// has finished with it.
///
/// # Safety
/// All handles must be valid.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let cmd = pool.allocate(device, 1)?[0];
    let fence = create_fence(device, false)?;

    let result = (|| {
        begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        record(cmd);
        end_command_buffer(device, cmd)?;
        submit(device, queue, cmd, None, None, fence)?;
        wait_for_fence(device, fence, u64::MAX)
    })();

    device.destroy_fence(fence, None);
    device.free_command_buffers(pool.handle(), &[cmd]);

    result
}
