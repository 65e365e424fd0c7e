//! The device capability boundary.
//!
//! Everything the frame loop needs from a GPU goes through [`RenderDevice`].
//! Handles are plain `ash::vk` handles so that implementations other than
//! [`VulkanDevice`](crate::VulkanDevice) can hand out fabricated ones.

use ash::vk;
use ember_gpu::{
    AcquireOutcome, PresentOutcome, QueueFamilyIndices, RenderPassDesc, Result,
    SurfaceCapabilities, SwapchainCreateDesc,
};
use gpu_allocator::MemoryLocation;

/// Parameters for an attachment image owned by the render target set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
}

/// GPU operations used by the swapchain manager, frame pool, render targets,
/// frame scheduler and scene upload.
///
/// Methods take `&self`; implementations keep any mutable bookkeeping behind
/// interior mutability. Command recording methods (`cmd_*`) cannot fail.
pub trait RenderDevice {
    type Buffer;
    type Image;
    type Pipeline;

    // Surface and adapter queries.

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;
    fn queue_families(&self) -> QueueFamilyIndices;
    fn surface(&self) -> vk::SurfaceKHR;
    fn max_sample_count(&self) -> vk::SampleCountFlags;
    fn depth_format(&self) -> Option<vk::Format>;

    // Swapchain and presentation.

    fn create_swapchain(
        &self,
        desc: &SwapchainCreateDesc,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome>;

    // Images, render passes, framebuffers, pipelines.

    fn create_image(&self, desc: &AttachmentImageDesc, name: &str) -> Result<Self::Image>;
    fn image_handle(image: &Self::Image) -> vk::Image;
    fn destroy_image(&self, image: Self::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_pipeline(
        &self,
        render_pass: vk::RenderPass,
        desc: &RenderPassDesc,
    ) -> Result<Self::Pipeline>;
    fn destroy_pipeline(&self, pipeline: Self::Pipeline);

    // Synchronization.

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn wait_idle(&self) -> Result<()>;

    // Command buffers.

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &Self::Pipeline);
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &Self::Buffer);
    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: &Self::Buffer,
        dst: &Self::Buffer,
        size: u64,
    );

    /// Submit `cmd` on the graphics queue. It waits on `wait` at `wait_stage`
    /// and signals `signal` and `fence` on completion.
    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;

    /// Record with `record`, submit, and block until the GPU is done.
    fn execute_one_shot(&self, record: &mut dyn FnMut(vk::CommandBuffer)) -> Result<()>;

    // Buffers.

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self::Buffer>;
    /// Copy `data` into a host-visible buffer starting at offset 0.
    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]) -> Result<()>;
    /// Read the first `len` bytes of a host-visible buffer.
    fn read_buffer(&self, buffer: &Self::Buffer, len: u64) -> Result<Vec<u8>>;
    fn destroy_buffer(&self, buffer: Self::Buffer);
}
