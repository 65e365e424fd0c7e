//! [`RenderDevice`] backed by a real Vulkan device.

use std::mem::offset_of;

use ash::vk;
use ember_core::Vertex;
use ember_gpu::command::{self, CommandPool};
use ember_gpu::render_pass::{create_framebuffer, create_render_pass};
use ember_gpu::{
    create_image_view, sync, AcquireOutcome, GpuBuffer, GpuContext, GpuImage, GraphicsPipeline,
    GraphicsPipelineConfig, PresentOutcome, QueueFamilyIndices, RawSwapchain, RenderPassDesc,
    Result, SurfaceCapabilities, SwapchainCreateDesc,
};
use gpu_allocator::MemoryLocation;

use crate::device::{AttachmentImageDesc, RenderDevice};

/// Vertex binding 0: one [`Vertex`] per vertex.
#[allow(clippy::cast_possible_truncation)]
pub fn vertex_bindings() -> Vec<vk::VertexInputBindingDescription> {
    vec![vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(Vertex::STRIDE as u32)
        .input_rate(vk::VertexInputRate::VERTEX)]
}

/// Position at location 0, color at location 1.
#[allow(clippy::cast_possible_truncation)]
pub fn vertex_attributes() -> Vec<vk::VertexInputAttributeDescription> {
    vec![
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(offset_of!(Vertex, position) as u32),
        vk::VertexInputAttributeDescription::default()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(offset_of!(Vertex, color) as u32),
    ]
}

/// Owns the GPU context and the graphics command pool.
pub struct VulkanDevice {
    command_pool: CommandPool,
    pipeline_template: GraphicsPipelineConfig,
    context: GpuContext,
}

impl VulkanDevice {
    /// Wrap `context`, drawing with the given SPIR-V shaders.
    pub fn new(
        context: GpuContext,
        vertex_shader: &[u32],
        fragment_shader: &[u32],
    ) -> Result<Self> {
        // SAFETY: the context owns a valid device and the family comes from it
        let command_pool =
            unsafe { CommandPool::new(context.device(), context.queue_families().graphics)? };

        let pipeline_template = GraphicsPipelineConfig {
            vertex_shader: vertex_shader.to_vec(),
            fragment_shader: fragment_shader.to_vec(),
            vertex_bindings: vertex_bindings(),
            vertex_attributes: vertex_attributes(),
            ..Default::default()
        };

        Ok(Self {
            command_pool,
            pipeline_template,
            context,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn device(&self) -> &ash::Device {
        self.context.device()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        let _ = self.context.wait_idle();
        // SAFETY: the device is idle, so no buffer from the pool is executing
        unsafe { self.command_pool.destroy(self.context.device()) };
    }
}

impl RenderDevice for VulkanDevice {
    type Buffer = GpuBuffer;
    type Image = GpuImage;
    type Pipeline = GraphicsPipeline;

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        self.context
            .surface()
            .capabilities(self.context.physical_device())
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.context.queue_families()
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.context.surface().surface
    }

    fn max_sample_count(&self) -> vk::SampleCountFlags {
        self.context.capabilities().max_sample_count
    }

    fn depth_format(&self) -> Option<vk::Format> {
        self.context.capabilities().depth_format
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainCreateDesc,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        // SAFETY: the surface and loader belong to this context
        let raw = unsafe { RawSwapchain::new(self.context.swapchain_loader(), desc)? };
        Ok((raw.swapchain, raw.images))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: callers destroy a swapchain only after the device is idle
        unsafe {
            self.context
                .swapchain_loader()
                .destroy_swapchain(swapchain, None);
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        // SAFETY: swapchain and semaphore were created by this device
        unsafe {
            RawSwapchain::acquire_next_image(
                self.context.swapchain_loader(),
                swapchain,
                timeout_ns,
                signal,
            )
        }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        // SAFETY: swapchain and semaphore were created by this device
        unsafe {
            RawSwapchain::present(
                self.context.swapchain_loader(),
                self.context.present_queue(),
                swapchain,
                image_index,
                wait,
            )
        }
    }

    fn create_image(&self, desc: &AttachmentImageDesc, name: &str) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        self.context
            .allocator()
            .lock()
            .create_image(&create_info, MemoryLocation::GpuOnly, name)
    }

    fn image_handle(image: &GpuImage) -> vk::Image {
        image.image
    }

    fn destroy_image(&self, mut image: GpuImage) {
        if let Err(e) = self.context.allocator().lock().free_image(&mut image) {
            tracing::warn!("Failed to free image: {e}");
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        // SAFETY: image belongs to this device
        unsafe { create_image_view(self.device(), image, format, aspect) }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        // SAFETY: views are destroyed after the framebuffers using them
        unsafe { self.device().destroy_image_view(view, None) };
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<vk::RenderPass> {
        // SAFETY: the device is valid
        unsafe { create_render_pass(self.device(), desc) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: render passes are destroyed with the device idle
        unsafe { self.device().destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        // SAFETY: views are ordered to match the render pass attachments
        unsafe { create_framebuffer(self.device(), render_pass, views, extent) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: framebuffers are destroyed with the device idle
        unsafe { self.device().destroy_framebuffer(framebuffer, None) };
    }

    fn create_pipeline(
        &self,
        render_pass: vk::RenderPass,
        desc: &RenderPassDesc,
    ) -> Result<GraphicsPipeline> {
        let config = GraphicsPipelineConfig {
            depth_test: desc.has_depth(),
            samples: desc.samples,
            ..self.pipeline_template.clone()
        };
        // SAFETY: shader code comes from the build-time compiled SPIR-V
        unsafe { GraphicsPipeline::new(self.device(), &config, render_pass) }
    }

    fn destroy_pipeline(&self, pipeline: GraphicsPipeline) {
        // SAFETY: pipelines are destroyed with the device idle
        unsafe { pipeline.destroy(self.device()) };
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        // SAFETY: the device is valid
        unsafe { sync::create_fence(self.device(), signaled) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        // SAFETY: fence was created by this device
        unsafe { sync::wait_for_fence(self.device(), fence, timeout_ns) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: the scheduler only resets fences it has just waited on
        unsafe { sync::reset_fence(self.device(), fence) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: fences are destroyed with the device idle
        unsafe { self.device().destroy_fence(fence, None) };
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        // SAFETY: the device is valid
        unsafe { sync::create_semaphore(self.device()) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: semaphores are destroyed with the device idle
        unsafe { self.device().destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&self) -> Result<()> {
        self.context.wait_idle()
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        // SAFETY: the pool was created from this device
        unsafe { self.command_pool.allocate(self.device(), count) }
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        // SAFETY: buffers are freed with the device idle
        unsafe {
            self.device()
                .free_command_buffers(self.command_pool.handle(), command_buffers);
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the pool allows individual resets and the slot fence was waited on
        unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::RELEASE_RESOURCES)?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: cmd is in the initial state
        unsafe {
            command::begin_command_buffer(
                self.device(),
                cmd,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )
        }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        // SAFETY: cmd is recording
        unsafe { command::end_command_buffer(self.device(), cmd) }
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            })
            .clear_values(clear_values);
        // SAFETY: cmd is recording and the framebuffer matches the pass
        unsafe {
            self.device()
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        // SAFETY: cmd is recording
        unsafe {
            self.device().cmd_set_viewport(cmd, 0, &[viewport]);
            self.device().cmd_set_scissor(cmd, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &GraphicsPipeline) {
        // SAFETY: cmd is recording inside a compatible render pass
        unsafe {
            self.device()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        // SAFETY: cmd is recording and the buffer has VERTEX_BUFFER usage
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(cmd, 0, &[buffer.buffer], &[0]);
        }
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32) {
        // SAFETY: cmd is recording with a pipeline and vertex buffer bound
        unsafe { self.device().cmd_draw(cmd, vertex_count, 1, 0, 0) };
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        // SAFETY: cmd is inside a render pass
        unsafe { self.device().cmd_end_render_pass(cmd) };
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: &GpuBuffer, dst: &GpuBuffer, size: u64) {
        let region = vk::BufferCopy::default().size(size);
        // SAFETY: cmd is recording outside a render pass
        unsafe {
            self.device()
                .cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
        }
    }

    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        // SAFETY: all handles were created by this device
        unsafe {
            command::submit(
                self.device(),
                self.context.graphics_queue(),
                cmd,
                Some((wait, wait_stage)),
                Some(signal),
                fence,
            )
        }
    }

    fn execute_one_shot(&self, record: &mut dyn FnMut(vk::CommandBuffer)) -> Result<()> {
        // SAFETY: the pool and queue belong to this device
        unsafe {
            command::execute_single_time_commands(
                self.device(),
                &self.command_pool,
                self.context.graphics_queue(),
                record,
            )
        }
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.context
            .allocator()
            .lock()
            .create_buffer(size, usage, location, name)
    }

    fn write_buffer(&self, buffer: &GpuBuffer, data: &[u8]) -> Result<()> {
        buffer.write_bytes(data)
    }

    fn read_buffer(&self, buffer: &GpuBuffer, len: u64) -> Result<Vec<u8>> {
        buffer.read_bytes(len)
    }

    fn destroy_buffer(&self, mut buffer: GpuBuffer) {
        if let Err(e) = self.context.allocator().lock().free_buffer(&mut buffer) {
            tracing::warn!("Failed to free buffer: {e}");
        }
    }
}
