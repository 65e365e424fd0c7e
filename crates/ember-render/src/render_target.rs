//! Render pass and the per-image framebuffers bound to it.

use ash::vk;
use ember_gpu::RenderPassDesc;
use tracing::debug;

use crate::device::{AttachmentImageDesc, RenderDevice};
use crate::error::Result;
use crate::swapchain::SwapchainManager;

/// Depth and multisampling choices for a target set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetOptions {
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

impl Default for TargetOptions {
    fn default() -> Self {
        Self {
            depth_format: None,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

struct Attachment<I> {
    image: I,
    view: vk::ImageView,
}

/// The forward render pass, its depth and multisample images, and one
/// framebuffer per swapchain image. Rebuilt with the swapchain.
pub struct RenderTargets<D: RenderDevice> {
    desc: RenderPassDesc,
    render_pass: vk::RenderPass,
    color: Option<Attachment<D::Image>>,
    depth: Option<Attachment<D::Image>>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl<D: RenderDevice> RenderTargets<D> {
    /// Build the render pass and framebuffers for `swapchain`.
    pub fn create(
        device: &D,
        swapchain: &SwapchainManager,
        options: TargetOptions,
    ) -> Result<Self> {
        let mut targets = Self {
            desc: RenderPassDesc {
                color_format: swapchain.format().format,
                depth_format: options.depth_format,
                samples: options.samples,
            },
            render_pass: vk::RenderPass::null(),
            color: None,
            depth: None,
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            extent: swapchain.extent(),
        };

        if let Err(e) = targets.populate(device, swapchain) {
            targets.destroy(device);
            return Err(e);
        }

        debug!(
            framebuffers = targets.framebuffers.len(),
            width = targets.extent.width,
            height = targets.extent.height,
            samples = ?targets.desc.samples,
            depth = ?targets.desc.depth_format,
            "Render targets created"
        );
        Ok(targets)
    }

    fn populate(&mut self, device: &D, swapchain: &SwapchainManager) -> Result<()> {
        self.render_pass = device.create_render_pass(&self.desc)?;

        if self.desc.is_multisampled() {
            self.color = Some(Self::create_attachment(
                device,
                AttachmentImageDesc {
                    extent: self.extent,
                    format: self.desc.color_format,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
                    samples: self.desc.samples,
                },
                vk::ImageAspectFlags::COLOR,
                "msaa color",
            )?);
        }

        if let Some(depth_format) = self.desc.depth_format {
            self.depth = Some(Self::create_attachment(
                device,
                AttachmentImageDesc {
                    extent: self.extent,
                    format: depth_format,
                    usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                    samples: self.desc.samples,
                },
                vk::ImageAspectFlags::DEPTH,
                "depth",
            )?);
        }

        let color_view = self.color.as_ref().map(|a| a.view);
        let depth_view = self.depth.as_ref().map(|a| a.view);
        for &swapchain_view in swapchain.image_views() {
            let views = self
                .desc
                .framebuffer_views(swapchain_view, color_view, depth_view);
            let framebuffer = device.create_framebuffer(self.render_pass, &views, self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_attachment(
        device: &D,
        desc: AttachmentImageDesc,
        aspect: vk::ImageAspectFlags,
        name: &str,
    ) -> Result<Attachment<D::Image>> {
        let image = device.create_image(&desc, name)?;
        match device.create_image_view(D::image_handle(&image), desc.format, aspect) {
            Ok(view) => Ok(Attachment { image, view }),
            Err(e) => {
                device.destroy_image(image);
                Err(e.into())
            }
        }
    }

    /// Destroy framebuffers, attachment images and the render pass. The
    /// device must be idle.
    pub fn destroy(&mut self, device: &D) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        for attachment in [self.color.take(), self.depth.take()].into_iter().flatten() {
            device.destroy_image_view(attachment.view);
            device.destroy_image(attachment.image);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Framebuffer bound to swapchain image `image_index`.
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        self.desc.clear_values()
    }
}
