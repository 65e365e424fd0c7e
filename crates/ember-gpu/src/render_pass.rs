//! Classic render pass and framebuffer creation.
//!
//! Attachment order is fixed: color, then depth (if any), then the
//! single-sample resolve target (if multisampled). Framebuffers and clear
//! values follow the same order.

use crate::error::Result;
use ash::vk;

/// Describes the attachments of the single-subpass forward pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub color_format: vk::Format,
    pub depth_format: Option<vk::Format>,
    pub samples: vk::SampleCountFlags,
}

impl RenderPassDesc {
    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    pub fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }

    pub fn attachment_count(&self) -> usize {
        1 + usize::from(self.has_depth()) + usize::from(self.is_multisampled())
    }

    /// Attachment descriptions in framebuffer order.
    pub fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        let msaa = self.is_multisampled();
        let mut attachments = Vec::with_capacity(self.attachment_count());

        attachments.push(
            vk::AttachmentDescription::default()
                .format(self.color_format)
                .samples(self.samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(if msaa {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::PRESENT_SRC_KHR
                }),
        );

        if let Some(depth_format) = self.depth_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(depth_format)
                    .samples(self.samples)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }

        if msaa {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(self.color_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            );
        }

        attachments
    }

    /// Dependency ordering the first attachment write after the acquire
    /// semaphore wait.
    pub fn external_dependency(&self) -> vk::SubpassDependency {
        let mut stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
        let mut access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        if self.has_depth() {
            stages |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
            access |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }

        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(access)
    }

    /// Clear values in attachment order: black color, depth 1.0.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let color = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 1.0],
            },
        };
        let mut values = vec![color];
        if self.has_depth() {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        if self.is_multisampled() {
            values.push(color);
        }
        values
    }

    /// Order the views of one framebuffer to match the attachments.
    ///
    /// `msaa_color` must be `Some` exactly when the pass is multisampled.
    pub fn framebuffer_views(
        &self,
        swapchain_view: vk::ImageView,
        msaa_color: Option<vk::ImageView>,
        depth: Option<vk::ImageView>,
    ) -> Vec<vk::ImageView> {
        let mut views = Vec::with_capacity(self.attachment_count());
        match msaa_color {
            Some(color) if self.is_multisampled() => {
                views.push(color);
                views.extend(depth.filter(|_| self.has_depth()));
                views.push(swapchain_view);
            }
            _ => {
                views.push(swapchain_view);
                views.extend(depth.filter(|_| self.has_depth()));
            }
        }
        views
    }
}

/// Create the render pass described by `desc`.
///
/// # Safety
/// The device must be valid.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn create_render_pass(
    device: &ash::Device,
    desc: &RenderPassDesc,
) -> Result<vk::RenderPass> {
    let attachments = desc.attachment_descriptions();

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
    let depth_ref = vk::AttachmentReference::default()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let resolve_refs = [vk::AttachmentReference::default()
        .attachment(attachments.len() as u32 - 1)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if desc.has_depth() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    if desc.is_multisampled() {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }

    let subpasses = [subpass];
    let dependencies = [desc.external_dependency()];
    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    Ok(device.create_render_pass(&create_info, None)?)
}

/// Create a framebuffer over `views`.
///
/// # Safety
/// The device, render pass and views must be valid and compatible.
pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(views)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    Ok(device.create_framebuffer(&create_info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn desc(depth: bool, samples: vk::SampleCountFlags) -> RenderPassDesc {
        RenderPassDesc {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: depth.then_some(vk::Format::D32_SFLOAT),
            samples,
        }
    }

    #[test]
    fn single_sample_color_presents_directly() {
        let attachments = desc(false, vk::SampleCountFlags::TYPE_1).attachment_descriptions();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn multisampled_pass_resolves_into_presentable_attachment() {
        let d = desc(true, vk::SampleCountFlags::TYPE_4);
        let attachments = d.attachment_descriptions();
        assert_eq!(attachments.len(), 3);

        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            attachments[0].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].store_op, vk::AttachmentStoreOp::DONT_CARE);

        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn dependency_waits_on_color_output() {
        let dep = desc(false, vk::SampleCountFlags::TYPE_1).external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(dep
            .src_stage_mask
            .contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(dep
            .dst_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn clear_values_match_attachments() {
        for d in [
            desc(false, vk::SampleCountFlags::TYPE_1),
            desc(true, vk::SampleCountFlags::TYPE_1),
            desc(true, vk::SampleCountFlags::TYPE_8),
        ] {
            assert_eq!(d.clear_values().len(), d.attachment_count());
        }
    }

    #[test]
    fn framebuffer_views_follow_attachment_order() {
        let swap = vk::ImageView::from_raw(1);
        let color = vk::ImageView::from_raw(2);
        let depth = vk::ImageView::from_raw(3);

        let d = desc(true, vk::SampleCountFlags::TYPE_4);
        assert_eq!(
            d.framebuffer_views(swap, Some(color), Some(depth)),
            vec![color, depth, swap]
        );

        let d = desc(true, vk::SampleCountFlags::TYPE_1);
        assert_eq!(d.framebuffer_views(swap, None, Some(depth)), vec![swap, depth]);
    }
}
