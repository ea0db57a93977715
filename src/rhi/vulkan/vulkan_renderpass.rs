#![allow(unsafe_code)]

//! Render passes and framebuffers.
//!
//! A render pass is derived from an attachment layout and shared by every
//! framebuffer with the same layout; the device keeps that cache. A
//! framebuffer may also be built against an externally supplied render
//! pass (the swapchain presentation path).

use std::any::Any;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use crate::core::diagnostics::FatalKind;
use crate::render_fatal;
use crate::rhi::rhi_enums::ResourceCreationError;
use crate::rhi::rhi_structs::{FramebufferDescription, RenderPassLayout};
use crate::rhi::rhi_traits::Framebuffer;
use crate::rhi::vulkan::vulkan_device::RawDevice;
use crate::rhi::vulkan::vulkan_utils::to_vk_attachment_description;

/// Builds the `VkRenderPass` for one attachment layout.
pub fn create_render_pass(raw: &Arc<RawDevice>, layout: &RenderPassLayout) -> vk::RenderPass {
    let attachments: Vec<vk::AttachmentDescription> = layout
        .attachments
        .iter()
        .map(to_vk_attachment_description)
        .collect();

    let mut color_references = Vec::new();
    let mut depth_reference = None;

    for (index, attachment) in layout.attachments.iter().enumerate() {
        let reference = vk::AttachmentReference {
            attachment: index as u32,
            layout: if attachment.is_depth {
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            },
        };

        if attachment.is_depth {
            depth_reference = Some(reference);
        } else {
            color_references.push(reference);
        }
    }

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_references);
    if let Some(depth) = &depth_reference {
        subpass = subpass.depth_stencil_attachment(depth);
    }
    let subpasses = [subpass.build()];

    // Serialize against the previous frame's attachment output, and the
    // fragment tests when a depth attachment is present.
    let mut dependencies = vec![vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }];

    if depth_reference.is_some() {
        dependencies.push(vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_stage_mask: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        });
    }

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    match unsafe { raw.device.create_render_pass(&create_info, None) } {
        Ok(render_pass) => render_pass,
        Err(error) => render_fatal!(FatalKind::DriverError, "render pass creation failed: {:?}", error),
    }
}

pub struct VulkanFramebuffer {
    raw: Arc<RawDevice>,
    description: FramebufferDescription,
    render_pass: vk::RenderPass,
    handle: vk::Framebuffer,
}

impl VulkanFramebuffer {
    /// Builds a framebuffer against a render pass the device cache (or an
    /// external owner, e.g. the swapchain) supplied.
    pub fn new(
        raw: Arc<RawDevice>,
        description: FramebufferDescription,
        render_pass: vk::RenderPass,
    ) -> Result<VulkanFramebuffer, ResourceCreationError> {
        let mut attachments: Vec<vk::ImageView> = description
            .color_attachments
            .iter()
            .map(|attachment| vk::ImageView::from_raw(attachment.view.raw))
            .collect();

        if let Some(depth) = &description.depth_stencil_attachment {
            attachments.push(vk::ImageView::from_raw(depth.view.raw));
        }

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(description.width)
            .height(description.height)
            .layers(1);

        let handle = unsafe { raw.device.create_framebuffer(&create_info, None) }.map_err(|error| match error {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => ResourceCreationError::OutOfHostMemory,
            _ => ResourceCreationError::OutOfDeviceMemory,
        })?;

        Ok(VulkanFramebuffer {
            raw,
            description,
            render_pass,
            handle,
        })
    }

    pub fn vk_handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn vk_render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Framebuffer for VulkanFramebuffer {
    fn description(&self) -> &FramebufferDescription {
        &self.description
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        // The render pass belongs to the device cache.
        unsafe { self.raw.device.destroy_framebuffer(self.handle, None) };
    }
}
