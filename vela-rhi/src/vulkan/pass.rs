//! Render passes and framebuffers.
//!
//! A pass is a single subpass with 0..N color attachments, an optional
//! depth-stencil attachment and optional matching resolve attachments.
//! Framebuffer attachment order follows the pass: colors, depth-stencil,
//! resolves.

use ash::vk;

use super::{cast, vk_check, VulkanDevice};
use crate::backend::{FramebufferDesc, PassData};
use crate::SampleCount;

impl VulkanDevice {
    pub(super) fn create_pass_impl(&mut self, slot: u32, pass: &PassData) -> Result<(), String> {
        let samples = pass.samples.unwrap_or(SampleCount::X1);
        let mut attachments: Vec<vk::AttachmentDescription> = Vec::new();
        let mut color_refs: Vec<vk::AttachmentReference> = Vec::new();
        let mut resolve_refs: Vec<vk::AttachmentReference> = Vec::new();
        let mut depth_ref = vk::AttachmentReference::default();

        for attachment in &pass.color_attachments {
            color_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: cast::image_layout(attachment.pass_layout),
            });
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(cast::format(attachment.color_format))
                    .samples(cast::sample_count(samples))
                    .load_op(cast::load_op(attachment.color_load_op))
                    .store_op(cast::store_op(attachment.color_store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(cast::image_layout(attachment.initial_layout))
                    .final_layout(cast::image_layout(attachment.pass_layout)),
            );
        }

        if let Some(attachment) = &pass.depth_stencil_attachment {
            depth_ref = vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: cast::image_layout(attachment.pass_layout),
            };
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(cast::format(attachment.depth_stencil_format))
                    .samples(cast::sample_count(samples))
                    .load_op(cast::load_op(attachment.depth_load_op))
                    .store_op(cast::store_op(attachment.depth_store_op))
                    .stencil_load_op(cast::load_op(attachment.stencil_load_op))
                    .stencil_store_op(cast::store_op(attachment.stencil_store_op))
                    .initial_layout(cast::image_layout(attachment.initial_layout))
                    .final_layout(cast::image_layout(attachment.pass_layout)),
            );
        }

        for (i, resolve) in pass.color_resolve_attachments.iter().enumerate() {
            resolve_refs.push(vk::AttachmentReference {
                attachment: attachments.len() as u32,
                layout: cast::image_layout(resolve.pass_layout),
            });
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(cast::format(pass.color_attachments[i].color_format))
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(cast::load_op(resolve.load_op))
                    .store_op(cast::store_op(resolve.store_op))
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(cast::image_layout(resolve.initial_layout))
                    .final_layout(cast::image_layout(resolve.pass_layout)),
            );
        }

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if pass.depth_stencil_attachment.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        if !resolve_refs.is_empty() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let mut dependencies: Vec<vk::SubpassDependency> = Vec::new();
        if let Some(dep) = &pass.dependency {
            dependencies.push(
                vk::SubpassDependency::default()
                    .src_subpass(vk::SUBPASS_EXTERNAL)
                    .dst_subpass(0)
                    .src_stage_mask(cast::pipeline_stages(dep.src_stage_mask))
                    .dst_stage_mask(cast::pipeline_stages(dep.dst_stage_mask))
                    .src_access_mask(cast::access(dep.src_access_mask))
                    .dst_access_mask(cast::access(dep.dst_access_mask)),
            );
        }

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(&dependencies);
        let handle = vk_check("vkCreateRenderPass", unsafe {
            self.device.create_render_pass(&create_info, None)
        })?;

        self.passes.set(slot, handle);
        Ok(())
    }

    pub(super) fn create_framebuffer_impl(
        &mut self,
        slot: u32,
        desc: &FramebufferDesc,
    ) -> Result<(), String> {
        let mut views: Vec<vk::ImageView> = Vec::with_capacity(
            desc.color_slots.len() + desc.resolve_slots.len() + 1,
        );
        for &image_slot in &desc.color_slots {
            views.push(self.images.get(image_slot).view);
        }
        if let Some(image_slot) = desc.depth_stencil_slot {
            views.push(self.images.get(image_slot).view);
        }
        for &image_slot in &desc.resolve_slots {
            views.push(self.images.get(image_slot).view);
        }

        let render_pass = *self.passes.get(desc.pass_slot);
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(desc.width)
            .height(desc.height)
            .layers(1);
        let handle = vk_check("vkCreateFramebuffer", unsafe {
            self.device.create_framebuffer(&create_info, None)
        })?;

        self.framebuffers.set(slot, handle);
        Ok(())
    }
}
