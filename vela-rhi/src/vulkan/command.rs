//! Command recording and queue submission. Every recording call forwards
//! straight to its native counterpart.

use ash::vk;

use super::{cast, vk_check, VulkanDevice};
use crate::backend::{BeginPassData, SubmitData};
use crate::{
    Access, AttachmentLoadOp, BufferCopy, BufferImageCopy, Filter, ImageBlit, ImageLayout,
    PipelineStages, QueueFamily,
};

impl VulkanDevice {
    pub(super) fn begin_list_impl(&mut self, list: u32, one_time_submit: bool) -> Result<(), String> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        vk_check("vkBeginCommandBuffer", unsafe {
            self.device.begin_command_buffer(self.list(list), &info)
        })
    }

    pub(super) fn cmd_begin_pass_impl(&mut self, list: u32, data: &BeginPassData) {
        let render_pass = *self.passes.get(data.pass_slot);
        let framebuffer = *self.framebuffers.get(data.framebuffer_slot);

        let mut clear_values: Vec<vk::ClearValue> = data
            .color_load_ops
            .iter()
            .zip(&data.clear_colors)
            .map(|(&load_op, &clear)| {
                if load_op == AttachmentLoadOp::Clear {
                    vk::ClearValue {
                        color: cast::clear_color(clear),
                    }
                } else {
                    vk::ClearValue::default()
                }
            })
            .collect();
        if data.depth_load_op.is_some() {
            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: data.clear_depth_stencil.depth,
                    stencil: data.clear_depth_stencil.stencil,
                },
            });
        }

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: data.width,
                height: data.height,
            },
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        let handle = self.list(list);
        unsafe {
            self.device
                .cmd_begin_render_pass(handle, &begin_info, vk::SubpassContents::INLINE);

            // Draws apply to the full framebuffer extent unless the caller
            // overrides viewport or scissor for the rest of the pass.
            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: data.width as f32,
                height: data.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            let scissor = render_area;
            self.device.cmd_set_viewport(handle, 0, &[viewport]);
            self.device.cmd_set_scissor(handle, 0, &[scissor]);
        }
    }

    pub(super) fn cmd_bind_graphics_pipeline_impl(
        &mut self,
        list: u32,
        pipeline_slot: u32,
        variant_hash: u64,
        depth_test_enable: bool,
    ) {
        let pipeline = self.pipelines.get(pipeline_slot);
        let handle = *pipeline
            .handles
            .get(&variant_hash)
            .expect("pipeline variant missing at bind");

        let list = self.list(list);
        unsafe {
            self.device
                .cmd_bind_pipeline(list, vk::PipelineBindPoint::GRAPHICS, handle);
            // Depth-test enable is command buffer state, not pipeline state.
            self.device.cmd_set_depth_test_enable(list, depth_test_enable);
        }
    }

    pub(super) fn cmd_bind_compute_pipeline_impl(&mut self, list: u32, pipeline_slot: u32) {
        let pipeline = self.pipelines.get(pipeline_slot);
        let handle = *pipeline
            .handles
            .get(&0)
            .expect("compute pipeline has no native handle");
        unsafe {
            self.device
                .cmd_bind_pipeline(self.list(list), vk::PipelineBindPoint::COMPUTE, handle);
        }
    }

    pub(super) fn cmd_bind_sets_impl(
        &mut self,
        list: u32,
        bind_point: vk::PipelineBindPoint,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    ) {
        let layout = *self.pipeline_layouts.get(layout_slot);
        let sets: Vec<vk::DescriptorSet> = set_slots
            .iter()
            .map(|&slot| *self.sets.get(slot))
            .collect();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.list(list),
                bind_point,
                layout,
                first_set,
                &sets,
                &[],
            );
        }
    }

    pub(super) fn cmd_bind_vertex_buffers_impl(
        &mut self,
        list: u32,
        first_binding: u32,
        buffer_slots: &[u32],
    ) {
        let buffers: Vec<vk::Buffer> = buffer_slots
            .iter()
            .map(|&slot| self.buffers.get(slot).handle)
            .collect();
        let offsets = vec![0u64; buffers.len()];
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.list(list), first_binding, &buffers, &offsets);
        }
    }

    pub(super) fn cmd_buffer_memory_barrier_impl(
        &mut self,
        list: u32,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        buffer_slot: u32,
        src_access: Access,
        dst_access: Access,
    ) {
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(cast::access(src_access))
            .dst_access_mask(cast::access(dst_access))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(self.buffers.get(buffer_slot).handle)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.list(list),
                cast::pipeline_stages(src_stages),
                cast::pipeline_stages(dst_stages),
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn cmd_image_memory_barrier_impl(
        &mut self,
        list: u32,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        image_slot: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_access: Access,
        dst_access: Access,
    ) {
        let image = self.images.get(image_slot);
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(image.aspect)
            .base_mip_level(0)
            .level_count(vk::REMAINING_MIP_LEVELS)
            .base_array_layer(0)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);
        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(cast::access(src_access))
            .dst_access_mask(cast::access(dst_access))
            .old_layout(cast::image_layout(old_layout))
            .new_layout(cast::image_layout(new_layout))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle)
            .subresource_range(range);
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.list(list),
                cast::pipeline_stages(src_stages),
                cast::pipeline_stages(dst_stages),
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    pub(super) fn cmd_copy_buffer_impl(
        &mut self,
        list: u32,
        src_slot: u32,
        dst_slot: u32,
        regions: &[BufferCopy],
    ) {
        let src = self.buffers.get(src_slot).handle;
        let dst = self.buffers.get(dst_slot).handle;
        let copies: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| {
                vk::BufferCopy::default()
                    .src_offset(region.src_offset)
                    .dst_offset(region.dst_offset)
                    .size(region.size)
            })
            .collect();
        unsafe {
            self.device
                .cmd_copy_buffer(self.list(list), src, dst, &copies);
        }
    }

    pub(super) fn cmd_copy_buffer_to_image_impl(
        &mut self,
        list: u32,
        src_slot: u32,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        let src = self.buffers.get(src_slot).handle;
        let image = self.images.get(dst_slot);
        let copies = Self::buffer_image_copies(regions, image.aspect);
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                self.list(list),
                src,
                image.handle,
                cast::image_layout(dst_layout),
                &copies,
            );
        }
    }

    pub(super) fn cmd_copy_image_to_buffer_impl(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        regions: &[BufferImageCopy],
    ) {
        let image = self.images.get(src_slot);
        let dst = self.buffers.get(dst_slot).handle;
        let copies = Self::buffer_image_copies(regions, image.aspect);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                self.list(list),
                image.handle,
                cast::image_layout(src_layout),
                dst,
                &copies,
            );
        }
    }

    fn buffer_image_copies(
        regions: &[BufferImageCopy],
        aspect: vk::ImageAspectFlags,
    ) -> Vec<vk::BufferImageCopy> {
        regions
            .iter()
            .map(|region| {
                vk::BufferImageCopy::default()
                    .buffer_offset(region.buffer_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(aspect)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(region.image_layers),
                    )
                    .image_extent(vk::Extent3D {
                        width: region.image_width,
                        height: region.image_height,
                        depth: region.image_depth,
                    })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn cmd_blit_image_impl(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        let src = self.images.get(src_slot);
        let dst = self.images.get(dst_slot);

        let blits: Vec<vk::ImageBlit> = regions
            .iter()
            .map(|region| {
                let offset = |v: [i32; 3]| vk::Offset3D {
                    x: v[0],
                    y: v[1],
                    z: v[2],
                };
                vk::ImageBlit::default()
                    .src_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(src.aspect)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .src_offsets([offset(region.src_min_offset), offset(region.src_max_offset)])
                    .dst_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(dst.aspect)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .dst_offsets([offset(region.dst_min_offset), offset(region.dst_max_offset)])
            })
            .collect();

        unsafe {
            self.device.cmd_blit_image(
                self.list(list),
                src.handle,
                cast::image_layout(src_layout),
                dst.handle,
                cast::image_layout(dst_layout),
                &blits,
                cast::filter(filter),
            );
        }
    }

    pub(super) fn queue_submit_impl(
        &mut self,
        family: QueueFamily,
        submit: &SubmitData,
    ) -> Result<(), String> {
        let waits: Vec<vk::Semaphore> = submit
            .wait_slots
            .iter()
            .map(|&slot| *self.semaphores.get(slot))
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submit
            .wait_stages
            .iter()
            .map(|&stages| cast::pipeline_stages(stages))
            .collect();
        let signals: Vec<vk::Semaphore> = submit
            .signal_slots
            .iter()
            .map(|&slot| *self.semaphores.get(slot))
            .collect();
        let lists: Vec<vk::CommandBuffer> = submit
            .list_slots
            .iter()
            .map(|&slot| self.command_lists.get(slot).handle)
            .collect();
        let fence = submit
            .fence_slot
            .map(|slot| *self.fences.get(slot))
            .unwrap_or(vk::Fence::null());

        let info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&lists)
            .signal_semaphores(&signals);

        let queue = self.queue(family).handle;
        vk_check("vkQueueSubmit", unsafe {
            self.device.queue_submit(queue, &[info], fence)
        })
    }
}
