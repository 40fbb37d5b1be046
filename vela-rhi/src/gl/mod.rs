//! OpenGL 4.6 backend. Recording captures commands for deferred replay at
//! submit time; the embedder supplies the context loader and guarantees the
//! context is current on the calling thread.

mod cast;
mod command;
mod pipeline;
mod resource;

use std::ffi::c_void;

use glow::HasContext;

use crate::backend::{
    AcquireOutcome, BeginPassData, ComputePipelineDesc, FramebufferDesc, GpuBackend,
    GraphicsPipelineDesc, PassData, PresentOutcome, SetBufferWrite, SetImageWrite, SlotStore,
    SubmitData, SwapchainDesc, VariantDesc,
};
use crate::{
    Access, BufferCopy, BufferImageCopy, BufferInfo, ColorComponents, CommandPoolInfo,
    DeviceBackend, DrawIndexedInfo, DrawInfo, Filter, Format, ImageBlit, ImageInfo, ImageLayout,
    IndexType, QueueFamily, Rect, SampleCount, SetBindingInfo, ShaderType,
};

use command::Command;
use pipeline::{GlPipeline, GlPipelineLayout, GlSet, GlSetPool, GlShader};
use resource::{GlBuffer, GlImage};

pub(super) struct GlFramebuffer {
    pub handle: glow::Framebuffer,
}

pub(super) struct GlCommandList {
    pub captures: Vec<Command>,
    pub recording: bool,
}

pub(crate) struct OpenGlDevice {
    gl: glow::Context,
    max_samples: i32,

    buffers: SlotStore<GlBuffer>,
    images: SlotStore<GlImage>,
    shaders: SlotStore<GlShader>,
    passes: SlotStore<()>,
    framebuffers: SlotStore<GlFramebuffer>,
    set_layouts: SlotStore<Vec<SetBindingInfo>>,
    sets: SlotStore<GlSet>,
    set_pools: SlotStore<GlSetPool>,
    pipeline_layouts: SlotStore<GlPipelineLayout>,
    pipelines: SlotStore<GlPipeline>,
    command_pools: SlotStore<CommandPoolInfo>,
    command_lists: SlotStore<GlCommandList>,
    semaphores: SlotStore<()>,
    fences: SlotStore<bool>,
}

impl OpenGlDevice {
    pub fn new(loader: &mut dyn FnMut(&str) -> *const c_void) -> Result<Self, String> {
        let gl = unsafe { glow::Context::from_loader_function(|symbol| loader(symbol)) };

        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        let max_samples = unsafe { gl.get_parameter_i32(glow::MAX_SAMPLES) };
        log::info!(target: "rhi::gl", "OpenGL context: {version}, max samples {max_samples}");

        Ok(Self {
            gl,
            max_samples,
            buffers: SlotStore::new(),
            images: SlotStore::new(),
            shaders: SlotStore::new(),
            passes: SlotStore::new(),
            framebuffers: SlotStore::new(),
            set_layouts: SlotStore::new(),
            sets: SlotStore::new(),
            set_pools: SlotStore::new(),
            pipeline_layouts: SlotStore::new(),
            pipelines: SlotStore::new(),
            command_pools: SlotStore::new(),
            command_lists: SlotStore::new(),
            semaphores: SlotStore::new(),
            fences: SlotStore::new(),
        })
    }
}

impl GpuBackend for OpenGlDevice {
    fn backend(&self) -> DeviceBackend {
        DeviceBackend::OpenGl
    }

    fn create_semaphore(&mut self, slot: u32) -> Result<(), String> {
        // Replay is synchronous; semaphores are inert.
        self.semaphores.set(slot, ());
        Ok(())
    }

    fn destroy_semaphore(&mut self, slot: u32) {
        self.semaphores.take(slot);
    }

    fn create_fence(&mut self, slot: u32, signaled: bool) -> Result<(), String> {
        self.fences.set(slot, signaled);
        Ok(())
    }

    fn destroy_fence(&mut self, slot: u32) {
        self.fences.take(slot);
    }

    fn wait_fence(&mut self, slot: u32) -> Result<(), String> {
        unsafe { self.gl.finish() };
        self.fences.set(slot, true);
        Ok(())
    }

    fn reset_fence(&mut self, slot: u32) -> Result<(), String> {
        self.fences.set(slot, false);
        Ok(())
    }

    fn create_buffer(&mut self, slot: u32, info: &BufferInfo) -> Result<(), String> {
        self.create_buffer_impl(slot, info)
    }

    fn destroy_buffer(&mut self, slot: u32) {
        self.destroy_buffer_impl(slot);
    }

    fn map_buffer(&mut self, slot: u32) -> Result<(), String> {
        self.map_buffer_impl(slot)
    }

    fn map_read(&self, slot: u32, offset: u64, size: u64) -> &[u8] {
        self.map_read_impl(slot, offset, size)
    }

    fn map_write(&mut self, slot: u32, offset: u64, data: &[u8]) {
        self.map_write_impl(slot, offset, data);
    }

    fn unmap_buffer(&mut self, slot: u32) {
        self.unmap_buffer_impl(slot);
    }

    fn create_image(&mut self, slot: u32, info: &ImageInfo) -> Result<(), String> {
        self.create_image_impl(slot, info)
    }

    fn destroy_image(&mut self, slot: u32) {
        self.destroy_image_impl(slot);
    }

    fn create_shader(
        &mut self,
        slot: u32,
        shader_type: ShaderType,
        spirv: &[u32],
    ) -> Result<(), String> {
        // Decompilation happens at pipeline creation, once the layout's
        // binding remap is known.
        self.shaders.set(
            slot,
            GlShader {
                shader_type,
                spirv: spirv.to_vec(),
            },
        );
        Ok(())
    }

    fn destroy_shader(&mut self, slot: u32) {
        self.shaders.take(slot);
    }

    fn create_pass(&mut self, slot: u32, _pass: &PassData) -> Result<(), String> {
        // Passes have no native object; framebuffers carry everything.
        self.passes.set(slot, ());
        Ok(())
    }

    fn destroy_pass(&mut self, slot: u32) {
        self.passes.take(slot);
    }

    fn create_framebuffer(&mut self, slot: u32, desc: &FramebufferDesc) -> Result<(), String> {
        if !desc.resolve_slots.is_empty() {
            log::warn!(target: "rhi::gl", "multisample resolve attachments are ignored on OpenGL");
        }

        let handle = unsafe {
            let handle = self.gl.create_framebuffer()?;
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(handle));

            let mut draw_buffers = Vec::with_capacity(desc.color_slots.len());
            for (i, &image_slot) in desc.color_slots.iter().enumerate() {
                let image = self.images.get(image_slot);
                let attachment = glow::COLOR_ATTACHMENT0 + i as u32;
                self.gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    attachment,
                    image.target,
                    Some(image.handle),
                    0,
                );
                draw_buffers.push(attachment);
            }
            if let Some(image_slot) = desc.depth_stencil_slot {
                let image = self.images.get(image_slot);
                self.gl.framebuffer_texture_2d(
                    glow::FRAMEBUFFER,
                    glow::DEPTH_STENCIL_ATTACHMENT,
                    image.target,
                    Some(image.handle),
                    0,
                );
            }
            self.gl.draw_buffers(&draw_buffers);

            let status = self.gl.check_framebuffer_status(glow::FRAMEBUFFER);
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                self.gl.delete_framebuffer(handle);
                log::error!(target: "rhi::gl", "framebuffer incomplete: {status:#x}");
                return Err(format!("framebuffer incomplete: {status:#x}"));
            }
            handle
        };

        self.framebuffers.set(slot, GlFramebuffer { handle });
        Ok(())
    }

    fn destroy_framebuffer(&mut self, slot: u32) {
        if let Some(framebuffer) = self.framebuffers.take(slot) {
            unsafe { self.gl.delete_framebuffer(framebuffer.handle) };
        }
    }

    fn create_set_layout(&mut self, slot: u32, bindings: &[SetBindingInfo]) -> Result<(), String> {
        self.set_layouts.set(slot, bindings.to_vec());
        Ok(())
    }

    fn destroy_set_layout(&mut self, slot: u32) {
        self.set_layouts.take(slot);
    }

    fn create_set_pool(
        &mut self,
        slot: u32,
        layout_slot: u32,
        _bindings: &[SetBindingInfo],
        _max_sets: u32,
    ) -> Result<(), String> {
        self.set_pools.set(slot, GlSetPool { layout_slot });
        Ok(())
    }

    fn destroy_set_pool(&mut self, slot: u32) {
        self.set_pools.take(slot);
    }

    fn allocate_set(&mut self, pool_slot: u32, set_slot: u32) -> Result<(), String> {
        self.allocate_set_impl(pool_slot, set_slot);
        Ok(())
    }

    fn reset_set_pool(&mut self, _pool_slot: u32) -> Result<(), String> {
        Ok(())
    }

    fn update_set_images(&mut self, writes: &[SetImageWrite]) {
        self.update_set_images_impl(writes);
    }

    fn update_set_buffers(&mut self, writes: &[SetBufferWrite]) {
        self.update_set_buffers_impl(writes);
    }

    fn create_pipeline_layout(
        &mut self,
        slot: u32,
        _set_layout_slots: &[u32],
        set_layout_bindings: &[&[SetBindingInfo]],
    ) -> Result<(), String> {
        self.create_pipeline_layout_impl(slot, set_layout_bindings);
        Ok(())
    }

    fn destroy_pipeline_layout(&mut self, slot: u32) {
        self.pipeline_layouts.take(slot);
    }

    fn create_pipeline(&mut self, slot: u32, desc: &GraphicsPipelineDesc) -> Result<(), String> {
        self.create_pipeline_impl(slot, desc)
    }

    fn create_compute_pipeline(
        &mut self,
        slot: u32,
        desc: &ComputePipelineDesc,
    ) -> Result<(), String> {
        self.create_compute_pipeline_impl(slot, desc)
    }

    fn destroy_pipeline(&mut self, slot: u32) {
        self.destroy_pipeline_impl(slot);
    }

    fn create_pipeline_variant(
        &mut self,
        _pipeline_slot: u32,
        _desc: &VariantDesc,
    ) -> Result<(), String> {
        // Programs are pass-independent; there is nothing to build.
        Ok(())
    }

    fn pipeline_variant_count(&self, _pipeline_slot: u32) -> usize {
        1
    }

    fn create_command_pool(&mut self, slot: u32, info: &CommandPoolInfo) -> Result<(), String> {
        self.command_pools.set(slot, *info);
        Ok(())
    }

    fn destroy_command_pool(&mut self, slot: u32, list_slots: &[u32]) {
        for &list_slot in list_slots {
            self.command_lists.take(list_slot);
        }
        self.command_pools.take(slot);
    }

    fn allocate_command_list(&mut self, _pool_slot: u32, list_slot: u32) -> Result<(), String> {
        self.command_lists.set(
            list_slot,
            GlCommandList {
                captures: Vec::new(),
                recording: false,
            },
        );
        Ok(())
    }

    fn reset_command_pool(&mut self, _pool_slot: u32, list_slots: &[u32]) -> Result<(), String> {
        for &list_slot in list_slots {
            let list = self.command_lists.get_mut(list_slot);
            list.captures.clear();
            list.recording = false;
        }
        Ok(())
    }

    fn begin_list(&mut self, list: u32, _one_time_submit: bool) -> Result<(), String> {
        let list = self.command_lists.get_mut(list);
        list.captures.clear();
        list.recording = true;
        Ok(())
    }

    fn end_list(&mut self, list: u32) -> Result<(), String> {
        self.command_lists.get_mut(list).recording = false;
        Ok(())
    }

    fn reset_list(&mut self, list: u32) -> Result<(), String> {
        let list = self.command_lists.get_mut(list);
        list.captures.clear();
        list.recording = false;
        Ok(())
    }

    fn cmd_begin_pass(&mut self, list: u32, data: BeginPassData) {
        self.push_command(list, Command::BeginPass(data));
    }

    fn cmd_end_pass(&mut self, list: u32) {
        self.push_command(list, Command::EndPass);
    }

    fn cmd_push_constant(&mut self, list: u32, _layout_slot: u32, offset: u32, data: &[u8]) {
        self.push_command(
            list,
            Command::PushConstant {
                offset,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_bind_graphics_pipeline(
        &mut self,
        list: u32,
        pipeline_slot: u32,
        _variant_hash: u64,
        _depth_test_enable: bool,
        color_write_masks: &[ColorComponents],
    ) {
        self.push_command(
            list,
            Command::BindGraphicsPipeline {
                pipeline: pipeline_slot,
                color_write_masks: color_write_masks.to_vec(),
            },
        );
    }

    fn cmd_bind_compute_pipeline(&mut self, list: u32, pipeline_slot: u32) {
        self.push_command(
            list,
            Command::BindComputePipeline {
                pipeline: pipeline_slot,
            },
        );
    }

    fn cmd_bind_graphics_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    ) {
        self.push_command(
            list,
            Command::BindGraphicsSets {
                layout: layout_slot,
                first_set,
                sets: set_slots.to_vec(),
            },
        );
    }

    fn cmd_bind_compute_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    ) {
        self.push_command(
            list,
            Command::BindComputeSets {
                layout: layout_slot,
                first_set,
                sets: set_slots.to_vec(),
            },
        );
    }

    fn cmd_bind_vertex_buffers(&mut self, list: u32, first_binding: u32, buffer_slots: &[u32]) {
        self.push_command(
            list,
            Command::BindVertexBuffers {
                first_binding,
                buffers: buffer_slots.to_vec(),
            },
        );
    }

    fn cmd_bind_index_buffer(&mut self, list: u32, buffer_slot: u32, index_type: IndexType) {
        self.push_command(
            list,
            Command::BindIndexBuffer {
                buffer: buffer_slot,
                index_type,
            },
        );
    }

    fn cmd_set_scissor(&mut self, list: u32, scissor: Rect) {
        self.push_command(list, Command::SetScissor(scissor));
    }

    fn cmd_draw(&mut self, list: u32, draw: DrawInfo) {
        self.push_command(list, Command::Draw(draw));
    }

    fn cmd_draw_indexed(&mut self, list: u32, draw: DrawIndexedInfo) {
        self.push_command(list, Command::DrawIndexed(draw));
    }

    fn cmd_draw_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    ) {
        self.push_command(
            list,
            Command::DrawIndirect {
                buffer: buffer_slot,
                offset,
                info_count,
                stride,
            },
        );
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    ) {
        self.push_command(
            list,
            Command::DrawIndexedIndirect {
                buffer: buffer_slot,
                offset,
                info_count,
                stride,
            },
        );
    }

    fn cmd_dispatch(&mut self, list: u32, x: u32, y: u32, z: u32) {
        self.push_command(list, Command::Dispatch { x, y, z });
    }

    fn cmd_buffer_memory_barrier(
        &mut self,
        list: u32,
        _src_stages: crate::PipelineStages,
        _dst_stages: crate::PipelineStages,
        _buffer_slot: u32,
        _src_access: Access,
        _dst_access: Access,
    ) {
        self.push_command(list, Command::BufferMemoryBarrier);
    }

    fn cmd_image_memory_barrier(
        &mut self,
        list: u32,
        _src_stages: crate::PipelineStages,
        _dst_stages: crate::PipelineStages,
        _image_slot: u32,
        _old_layout: ImageLayout,
        _new_layout: ImageLayout,
        _src_access: Access,
        _dst_access: Access,
    ) {
        self.push_command(list, Command::ImageMemoryBarrier);
    }

    fn cmd_copy_buffer(&mut self, list: u32, src_slot: u32, dst_slot: u32, regions: &[BufferCopy]) {
        self.push_command(
            list,
            Command::CopyBuffer {
                src: src_slot,
                dst: dst_slot,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        list: u32,
        src_slot: u32,
        dst_slot: u32,
        _dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.push_command(
            list,
            Command::CopyBufferToImage {
                src: src_slot,
                dst: dst_slot,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image_to_buffer(
        &mut self,
        list: u32,
        src_slot: u32,
        _src_layout: ImageLayout,
        dst_slot: u32,
        regions: &[BufferImageCopy],
    ) {
        self.push_command(
            list,
            Command::CopyImageToBuffer {
                src: src_slot,
                dst: dst_slot,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_blit_image(
        &mut self,
        list: u32,
        _src_slot: u32,
        _src_layout: ImageLayout,
        _dst_slot: u32,
        _dst_layout: ImageLayout,
        _regions: &[ImageBlit],
        _filter: Filter,
    ) {
        self.push_command(list, Command::BlitImage);
    }

    fn queue_submit(&mut self, _family: QueueFamily, submit: &SubmitData) -> Result<(), String> {
        // Cross-queue synchronization does not exist here; replay happens
        // inline and in submission order.
        debug_assert!(submit.wait_slots.is_empty(), "semaphore waits on OpenGL");
        debug_assert!(submit.signal_slots.is_empty(), "semaphore signals on OpenGL");

        for &list_slot in &submit.list_slots {
            self.replay_list(list_slot);
        }

        if let Some(fence_slot) = submit.fence_slot {
            self.fences.set(fence_slot, true);
        }
        Ok(())
    }

    fn queue_wait_idle(&mut self, _family: QueueFamily) -> Result<(), String> {
        unsafe { self.gl.finish() };
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), String> {
        unsafe { self.gl.finish() };
        Ok(())
    }

    fn create_swapchain(&mut self, _vsync: bool) -> Result<SwapchainDesc, String> {
        Err("swapchain is not supported on the OpenGL backend".to_string())
    }

    fn register_swapchain_image(
        &mut self,
        _image_index: u32,
        _image_slot: u32,
    ) -> Result<(), String> {
        Err("swapchain is not supported on the OpenGL backend".to_string())
    }

    fn destroy_swapchain(&mut self) {}

    fn refresh_surface_caps(&mut self) -> Result<(), String> {
        Err("swapchain is not supported on the OpenGL backend".to_string())
    }

    fn acquire_image(&mut self, _semaphore_slot: u32) -> Result<AcquireOutcome, String> {
        Err("swapchain is not supported on the OpenGL backend".to_string())
    }

    fn present(
        &mut self,
        _image_index: u32,
        _wait_semaphore_slot: u32,
    ) -> Result<PresentOutcome, String> {
        Err("swapchain is not supported on the OpenGL backend".to_string())
    }

    fn depth_stencil_formats(&self) -> Vec<Format> {
        vec![Format::D32FS8U, Format::D24S8U]
    }

    fn max_sample_count(&self) -> SampleCount {
        match self.max_samples {
            samples if samples >= 64 => SampleCount::X64,
            samples if samples >= 32 => SampleCount::X32,
            samples if samples >= 16 => SampleCount::X16,
            samples if samples >= 8 => SampleCount::X8,
            samples if samples >= 4 => SampleCount::X4,
            samples if samples >= 2 => SampleCount::X2,
            _ => SampleCount::X1,
        }
    }

    fn shutdown(&mut self) {
        unsafe {
            self.gl.finish();

            let pipelines: Vec<GlPipeline> = self.pipelines.drain().collect();
            for pipeline in pipelines {
                if let Some(vao) = pipeline.vao {
                    self.gl.delete_vertex_array(vao);
                }
                self.gl.delete_program(pipeline.program);
            }
            let framebuffers: Vec<GlFramebuffer> = self.framebuffers.drain().collect();
            for framebuffer in framebuffers {
                self.gl.delete_framebuffer(framebuffer.handle);
            }
            let images: Vec<GlImage> = self.images.drain().collect();
            for image in images {
                if let Some(sampler) = image.sampler {
                    self.gl.delete_sampler(sampler);
                }
                self.gl.delete_texture(image.handle);
            }
            let buffers: Vec<GlBuffer> = self.buffers.drain().collect();
            for buffer in buffers {
                self.gl.delete_buffer(buffer.handle);
            }
        }
    }
}
