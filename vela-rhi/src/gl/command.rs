//! Deferred command capture and replay.
//!
//! OpenGL has no native command buffer. Recording appends tagged `Command`
//! values to the list; `queue_submit` replays each captured list in
//! submission order through a match over the variant.

use glow::HasContext;

use crate::backend::BeginPassData;
use crate::{
    AttachmentLoadOp, BufferCopy, BufferImageCopy, ClearColorValue, ColorComponents, CullMode,
    DrawIndexedInfo, DrawInfo, IndexType, Rect,
};

use super::{cast, OpenGlDevice};

#[derive(Debug)]
pub(super) enum Command {
    BeginPass(BeginPassData),
    PushConstant {
        offset: u32,
        data: Vec<u8>,
    },
    BindGraphicsPipeline {
        pipeline: u32,
        color_write_masks: Vec<ColorComponents>,
    },
    BindGraphicsSets {
        layout: u32,
        first_set: u32,
        sets: Vec<u32>,
    },
    BindComputePipeline {
        pipeline: u32,
    },
    BindComputeSets {
        layout: u32,
        first_set: u32,
        sets: Vec<u32>,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: Vec<u32>,
    },
    BindIndexBuffer {
        buffer: u32,
        index_type: IndexType,
    },
    SetScissor(Rect),
    Draw(DrawInfo),
    DrawIndexed(DrawIndexedInfo),
    DrawIndirect {
        buffer: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    },
    DrawIndexedIndirect {
        buffer: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    },
    EndPass,
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    BufferMemoryBarrier,
    ImageMemoryBarrier,
    CopyBuffer {
        src: u32,
        dst: u32,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: u32,
        dst: u32,
        regions: Vec<BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: u32,
        dst: u32,
        regions: Vec<BufferImageCopy>,
    },
    BlitImage,
}

/// Replay state, reset at the start of each list.
#[derive(Default)]
struct ReplayState {
    bound_graphics_pipeline: Option<u32>,
    bound_compute_pipeline: Option<u32>,
    index_type: Option<IndexType>,
}

impl OpenGlDevice {
    pub(super) fn push_command(&mut self, list: u32, command: Command) {
        let list = self.command_lists.get_mut(list);
        debug_assert!(list.recording, "command captured outside begin/end");
        list.captures.push(command);
    }

    /// Executes every captured command of the list, in record order.
    pub(super) fn replay_list(&mut self, list_slot: u32) {
        let captures = std::mem::take(&mut self.command_lists.get_mut(list_slot).captures);
        let mut state = ReplayState::default();

        for command in &captures {
            self.execute(command, &mut state);
        }

        self.command_lists.get_mut(list_slot).captures = captures;
    }

    fn execute(&mut self, command: &Command, state: &mut ReplayState) {
        match command {
            Command::BeginPass(data) => self.exec_begin_pass(data),
            Command::PushConstant { .. } => {
                log::warn!(target: "rhi::gl", "push constants are not implemented on OpenGL");
            }
            Command::BindGraphicsPipeline {
                pipeline,
                color_write_masks,
            } => {
                state.bound_graphics_pipeline = Some(*pipeline);
                self.exec_bind_graphics_pipeline(*pipeline, color_write_masks);
            }
            Command::BindGraphicsSets {
                layout,
                first_set,
                sets,
            }
            | Command::BindComputeSets {
                layout,
                first_set,
                sets,
            } => {
                for (i, &set) in sets.iter().enumerate() {
                    self.exec_bind_set(*layout, first_set + i as u32, set);
                }
            }
            Command::BindComputePipeline { pipeline } => {
                state.bound_compute_pipeline = Some(*pipeline);
                let program = self.pipelines.get(*pipeline).program;
                unsafe { self.gl.use_program(Some(program)) };
            }
            Command::BindVertexBuffers {
                first_binding,
                buffers,
            } => {
                let pipeline = state
                    .bound_graphics_pipeline
                    .expect("vertex buffers bound without a graphics pipeline");
                self.exec_bind_vertex_buffers(pipeline, *first_binding, buffers);
            }
            Command::BindIndexBuffer { buffer, index_type } => {
                state.index_type = Some(*index_type);
                let handle = self.buffers.get(*buffer).handle;
                unsafe {
                    self.gl
                        .bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(handle));
                }
            }
            Command::SetScissor(rect) => unsafe {
                self.gl.enable(glow::SCISSOR_TEST);
                self.gl.scissor(
                    rect.x as i32,
                    rect.y as i32,
                    rect.w as i32,
                    rect.h as i32,
                );
            },
            Command::Draw(draw) => self.exec_draw(state, draw),
            Command::DrawIndexed(draw) => self.exec_draw_indexed(state, draw),
            Command::DrawIndirect {
                buffer,
                offset,
                info_count,
                stride,
            } => self.exec_draw_indirect(state, *buffer, *offset, *info_count, *stride, false),
            Command::DrawIndexedIndirect {
                buffer,
                offset,
                info_count,
                stride,
            } => self.exec_draw_indirect(state, *buffer, *offset, *info_count, *stride, true),
            Command::EndPass => unsafe {
                self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            },
            Command::Dispatch { x, y, z } => unsafe {
                self.gl.dispatch_compute(*x, *y, *z);
            },
            Command::BufferMemoryBarrier | Command::ImageMemoryBarrier => unsafe {
                self.gl.memory_barrier(glow::ALL_BARRIER_BITS);
            },
            Command::CopyBuffer { src, dst, regions } => self.exec_copy_buffer(*src, *dst, regions),
            Command::CopyBufferToImage { src, dst, regions } => {
                self.exec_copy_buffer_to_image(*src, *dst, regions);
            }
            Command::CopyImageToBuffer { src, dst, regions } => {
                self.exec_copy_image_to_buffer(*src, *dst, regions);
            }
            Command::BlitImage => {
                log::warn!(target: "rhi::gl", "image blit is not implemented on OpenGL");
            }
        }
    }

    fn exec_begin_pass(&mut self, data: &BeginPassData) {
        let framebuffer = self.framebuffers.get(data.framebuffer_slot).handle;
        unsafe {
            self.gl
                .viewport(0, 0, data.width as i32, data.height as i32);
            self.gl.disable(glow::SCISSOR_TEST);
            self.gl
                .bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer));

            for (i, (&load_op, clear)) in data
                .color_load_ops
                .iter()
                .zip(&data.clear_colors)
                .enumerate()
            {
                if load_op != AttachmentLoadOp::Clear {
                    continue;
                }
                match clear {
                    ClearColorValue::F32(values) => {
                        self.gl
                            .clear_buffer_f32_slice(glow::COLOR, i as u32, values);
                    }
                    ClearColorValue::I32(values) => {
                        self.gl
                            .clear_buffer_i32_slice(glow::COLOR, i as u32, values);
                    }
                    ClearColorValue::U32(values) => {
                        self.gl
                            .clear_buffer_u32_slice(glow::COLOR, i as u32, values);
                    }
                }
            }

            if data.depth_load_op == Some(AttachmentLoadOp::Clear) {
                self.gl.depth_mask(true);
                self.gl.clear_buffer_depth_stencil(
                    glow::DEPTH_STENCIL,
                    0,
                    data.clear_depth_stencil.depth,
                    data.clear_depth_stencil.stencil as i32,
                );
            }
        }
    }

    fn exec_bind_graphics_pipeline(&mut self, pipeline: u32, color_write_masks: &[ColorComponents]) {
        let pipeline = self.pipelines.get(pipeline);
        unsafe {
            self.gl.bind_vertex_array(pipeline.vao);
            self.gl.use_program(Some(pipeline.program));

            if pipeline.depth_stencil.depth_test_enabled {
                self.gl.enable(glow::DEPTH_TEST);
                self.gl
                    .depth_func(cast::compare_op(pipeline.depth_stencil.depth_compare_op));
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
            self.gl
                .depth_mask(pipeline.depth_stencil.depth_write_enabled);

            match pipeline.rasterization.cull_mode {
                CullMode::None => self.gl.disable(glow::CULL_FACE),
                CullMode::Front => {
                    self.gl.enable(glow::CULL_FACE);
                    self.gl.cull_face(glow::FRONT);
                }
                CullMode::Back => {
                    self.gl.enable(glow::CULL_FACE);
                    self.gl.cull_face(glow::BACK);
                }
            }
            self.gl.front_face(glow::CCW);
            self.gl.polygon_mode(
                glow::FRONT_AND_BACK,
                cast::polygon_mode(pipeline.rasterization.polygon_mode),
            );
            self.gl.line_width(pipeline.rasterization.line_width);

            match pipeline.blend_states.first() {
                Some(blend) if blend.enabled => {
                    self.gl.enable(glow::BLEND);
                    self.gl.blend_func_separate(
                        cast::blend_factor(blend.src_color_factor),
                        cast::blend_factor(blend.dst_color_factor),
                        cast::blend_factor(blend.src_alpha_factor),
                        cast::blend_factor(blend.dst_alpha_factor),
                    );
                    self.gl.blend_equation_separate(
                        cast::blend_op(blend.color_blend_op),
                        cast::blend_op(blend.alpha_blend_op),
                    );
                }
                _ => self.gl.disable(glow::BLEND),
            }

            let mask = color_write_masks
                .first()
                .copied()
                .unwrap_or(ColorComponents::RGBA);
            self.gl.color_mask(
                mask.contains(ColorComponents::R),
                mask.contains(ColorComponents::G),
                mask.contains(ColorComponents::B),
                mask.contains(ColorComponents::A),
            );
        }
    }

    fn exec_bind_vertex_buffers(&mut self, pipeline: u32, first_binding: u32, buffers: &[u32]) {
        let bindings = self.pipelines.get(pipeline).vertex_bindings.clone();
        for (i, &buffer) in buffers.iter().enumerate() {
            let binding_index = first_binding + i as u32;
            let stride = bindings
                .iter()
                .find(|binding| binding.binding == binding_index)
                .map(|binding| binding.stride)
                .expect("vertex buffer bound to unknown binding");
            let handle = self.buffers.get(buffer).handle;
            unsafe {
                self.gl
                    .bind_vertex_buffer(binding_index, Some(handle), 0, stride as i32);
            }
        }
    }

    fn exec_draw(&mut self, state: &ReplayState, draw: &DrawInfo) {
        let pipeline = state
            .bound_graphics_pipeline
            .expect("draw without a bound graphics pipeline");
        let mode = self.pipelines.get(pipeline).primitive_mode;
        unsafe {
            self.gl.draw_arrays_instanced_base_instance(
                mode,
                draw.vertex_start as i32,
                draw.vertex_count as i32,
                draw.instance_count as i32,
                draw.instance_start,
            );
        }
    }

    fn exec_draw_indexed(&mut self, state: &ReplayState, draw: &DrawIndexedInfo) {
        let pipeline = state
            .bound_graphics_pipeline
            .expect("indexed draw without a bound graphics pipeline");
        let mode = self.pipelines.get(pipeline).primitive_mode;
        let (gl_index_type, index_size) =
            cast::index_type(state.index_type.expect("no index buffer bound"));
        unsafe {
            self.gl.draw_elements_instanced_base_vertex_base_instance(
                mode,
                draw.index_count as i32,
                gl_index_type,
                (index_size * draw.index_start as u64) as i32,
                draw.instance_count as i32,
                draw.vertex_offset,
                draw.instance_start,
            );
        }
    }

    fn exec_draw_indirect(
        &mut self,
        state: &ReplayState,
        buffer: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
        indexed: bool,
    ) {
        let pipeline = state
            .bound_graphics_pipeline
            .expect("indirect draw without a bound graphics pipeline");
        let mode = self.pipelines.get(pipeline).primitive_mode;
        let handle = self.buffers.get(buffer).handle;
        unsafe {
            self.gl
                .bind_buffer(glow::DRAW_INDIRECT_BUFFER, Some(handle));
            for i in 0..info_count as u64 {
                let command_offset = (offset + i * stride as u64) as i32;
                if indexed {
                    let (gl_index_type, _) =
                        cast::index_type(state.index_type.expect("no index buffer bound"));
                    self.gl
                        .draw_elements_indirect_offset(mode, gl_index_type, command_offset);
                } else {
                    self.gl.draw_arrays_indirect_offset(mode, command_offset);
                }
            }
        }
    }

    fn exec_copy_buffer(&mut self, src: u32, dst: u32, regions: &[BufferCopy]) {
        let src = self.buffers.get(src).handle;
        let dst = self.buffers.get(dst).handle;
        unsafe {
            self.gl.bind_buffer(glow::COPY_READ_BUFFER, Some(src));
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(dst));
            for region in regions {
                self.gl.copy_buffer_sub_data(
                    glow::COPY_READ_BUFFER,
                    glow::COPY_WRITE_BUFFER,
                    region.src_offset as i32,
                    region.dst_offset as i32,
                    region.size as i32,
                );
            }
            self.gl.bind_buffer(glow::COPY_READ_BUFFER, None);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
        }
    }

    /// Source texels stream out of the buffer through the pixel unpack
    /// binding; regions address full-width subresources.
    fn exec_copy_buffer_to_image(&mut self, src: u32, dst: u32, regions: &[BufferImageCopy]) {
        let buffer = self.buffers.get(src).handle;
        let image = self.images.get(dst);
        unsafe {
            self.gl
                .bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(buffer));
            self.gl.bind_texture(image.target, Some(image.handle));
            for region in regions {
                self.gl.tex_sub_image_2d(
                    image.target,
                    0,
                    0,
                    0,
                    region.image_width as i32,
                    region.image_height as i32,
                    image.data_format,
                    image.data_type,
                    glow::PixelUnpackData::BufferOffset(region.buffer_offset as u32),
                );
            }
            self.gl.bind_texture(image.target, None);
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
        }
    }

    fn exec_copy_image_to_buffer(&mut self, src: u32, dst: u32, regions: &[BufferImageCopy]) {
        let image = self.images.get(src);
        let buffer = self.buffers.get(dst).handle;
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(buffer));
            self.gl.bind_texture(image.target, Some(image.handle));
            for region in regions {
                self.gl.get_tex_image(
                    image.target,
                    0,
                    image.data_format,
                    image.data_type,
                    glow::PixelPackData::BufferOffset(region.buffer_offset as u32),
                );
            }
            self.gl.bind_texture(image.target, None);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
    }
}
