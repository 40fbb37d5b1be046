//! Programs, vertex array objects, and the set/binding remap.
//!
//! OpenGL has no descriptor sets; the pipeline layout assigns every
//! `(set, binding)` pair a flat GL binding index, counted per resource kind.
//! Shaders are decompiled from their stored SPIR-V with that remap applied,
//! then compiled and linked into a program at pipeline creation.

use glow::HasContext;

use super::{cast, OpenGlDevice};
use crate::backend::{ComputePipelineDesc, GraphicsPipelineDesc, SetBufferWrite, SetImageWrite};
use crate::{
    shader, BindingType, BlendState, DepthStencilInfo, RasterizationInfo, SetBindingInfo,
    ShaderType, VertexBinding, VertexFormat, VertexInputRate,
};

pub(super) struct GlShader {
    pub shader_type: ShaderType,
    pub spirv: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct GlBindingRemap {
    pub binding: u32,
    pub binding_type: BindingType,
    /// Flat GL binding index within the resource kind's namespace.
    pub gl_slot: u32,
}

pub(super) struct GlPipelineLayout {
    /// Remap entries per set, in set order.
    pub sets: Vec<Vec<GlBindingRemap>>,
    pub binding_map: naga::back::glsl::BindingMap,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) enum GlResource {
    #[default]
    None,
    Buffer(u32),
    Image(u32),
}

pub(super) struct GlSetBindingSite {
    pub info: SetBindingInfo,
    pub resources: Vec<GlResource>,
}

pub(super) struct GlSet {
    pub bindings: Vec<GlSetBindingSite>,
}

pub(super) struct GlSetPool {
    pub layout_slot: u32,
}

pub(super) struct GlPipeline {
    pub program: glow::Program,
    pub vao: Option<glow::VertexArray>,
    pub primitive_mode: u32,
    pub vertex_bindings: Vec<VertexBinding>,
    pub rasterization: RasterizationInfo,
    pub depth_stencil: DepthStencilInfo,
    pub blend_states: Vec<BlendState>,
}

impl OpenGlDevice {
    /// Assigns sequential GL binding indices per resource kind across the
    /// layout's set chain and remembers them for set binds and decompiles.
    pub(super) fn create_pipeline_layout_impl(
        &mut self,
        slot: u32,
        set_layout_bindings: &[&[SetBindingInfo]],
    ) {
        let mut next_uniform = 0u32;
        let mut next_storage = 0u32;
        let mut next_texture = 0u32;
        let mut next_image = 0u32;

        let mut sets = Vec::with_capacity(set_layout_bindings.len());
        let mut binding_map = naga::back::glsl::BindingMap::new();

        for (set_index, bindings) in set_layout_bindings.iter().enumerate() {
            let mut remaps = Vec::with_capacity(bindings.len());
            for binding in *bindings {
                let counter = match binding.binding_type {
                    BindingType::UniformBuffer => &mut next_uniform,
                    BindingType::StorageBuffer => &mut next_storage,
                    BindingType::CombinedImageSampler => &mut next_texture,
                    BindingType::StorageImage => &mut next_image,
                };
                let gl_slot = *counter;
                *counter += binding.array_count.max(1);

                remaps.push(GlBindingRemap {
                    binding: binding.binding,
                    binding_type: binding.binding_type,
                    gl_slot,
                });
                binding_map.insert(
                    naga::ResourceBinding {
                        group: set_index as u32,
                        binding: binding.binding,
                    },
                    gl_slot as u8,
                );
            }
            sets.push(remaps);
        }

        self.pipeline_layouts
            .set(slot, GlPipelineLayout { sets, binding_map });
    }

    pub(super) fn create_pipeline_impl(
        &mut self,
        slot: u32,
        desc: &GraphicsPipelineDesc,
    ) -> Result<(), String> {
        let mut stages = Vec::with_capacity(desc.shader_slots.len());
        for &(shader_type, shader_slot) in &desc.shader_slots {
            stages.push(self.compile_stage(desc.layout_slot, shader_type, shader_slot)?);
        }
        let program = self.link_program(&stages)?;

        let vao = unsafe {
            let vao = self.gl.create_vertex_array()?;
            self.gl.bind_vertex_array(Some(vao));
            for attr in &desc.vertex_attributes {
                self.gl.enable_vertex_attrib_array(attr.location);
                match attr.format {
                    VertexFormat::U32 => {
                        self.gl.vertex_attrib_format_i32(
                            attr.location,
                            1,
                            glow::UNSIGNED_INT,
                            attr.offset,
                        );
                    }
                    format => {
                        let size = match format {
                            VertexFormat::F32 => 1,
                            VertexFormat::F32x2 => 2,
                            VertexFormat::F32x3 => 3,
                            _ => 4,
                        };
                        self.gl.vertex_attrib_format_f32(
                            attr.location,
                            size,
                            glow::FLOAT,
                            false,
                            attr.offset,
                        );
                    }
                }
                self.gl.vertex_attrib_binding(attr.location, attr.binding);
            }
            for binding in &desc.vertex_bindings {
                let divisor = match binding.input_rate {
                    VertexInputRate::Vertex => 0,
                    VertexInputRate::Instance => 1,
                };
                self.gl.vertex_binding_divisor(binding.binding, divisor);
            }
            self.gl.bind_vertex_array(None);
            vao
        };

        self.pipelines.set(
            slot,
            GlPipeline {
                program,
                vao: Some(vao),
                primitive_mode: cast::primitive_mode(desc.primitive_topology),
                vertex_bindings: desc.vertex_bindings.clone(),
                rasterization: desc.rasterization,
                depth_stencil: desc.depth_stencil,
                blend_states: desc.blend_states.clone(),
            },
        );
        Ok(())
    }

    pub(super) fn create_compute_pipeline_impl(
        &mut self,
        slot: u32,
        desc: &ComputePipelineDesc,
    ) -> Result<(), String> {
        let stage = self.compile_stage(desc.layout_slot, ShaderType::Compute, desc.shader_slot)?;
        let program = self.link_program(&[stage])?;

        self.pipelines.set(
            slot,
            GlPipeline {
                program,
                vao: None,
                primitive_mode: glow::TRIANGLES,
                vertex_bindings: Vec::new(),
                rasterization: RasterizationInfo::default(),
                depth_stencil: DepthStencilInfo::default(),
                blend_states: Vec::new(),
            },
        );
        Ok(())
    }

    pub(super) fn destroy_pipeline_impl(&mut self, slot: u32) {
        if let Some(pipeline) = self.pipelines.take(slot) {
            unsafe {
                if let Some(vao) = pipeline.vao {
                    self.gl.delete_vertex_array(vao);
                }
                self.gl.delete_program(pipeline.program);
            }
        }
    }

    fn compile_stage(
        &self,
        layout_slot: u32,
        shader_type: ShaderType,
        shader_slot: u32,
    ) -> Result<glow::Shader, String> {
        let layout = self.pipeline_layouts.get(layout_slot);
        let stored = self.shaders.get(shader_slot);
        debug_assert_eq!(stored.shader_type, shader_type);

        let glsl =
            shader::decompile_to_opengl_glsl(shader_type, &stored.spirv, &layout.binding_map)?;

        unsafe {
            let handle = self.gl.create_shader(cast::shader_stage(shader_type))?;
            self.gl.shader_source(handle, &glsl);
            self.gl.compile_shader(handle);
            if !self.gl.get_shader_compile_status(handle) {
                let info_log = self.gl.get_shader_info_log(handle);
                self.gl.delete_shader(handle);
                log::error!(target: "rhi::gl", "shader compile failed: {info_log}");
                return Err(format!("shader compile failed: {info_log}"));
            }
            Ok(handle)
        }
    }

    fn link_program(&self, stages: &[glow::Shader]) -> Result<glow::Program, String> {
        unsafe {
            let program = self.gl.create_program()?;
            for &stage in stages {
                self.gl.attach_shader(program, stage);
            }
            self.gl.link_program(program);
            for &stage in stages {
                self.gl.detach_shader(program, stage);
                self.gl.delete_shader(stage);
            }
            if !self.gl.get_program_link_status(program) {
                let info_log = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                log::error!(target: "rhi::gl", "program link failed: {info_log}");
                return Err(format!("program link failed: {info_log}"));
            }
            Ok(program)
        }
    }

    pub(super) fn allocate_set_impl(&mut self, pool_slot: u32, set_slot: u32) {
        let layout_slot = self.set_pools.get(pool_slot).layout_slot;
        let bindings = self
            .set_layouts
            .get(layout_slot)
            .iter()
            .map(|info| GlSetBindingSite {
                info: *info,
                resources: vec![GlResource::None; info.array_count.max(1) as usize],
            })
            .collect();
        self.sets.set(set_slot, GlSet { bindings });
    }

    pub(super) fn update_set_images_impl(&mut self, writes: &[SetImageWrite]) {
        for write in writes {
            let set = self.sets.get_mut(write.set_slot);
            let Some(site) = set
                .bindings
                .iter_mut()
                .find(|site| site.info.binding == write.dst_binding)
            else {
                log::warn!(target: "rhi::gl", "set image write to unknown binding {}", write.dst_binding);
                continue;
            };
            for (i, &(image_slot, _layout)) in write.images.iter().enumerate() {
                let index = write.dst_array_index as usize + i;
                if index < site.resources.len() {
                    site.resources[index] = GlResource::Image(image_slot);
                }
            }
        }
    }

    pub(super) fn update_set_buffers_impl(&mut self, writes: &[SetBufferWrite]) {
        for write in writes {
            let set = self.sets.get_mut(write.set_slot);
            let Some(site) = set
                .bindings
                .iter_mut()
                .find(|site| site.info.binding == write.dst_binding)
            else {
                log::warn!(target: "rhi::gl", "set buffer write to unknown binding {}", write.dst_binding);
                continue;
            };
            for (i, &buffer_slot) in write.buffers.iter().enumerate() {
                let index = write.dst_array_index as usize + i;
                if index < site.resources.len() {
                    site.resources[index] = GlResource::Buffer(buffer_slot);
                }
            }
        }
    }

    /// Binds one set's resources at the flat GL indices the layout assigned.
    pub(super) fn exec_bind_set(&mut self, layout_slot: u32, set_index: u32, set_slot: u32) {
        let layout = self.pipeline_layouts.get(layout_slot);
        let set = self.sets.get(set_slot);
        let Some(remaps) = layout.sets.get(set_index as usize) else {
            log::warn!(target: "rhi::gl", "set {set_index} bound outside the pipeline layout");
            return;
        };

        for remap in remaps {
            let Some(site) = set
                .bindings
                .iter()
                .find(|site| site.info.binding == remap.binding)
            else {
                continue;
            };
            let resource = site.resources.first().copied().unwrap_or_default();

            match (remap.binding_type, resource) {
                (BindingType::CombinedImageSampler, GlResource::Image(image_slot)) => {
                    let image = self.images.get(image_slot);
                    unsafe {
                        self.gl.active_texture(glow::TEXTURE0 + remap.gl_slot);
                        self.gl.bind_texture(image.target, Some(image.handle));
                        if let Some(sampler) = image.sampler {
                            self.gl.bind_sampler(remap.gl_slot, Some(sampler));
                        }
                    }
                }
                (BindingType::StorageImage, GlResource::Image(image_slot)) => {
                    let image = self.images.get(image_slot);
                    unsafe {
                        self.gl.bind_image_texture(
                            remap.gl_slot,
                            image.handle,
                            0,
                            false,
                            0,
                            glow::READ_WRITE,
                            image.internal_format,
                        );
                    }
                }
                (BindingType::UniformBuffer, GlResource::Buffer(buffer_slot)) => {
                    let handle = self.buffers.get(buffer_slot).handle;
                    unsafe {
                        self.gl
                            .bind_buffer_base(glow::UNIFORM_BUFFER, remap.gl_slot, Some(handle));
                    }
                }
                (BindingType::StorageBuffer, GlResource::Buffer(buffer_slot)) => {
                    let handle = self.buffers.get(buffer_slot).handle;
                    unsafe {
                        self.gl.bind_buffer_base(
                            glow::SHADER_STORAGE_BUFFER,
                            remap.gl_slot,
                            Some(handle),
                        );
                    }
                }
                (_, GlResource::None) => {}
                (binding_type, resource) => {
                    log::warn!(
                        target: "rhi::gl",
                        "binding {} holds {resource:?}, expected {binding_type:?}",
                        remap.binding,
                    );
                }
            }
        }
    }
}
