//! Pipeline layouts, pipeline templates and their lazily built variants.
//!
//! A graphics pipeline template owns every piece of fixed state except the
//! render pass and the per-attachment color write masks; those arrive with
//! the first bind inside a pass and select (or build) a concrete variant.

use ash::vk;
use fnv::FnvHashMap;

use super::{cast, vk_check, VulkanDevice};
use crate::backend::{ComputePipelineDesc, GraphicsPipelineDesc, VariantDesc};
use crate::{DepthStencilInfo, RasterizationInfo, PUSH_CONSTANT_SIZE};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

pub(super) struct VulkanPipeline {
    pub layout: vk::PipelineLayout,
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub topology: vk::PrimitiveTopology,
    pub rasterization: RasterizationInfo,
    pub depth_stencil: DepthStencilInfo,
    pub blend_states: Vec<vk::PipelineColorBlendAttachmentState>,
    /// Concrete pipelines keyed by variant hash. Compute pipelines hold a
    /// single entry at key 0.
    pub handles: FnvHashMap<u64, vk::Pipeline>,
}

impl VulkanDevice {
    pub(super) fn create_pipeline_layout_impl(
        &mut self,
        slot: u32,
        set_layout_slots: &[u32],
    ) -> Result<(), String> {
        // Every layout carries the same full push-constant range, so two
        // layouts are compatible whenever their set-layout chains are.
        let range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::ALL)
            .offset(0)
            .size(PUSH_CONSTANT_SIZE);

        let handles: Vec<vk::DescriptorSetLayout> = set_layout_slots
            .iter()
            .map(|&layout_slot| *self.set_layouts.get(layout_slot))
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&handles)
            .push_constant_ranges(std::slice::from_ref(&range));
        let handle = vk_check("vkCreatePipelineLayout", unsafe {
            self.device.create_pipeline_layout(&create_info, None)
        })?;

        self.pipeline_layouts.set(slot, handle);
        Ok(())
    }

    /// Initializes the template's fixed state; no native pipeline exists
    /// until the first bind supplies the variant inputs.
    pub(super) fn create_pipeline_impl(
        &mut self,
        slot: u32,
        desc: &GraphicsPipelineDesc,
    ) -> Result<(), String> {
        let stages = desc
            .shader_slots
            .iter()
            .map(|&(shader_type, shader_slot)| {
                (cast::shader_stage(shader_type), *self.shaders.get(shader_slot))
            })
            .collect();

        let vertex_attributes = desc
            .vertex_attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(attr.binding)
                    .format(cast::vertex_format(attr.format))
                    .offset(attr.offset)
            })
            .collect();

        let vertex_bindings = desc
            .vertex_bindings
            .iter()
            .map(|binding| {
                vk::VertexInputBindingDescription::default()
                    .binding(binding.binding)
                    .stride(binding.stride)
                    .input_rate(cast::vertex_input_rate(binding.input_rate))
            })
            .collect();

        let blend_states = desc
            .blend_states
            .iter()
            .map(|blend| {
                let mut state = vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(blend.enabled)
                    .color_write_mask(vk::ColorComponentFlags::RGBA);
                if blend.enabled {
                    state = state
                        .src_color_blend_factor(cast::blend_factor(blend.src_color_factor))
                        .dst_color_blend_factor(cast::blend_factor(blend.dst_color_factor))
                        .color_blend_op(cast::blend_op(blend.color_blend_op))
                        .src_alpha_blend_factor(cast::blend_factor(blend.src_alpha_factor))
                        .dst_alpha_blend_factor(cast::blend_factor(blend.dst_alpha_factor))
                        .alpha_blend_op(cast::blend_op(blend.alpha_blend_op));
                }
                state
            })
            .collect();

        self.pipelines.set(
            slot,
            VulkanPipeline {
                layout: *self.pipeline_layouts.get(desc.layout_slot),
                stages,
                vertex_attributes,
                vertex_bindings,
                topology: cast::primitive_topology(desc.primitive_topology),
                rasterization: desc.rasterization,
                depth_stencil: desc.depth_stencil,
                blend_states,
                handles: FnvHashMap::default(),
            },
        );
        Ok(())
    }

    pub(super) fn create_compute_pipeline_impl(
        &mut self,
        slot: u32,
        desc: &ComputePipelineDesc,
    ) -> Result<(), String> {
        let layout = *self.pipeline_layouts.get(desc.layout_slot);
        let module = *self.shaders.get(desc.shader_slot);

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(SHADER_ENTRY);
        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout);

        let pipelines = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, err)| {
            log::error!(target: "rhi::vk", "vkCreateComputePipelines failed: {err:?}");
            format!("vkCreateComputePipelines failed: {err:?}")
        })?;

        let mut handles = FnvHashMap::default();
        handles.insert(0, pipelines[0]);

        self.pipelines.set(
            slot,
            VulkanPipeline {
                layout,
                stages: vec![(vk::ShaderStageFlags::COMPUTE, module)],
                vertex_attributes: Vec::new(),
                vertex_bindings: Vec::new(),
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                rasterization: RasterizationInfo::default(),
                depth_stencil: DepthStencilInfo::default(),
                blend_states: Vec::new(),
                handles,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_pipeline_impl(&mut self, slot: u32) {
        if let Some(pipeline) = self.pipelines.take(slot) {
            for (_, handle) in pipeline.handles {
                unsafe { self.device.destroy_pipeline(handle, None) };
            }
        }
    }

    pub(super) fn create_pipeline_variant_impl(
        &mut self,
        pipeline_slot: u32,
        desc: &VariantDesc,
    ) -> Result<(), String> {
        let render_pass = *self.passes.get(desc.pass_slot);
        let pipeline = self.pipelines.get_mut(pipeline_slot);

        if pipeline.handles.contains_key(&desc.variant_hash) {
            return Ok(());
        }

        for (state, mask) in pipeline
            .blend_states
            .iter_mut()
            .zip(&desc.color_write_masks)
        {
            state.color_write_mask = cast::color_components(*mask);
        }

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = pipeline
            .stages
            .iter()
            .map(|&(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(SHADER_ENTRY)
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&pipeline.vertex_bindings)
            .vertex_attribute_descriptions(&pipeline.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(pipeline.topology)
            .primitive_restart_enable(false);
        let tessellation = vk::PipelineTessellationStateCreateInfo::default();
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(cast::polygon_mode(pipeline.rasterization.polygon_mode))
            .cull_mode(cast::cull_mode(pipeline.rasterization.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(pipeline.rasterization.line_width);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(cast::sample_count(desc.samples));

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(pipeline.depth_stencil.depth_test_enabled)
            .depth_write_enable(pipeline.depth_stencil.depth_write_enabled)
            .depth_compare_op(cast::compare_op(pipeline.depth_stencil.depth_compare_op))
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&pipeline.blend_states);

        // Depth-test enable stays dynamic so toggling it does not spawn a
        // new variant.
        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::DEPTH_TEST_ENABLE,
        ];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .tessellation_state(&tessellation)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(pipeline.layout)
            .render_pass(render_pass)
            .subpass(0);

        let handles = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, err)| {
            log::error!(target: "rhi::vk", "vkCreateGraphicsPipelines failed: {err:?}");
            format!("vkCreateGraphicsPipelines failed: {err:?}")
        })?;

        pipeline.handles.insert(desc.variant_hash, handles[0]);
        Ok(())
    }
}
