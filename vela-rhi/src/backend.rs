//! The capability set both graphics APIs implement.
//!
//! The device resolves public handles to pool slot indices before calling
//! into the backend; every backend keeps its native per-object data in
//! stores co-indexed with the device pools.

use crate::{
    Access, AttachmentLoadOp, BindingType, BlendState, BufferCopy, BufferImageCopy, BufferInfo,
    ClearColorValue, ClearDepthStencilValue, CommandPoolInfo, DepthStencilInfo, DeviceBackend,
    DrawIndexedInfo, DrawInfo, Filter, Format, ImageBlit, ImageInfo, ImageLayout, IndexType,
    PassColorAttachment, PassDependency, PassDepthStencilAttachment, PassInfo,
    PassResolveAttachment, PipelineStages, PrimitiveTopology, QueueFamily, RasterizationInfo,
    Rect, SampleCount, SetBindingInfo, ShaderType, VertexAttribute, VertexBinding,
    ColorComponents,
};

/// Owned snapshot of a pass description, safe to hold across calls while
/// the transient `PassInfo` borrows are gone.
#[derive(Debug, Clone, Default)]
pub(crate) struct PassData {
    pub samples: Option<SampleCount>,
    pub color_attachments: Vec<PassColorAttachment>,
    pub color_resolve_attachments: Vec<PassResolveAttachment>,
    pub depth_stencil_attachment: Option<PassDepthStencilAttachment>,
    pub dependency: Option<PassDependency>,
}

impl PassData {
    pub fn from_info(info: &PassInfo) -> Self {
        Self {
            samples: Some(info.samples),
            color_attachments: info.color_attachments.to_vec(),
            color_resolve_attachments: info
                .color_resolve_attachments
                .map(<[_]>::to_vec)
                .unwrap_or_default(),
            depth_stencil_attachment: info.depth_stencil_attachment.copied(),
            dependency: info.dependency.copied(),
        }
    }

    pub fn as_info(&self) -> PassInfo<'_> {
        PassInfo {
            samples: self.samples.unwrap_or(SampleCount::X1),
            color_attachments: &self.color_attachments,
            color_resolve_attachments: if self.color_resolve_attachments.is_empty() {
                None
            } else {
                Some(&self.color_resolve_attachments)
            },
            depth_stencil_attachment: self.depth_stencil_attachment.as_ref(),
            dependency: self.dependency.as_ref(),
        }
    }
}

/// Pass begin parameters with the framebuffer already resolved.
#[derive(Debug, Clone)]
pub(crate) struct BeginPassData {
    pub width: u32,
    pub height: u32,
    pub pass_slot: u32,
    pub framebuffer_slot: u32,
    pub color_load_ops: Vec<AttachmentLoadOp>,
    pub clear_colors: Vec<ClearColorValue>,
    pub depth_load_op: Option<AttachmentLoadOp>,
    pub clear_depth_stencil: ClearDepthStencilValue,
}

#[derive(Debug, Clone)]
pub(crate) struct FramebufferDesc {
    pub pass_slot: u32,
    pub width: u32,
    pub height: u32,
    pub color_slots: Vec<u32>,
    pub resolve_slots: Vec<u32>,
    pub depth_stencil_slot: Option<u32>,
}

#[derive(Debug, Clone)]
pub(crate) struct GraphicsPipelineDesc {
    pub shader_slots: Vec<(ShaderType, u32)>,
    pub layout_slot: u32,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub vertex_bindings: Vec<VertexBinding>,
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationInfo,
    pub depth_stencil: DepthStencilInfo,
    pub blend_states: Vec<BlendState>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ComputePipelineDesc {
    pub shader_slot: u32,
    pub layout_slot: u32,
}

/// Inputs of one concrete pipeline variant.
#[derive(Debug, Clone)]
pub(crate) struct VariantDesc {
    pub variant_hash: u64,
    pub pass_slot: u32,
    pub samples: SampleCount,
    pub color_write_masks: Vec<ColorComponents>,
}

#[derive(Debug, Clone)]
pub(crate) struct SetImageWrite {
    pub set_slot: u32,
    pub dst_binding: u32,
    pub dst_array_index: u32,
    pub binding_type: BindingType,
    pub images: Vec<(u32, ImageLayout)>,
}

#[derive(Debug, Clone)]
pub(crate) struct SetBufferWrite {
    pub set_slot: u32,
    pub dst_binding: u32,
    pub dst_array_index: u32,
    pub binding_type: BindingType,
    pub buffers: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SubmitData {
    pub wait_slots: Vec<u32>,
    pub wait_stages: Vec<PipelineStages>,
    pub list_slots: Vec<u32>,
    pub signal_slots: Vec<u32>,
    pub fence_slot: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SwapchainDesc {
    pub image_count: u32,
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AcquireOutcome {
    Acquired(u32),
    /// Out-of-date or suboptimal; the swapchain must be invalidated.
    Stale,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PresentOutcome {
    Presented,
    /// Out-of-date or suboptimal; invalidation happens on the next frame.
    Stale,
}

/// Native object storage co-indexed with a device pool.
pub(crate) struct SlotStore<T>(Vec<Option<T>>);

impl<T> SlotStore<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn set(&mut self, slot: u32, value: T) {
        let slot = slot as usize;
        if slot >= self.0.len() {
            self.0.resize_with(slot + 1, || None);
        }
        self.0[slot] = Some(value);
    }

    pub fn take(&mut self, slot: u32) -> Option<T> {
        self.0.get_mut(slot as usize).and_then(Option::take)
    }

    pub fn get(&self, slot: u32) -> &T {
        self.0[slot as usize]
            .as_ref()
            .expect("backend object missing for live slot")
    }

    pub fn get_mut(&mut self, slot: u32) -> &mut T {
        self.0[slot as usize]
            .as_mut()
            .expect("backend object missing for live slot")
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.0.iter_mut().filter_map(Option::take)
    }
}

pub(crate) trait GpuBackend {
    fn backend(&self) -> DeviceBackend;

    // Synchronization primitives.
    fn create_semaphore(&mut self, slot: u32) -> Result<(), String>;
    fn destroy_semaphore(&mut self, slot: u32);
    fn create_fence(&mut self, slot: u32, signaled: bool) -> Result<(), String>;
    fn destroy_fence(&mut self, slot: u32);
    fn wait_fence(&mut self, slot: u32) -> Result<(), String>;
    fn reset_fence(&mut self, slot: u32) -> Result<(), String>;

    // Resources.
    fn create_buffer(&mut self, slot: u32, info: &BufferInfo) -> Result<(), String>;
    fn destroy_buffer(&mut self, slot: u32);
    fn map_buffer(&mut self, slot: u32) -> Result<(), String>;
    fn map_read(&self, slot: u32, offset: u64, size: u64) -> &[u8];
    fn map_write(&mut self, slot: u32, offset: u64, data: &[u8]);
    fn unmap_buffer(&mut self, slot: u32);
    fn create_image(&mut self, slot: u32, info: &ImageInfo) -> Result<(), String>;
    fn destroy_image(&mut self, slot: u32);
    fn create_shader(&mut self, slot: u32, shader_type: ShaderType, spirv: &[u32])
        -> Result<(), String>;
    fn destroy_shader(&mut self, slot: u32);

    // Passes and framebuffers.
    fn create_pass(&mut self, slot: u32, pass: &PassData) -> Result<(), String>;
    fn destroy_pass(&mut self, slot: u32);
    fn create_framebuffer(&mut self, slot: u32, desc: &FramebufferDesc) -> Result<(), String>;
    fn destroy_framebuffer(&mut self, slot: u32);

    // Descriptors.
    fn create_set_layout(&mut self, slot: u32, bindings: &[SetBindingInfo]) -> Result<(), String>;
    fn destroy_set_layout(&mut self, slot: u32);
    fn create_set_pool(
        &mut self,
        slot: u32,
        layout_slot: u32,
        bindings: &[SetBindingInfo],
        max_sets: u32,
    ) -> Result<(), String>;
    fn destroy_set_pool(&mut self, slot: u32);
    fn allocate_set(&mut self, pool_slot: u32, set_slot: u32) -> Result<(), String>;
    fn reset_set_pool(&mut self, pool_slot: u32) -> Result<(), String>;
    fn update_set_images(&mut self, writes: &[SetImageWrite]);
    fn update_set_buffers(&mut self, writes: &[SetBufferWrite]);

    // Layouts and pipelines.
    fn create_pipeline_layout(
        &mut self,
        slot: u32,
        set_layout_slots: &[u32],
        set_layout_bindings: &[&[SetBindingInfo]],
    ) -> Result<(), String>;
    fn destroy_pipeline_layout(&mut self, slot: u32);
    fn create_pipeline(&mut self, slot: u32, desc: &GraphicsPipelineDesc) -> Result<(), String>;
    fn create_compute_pipeline(
        &mut self,
        slot: u32,
        desc: &ComputePipelineDesc,
    ) -> Result<(), String>;
    fn destroy_pipeline(&mut self, slot: u32);
    /// Ensures the variant for `desc.variant_hash` exists.
    fn create_pipeline_variant(&mut self, pipeline_slot: u32, desc: &VariantDesc)
        -> Result<(), String>;
    /// Number of concrete native pipelines built for this template.
    fn pipeline_variant_count(&self, pipeline_slot: u32) -> usize;

    // Command pools and lists.
    fn create_command_pool(&mut self, slot: u32, info: &CommandPoolInfo) -> Result<(), String>;
    fn destroy_command_pool(&mut self, slot: u32, list_slots: &[u32]);
    fn allocate_command_list(&mut self, pool_slot: u32, list_slot: u32) -> Result<(), String>;
    fn reset_command_pool(&mut self, pool_slot: u32, list_slots: &[u32]) -> Result<(), String>;

    // Recording.
    fn begin_list(&mut self, list: u32, one_time_submit: bool) -> Result<(), String>;
    fn end_list(&mut self, list: u32) -> Result<(), String>;
    fn reset_list(&mut self, list: u32) -> Result<(), String>;
    fn cmd_begin_pass(&mut self, list: u32, data: BeginPassData);
    fn cmd_end_pass(&mut self, list: u32);
    fn cmd_push_constant(&mut self, list: u32, layout_slot: u32, offset: u32, data: &[u8]);
    fn cmd_bind_graphics_pipeline(
        &mut self,
        list: u32,
        pipeline_slot: u32,
        variant_hash: u64,
        depth_test_enable: bool,
        color_write_masks: &[ColorComponents],
    );
    fn cmd_bind_compute_pipeline(&mut self, list: u32, pipeline_slot: u32);
    fn cmd_bind_graphics_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    );
    fn cmd_bind_compute_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    );
    fn cmd_bind_vertex_buffers(&mut self, list: u32, first_binding: u32, buffer_slots: &[u32]);
    fn cmd_bind_index_buffer(&mut self, list: u32, buffer_slot: u32, index_type: IndexType);
    fn cmd_set_scissor(&mut self, list: u32, scissor: Rect);
    fn cmd_draw(&mut self, list: u32, draw: DrawInfo);
    fn cmd_draw_indexed(&mut self, list: u32, draw: DrawIndexedInfo);
    fn cmd_draw_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    );
    fn cmd_draw_indexed_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    );
    fn cmd_dispatch(&mut self, list: u32, x: u32, y: u32, z: u32);
    fn cmd_buffer_memory_barrier(
        &mut self,
        list: u32,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        buffer_slot: u32,
        src_access: Access,
        dst_access: Access,
    );
    #[allow(clippy::too_many_arguments)]
    fn cmd_image_memory_barrier(
        &mut self,
        list: u32,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        image_slot: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_access: Access,
        dst_access: Access,
    );
    fn cmd_copy_buffer(&mut self, list: u32, src_slot: u32, dst_slot: u32, regions: &[BufferCopy]);
    fn cmd_copy_buffer_to_image(
        &mut self,
        list: u32,
        src_slot: u32,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        regions: &[BufferImageCopy],
    );
    #[allow(clippy::too_many_arguments)]
    fn cmd_blit_image(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    );

    // Queues.
    fn queue_submit(&mut self, family: QueueFamily, submit: &SubmitData) -> Result<(), String>;
    fn queue_wait_idle(&mut self, family: QueueFamily) -> Result<(), String>;
    fn wait_idle(&mut self) -> Result<(), String>;

    // Swapchain. Backends or devices without one return errors.
    fn create_swapchain(&mut self, vsync: bool) -> Result<SwapchainDesc, String>;
    fn register_swapchain_image(&mut self, image_index: u32, image_slot: u32)
        -> Result<(), String>;
    fn destroy_swapchain(&mut self);
    fn refresh_surface_caps(&mut self) -> Result<(), String>;
    fn acquire_image(&mut self, semaphore_slot: u32) -> Result<AcquireOutcome, String>;
    fn present(&mut self, image_index: u32, wait_semaphore_slot: u32)
        -> Result<PresentOutcome, String>;

    // Capability queries.
    fn depth_stencil_formats(&self) -> Vec<Format>;
    fn max_sample_count(&self) -> SampleCount;

    /// Releases everything the backend still owns. Called once from device
    /// teardown, after all pool objects were destroyed.
    fn shutdown(&mut self);
}
