//! The device: sole owner of every GPU-visible object.
//!
//! All public handles address typed generational pools on the device. The
//! deduplication caches for passes, set layouts, pipeline layouts and
//! framebuffers live here too, created on demand and drained in a fixed
//! order at teardown. A single host thread drives the device; no counter is
//! atomic and no lock is taken.

use fnv::{FnvHashMap, FnvHashSet};

use crate::backend::{
    AcquireOutcome, BeginPassData, ComputePipelineDesc, FramebufferDesc, GpuBackend,
    GraphicsPipelineDesc, PassData, PresentOutcome, SetBufferWrite, SetImageWrite, SubmitData,
    SwapchainDesc, VariantDesc,
};
use crate::{hash, shader};
use crate::{
    Buffer, BufferCopy, BufferImageCopy, BufferInfo, BufferUsage, ColorComponents, CommandList,
    CommandPool, CommandPoolInfo, ComputePipelineInfo, DeviceBackend, DeviceInfo,
    DrawIndexedIndirectInfo, DrawIndexedInfo, DrawIndirectInfo, DrawInfo, Fence, Filter, Format,
    Framebuffer, Image, ImageBlit, ImageInfo, ImageLayout, ImageType, ImageUsage, IndexType,
    ObjectKind, Pass, PassBeginInfo, PassInfo, Pipeline, PipelineLayout, PipelineLayoutInfo,
    PipelineStages, PipelineInfo, QueueFamily, Queue, Rect, Rid, SampleCount, Semaphore, Set,
    SetBufferUpdate, SetImageUpdate, SetLayout, SetLayoutInfo, SetPool, SetPoolInfo, Shader,
    ShaderInfo, ShaderReflection, ShaderType, SubmitInfo, PIPELINE_LAYOUT_MAX_SETS,
    PUSH_CONSTANT_SIZE,
};
use crate::pool::Pool;

/// Everything `next_frame` hands back for the caller to wire into its
/// submits: the acquired swapchain image plus this frame's sync objects.
#[derive(Debug, Clone, Copy)]
pub struct FrameAcquire {
    pub image_index: u32,
    pub image_acquired: Semaphore,
    pub present_ready: Semaphore,
    pub frame_complete: Fence,
}

/// Live entry counts of the deduplication caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCounts {
    pub passes: usize,
    pub set_layouts: usize,
    pub pipeline_layouts: usize,
    pub framebuffers: usize,
}

struct BufferObj {
    rid: Rid,
    info: BufferInfo,
    mapped: bool,
}

struct ImageObj {
    rid: Rid,
    info: ImageInfo,
    /// Cache keys of every framebuffer that references this image; used to
    /// invalidate exactly those framebuffers when the image is destroyed.
    framebuffer_keys: FnvHashSet<u64>,
}

struct ShaderObj {
    rid: Rid,
    shader_type: ShaderType,
    reflection: ShaderReflection,
}

struct PassObj {
    rid: Rid,
    hash: u32,
    data: PassData,
}

struct FramebufferObj {
    rid: Rid,
    key: u64,
}

struct SetLayoutObj {
    rid: Rid,
    hash: u32,
    bindings: Vec<crate::SetBindingInfo>,
}

struct PipelineLayoutObj {
    rid: Rid,
    hash: u64,
    set_layouts: Vec<SetLayout>,
}

#[derive(Clone)]
struct VariantState {
    pass: Option<Pass>,
    depth_test_enabled: bool,
    color_write_masks: Vec<ColorComponents>,
    variant_hash: u64,
}

struct PipelineObj {
    rid: Rid,
    layout: PipelineLayout,
    is_compute: bool,
    variant: VariantState,
}

struct SetObj {
    rid: Rid,
    pool: SetPool,
}

struct SetPoolObj {
    rid: Rid,
    layout: SetLayout,
    max_sets: u32,
    sets: Vec<Set>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListState {
    Initial,
    Recording,
    Executable,
}

struct CurrentPass {
    data: PassData,
    hash: u32,
}

struct CommandListObj {
    rid: Rid,
    pool: CommandPool,
    state: ListState,
    current_pass: Option<CurrentPass>,
}

struct CommandPoolObj {
    rid: Rid,
    info: CommandPoolInfo,
    lists: Vec<CommandList>,
    // NOTE: not atomic, pools are single-threaded by contract.
    allocated: u64,
}

struct SemaphoreObj {
    rid: Rid,
}

struct FenceObj {
    rid: Rid,
}

struct QueueObj {
    family: QueueFamily,
}

#[derive(Clone, Copy)]
struct FrameSync {
    image_acquired: Semaphore,
    present_ready: Semaphore,
    frame_complete: Fence,
}

struct SwapchainData {
    desc: SwapchainDesc,
    images: Vec<Image>,
}

#[derive(Default)]
struct DedupCaches {
    passes: FnvHashMap<u32, Pass>,
    set_layouts: FnvHashMap<u32, SetLayout>,
    pipeline_layouts: FnvHashMap<u64, PipelineLayout>,
    framebuffers: FnvHashMap<u64, Framebuffer>,
}

pub struct Device {
    backend: Box<dyn GpuBackend>,
    info: DeviceInfo,
    headless: bool,
    // NOTE: not atomic, objects are created and destroyed from one thread.
    rid_counter: Rid,
    frame_index: u32,
    image_index: u32,
    swapchain_stale: bool,
    swapchain: Option<SwapchainData>,
    frames: Vec<FrameSync>,
    queue_graphics: Queue,
    queue_transfer: Queue,
    queue_compute: Queue,
    queue_present: Option<Queue>,
    caches: DedupCaches,

    semaphores: Pool<SemaphoreObj>,
    fences: Pool<FenceObj>,
    buffers: Pool<BufferObj>,
    images: Pool<ImageObj>,
    shaders: Pool<ShaderObj>,
    set_layouts: Pool<SetLayoutObj>,
    sets: Pool<SetObj>,
    set_pools: Pool<SetPoolObj>,
    passes: Pool<PassObj>,
    framebuffers: Pool<FramebufferObj>,
    pipeline_layouts: Pool<PipelineLayoutObj>,
    pipelines: Pool<PipelineObj>,
    command_lists: Pool<CommandListObj>,
    command_pools: Pool<CommandPoolObj>,
    queues: Pool<QueueObj>,
}

/// Scissor rectangles are clamped to non-negative origin with the extent
/// compensated; rectangles left without area are dropped.
pub(crate) fn clamp_scissor(scissor: Rect) -> Option<Rect> {
    let mut adjusted = scissor;
    if adjusted.x < 0.0 {
        adjusted.w += adjusted.x;
        adjusted.x = 0.0;
    }
    if adjusted.y < 0.0 {
        adjusted.h += adjusted.y;
        adjusted.y = 0.0;
    }
    if adjusted.w <= 0.0 || adjusted.h <= 0.0 {
        return None;
    }
    Some(adjusted)
}

impl Device {
    /// Creates a headless device: no surface, no swapchain, no present
    /// queue, no per-frame synchronization.
    #[cfg(feature = "vulkan")]
    pub fn new(info: &DeviceInfo) -> Result<Device, String> {
        match info.backend {
            DeviceBackend::Vulkan => {
                let backend = crate::vulkan::VulkanDevice::new_headless()?;
                Self::from_backend(Box::new(backend), info, true)
            }
            DeviceBackend::OpenGl => {
                Err("OpenGL devices require a context loader; use new_opengl".to_string())
            }
        }
    }

    /// Creates a windowed Vulkan device. `framebuffer_extent` is the
    /// window's current framebuffer size, used when the surface does not
    /// report an extent.
    #[cfg(feature = "vulkan")]
    pub fn new_windowed(
        info: &DeviceInfo,
        display: raw_window_handle::RawDisplayHandle,
        window: raw_window_handle::RawWindowHandle,
        framebuffer_extent: (u32, u32),
    ) -> Result<Device, String> {
        let backend =
            crate::vulkan::VulkanDevice::new_windowed(display, window, framebuffer_extent)?;
        Self::from_backend(Box::new(backend), info, false)
    }

    /// Creates an OpenGL device over an existing context. The context must
    /// be current on the calling thread for the device's whole lifetime.
    #[cfg(feature = "opengl")]
    pub fn new_opengl(
        info: &DeviceInfo,
        loader: &mut dyn FnMut(&str) -> *const std::ffi::c_void,
    ) -> Result<Device, String> {
        let backend = crate::gl::OpenGlDevice::new(loader)?;
        Self::from_backend(Box::new(backend), info, true)
    }

    fn from_backend(
        backend: Box<dyn GpuBackend>,
        info: &DeviceInfo,
        headless: bool,
    ) -> Result<Device, String> {
        let mut device = Device {
            backend,
            info: *info,
            headless,
            rid_counter: 0,
            frame_index: 0,
            image_index: 0,
            swapchain_stale: false,
            swapchain: None,
            frames: Vec::new(),
            queue_graphics: Queue(crate::Handle {
                index: 0,
                generation: 0,
            }),
            queue_transfer: Queue(crate::Handle {
                index: 0,
                generation: 0,
            }),
            queue_compute: Queue(crate::Handle {
                index: 0,
                generation: 0,
            }),
            queue_present: None,
            caches: DedupCaches::default(),
            semaphores: Pool::new(ObjectKind::Semaphore),
            fences: Pool::new(ObjectKind::Fence),
            buffers: Pool::new(ObjectKind::Buffer),
            images: Pool::new(ObjectKind::Image),
            shaders: Pool::new(ObjectKind::Shader),
            set_layouts: Pool::new(ObjectKind::SetLayout),
            sets: Pool::new(ObjectKind::Set),
            set_pools: Pool::new(ObjectKind::SetPool),
            passes: Pool::new(ObjectKind::Pass),
            framebuffers: Pool::new(ObjectKind::Framebuffer),
            pipeline_layouts: Pool::new(ObjectKind::PipelineLayout),
            pipelines: Pool::new(ObjectKind::Pipeline),
            command_lists: Pool::new(ObjectKind::CommandList),
            command_pools: Pool::new(ObjectKind::CommandPool),
            queues: Pool::new(ObjectKind::Queue),
        };

        device.queue_graphics = Queue(device.queues.insert(QueueObj {
            family: QueueFamily::Graphics,
        }));
        device.queue_transfer = Queue(device.queues.insert(QueueObj {
            family: QueueFamily::Transfer,
        }));
        device.queue_compute = Queue(device.queues.insert(QueueObj {
            family: QueueFamily::Compute,
        }));

        if !headless {
            device.queue_present = Some(Queue(device.queues.insert(QueueObj {
                family: QueueFamily::Present,
            })));
            device.build_swapchain()?;
            device.create_frame_sync()?;
        }

        Ok(device)
    }

    fn next_rid(&mut self) -> Rid {
        let rid = self.rid_counter;
        self.rid_counter += 1;
        rid
    }

    pub fn backend_kind(&self) -> DeviceBackend {
        self.backend.backend()
    }

    // ------------------------------------------------------------------
    // Synchronization primitives

    pub fn create_semaphore(&mut self) -> Result<Semaphore, String> {
        let rid = self.next_rid();
        let handle = self.semaphores.insert(SemaphoreObj { rid });
        if let Err(err) = self.backend.create_semaphore(handle.index) {
            self.semaphores.remove(handle);
            return Err(err);
        }
        Ok(Semaphore(handle))
    }

    pub fn destroy_semaphore(&mut self, semaphore: Semaphore) {
        self.semaphores.remove(semaphore.0);
        self.backend.destroy_semaphore(semaphore.0.index);
    }

    pub fn create_fence(&mut self, create_signaled: bool) -> Result<Fence, String> {
        let rid = self.next_rid();
        let handle = self.fences.insert(FenceObj { rid });
        if let Err(err) = self.backend.create_fence(handle.index, create_signaled) {
            self.fences.remove(handle);
            return Err(err);
        }
        Ok(Fence(handle))
    }

    pub fn destroy_fence(&mut self, fence: Fence) {
        self.fences.remove(fence.0);
        self.backend.destroy_fence(fence.0.index);
    }

    /// Blocks until the fence signals.
    pub fn wait_fence(&mut self, fence: Fence) -> Result<(), String> {
        let _ = self.fences.get(fence.0);
        self.backend.wait_fence(fence.0.index)
    }

    pub fn reset_fence(&mut self, fence: Fence) -> Result<(), String> {
        let _ = self.fences.get(fence.0);
        self.backend.reset_fence(fence.0.index)
    }

    pub fn semaphore_rid(&self, semaphore: Semaphore) -> Rid {
        self.semaphores.get(semaphore.0).rid
    }

    pub fn fence_rid(&self, fence: Fence) -> Rid {
        self.fences.get(fence.0).rid
    }

    // ------------------------------------------------------------------
    // Buffers

    pub fn create_buffer(&mut self, info: &BufferInfo) -> Result<Buffer, String> {
        let rid = self.next_rid();
        let handle = self.buffers.insert(BufferObj {
            rid,
            info: *info,
            mapped: false,
        });
        if let Err(err) = self.backend.create_buffer(handle.index, info) {
            self.buffers.remove(handle);
            return Err(err);
        }
        Ok(Buffer(handle))
    }

    pub fn destroy_buffer(&mut self, buffer: Buffer) {
        self.buffers.remove(buffer.0);
        self.backend.destroy_buffer(buffer.0.index);
    }

    pub fn buffer_size(&self, buffer: Buffer) -> u64 {
        self.buffers.get(buffer.0).info.size
    }

    pub fn buffer_usage(&self, buffer: Buffer) -> BufferUsage {
        self.buffers.get(buffer.0).info.usage
    }

    pub fn buffer_rid(&self, buffer: Buffer) -> Rid {
        self.buffers.get(buffer.0).rid
    }

    /// Takes the buffer's exclusive host mapping.
    pub fn buffer_map(&mut self, buffer: Buffer) -> Result<(), String> {
        let obj = self.buffers.get_mut(buffer.0);
        debug_assert!(obj.info.host_visible, "mapping a device-local buffer");
        debug_assert!(!obj.mapped, "buffer is already mapped");
        obj.mapped = true;
        self.backend.map_buffer(buffer.0.index)
    }

    /// Returns a view into the mapping. The caller must read it before
    /// `buffer_unmap`.
    pub fn buffer_map_read(&self, buffer: Buffer, offset: u64, size: u64) -> &[u8] {
        let obj = self.buffers.get(buffer.0);
        debug_assert!(obj.mapped, "buffer is not mapped");
        debug_assert!(offset + size <= obj.info.size, "map read out of range");
        self.backend.map_read(buffer.0.index, offset, size)
    }

    pub fn buffer_map_write(&mut self, buffer: Buffer, offset: u64, data: &[u8]) {
        let obj = self.buffers.get(buffer.0);
        debug_assert!(obj.mapped, "buffer is not mapped");
        debug_assert!(
            offset + data.len() as u64 <= obj.info.size,
            "map write out of range"
        );
        self.backend.map_write(buffer.0.index, offset, data);
    }

    pub fn buffer_unmap(&mut self, buffer: Buffer) {
        let obj = self.buffers.get_mut(buffer.0);
        debug_assert!(obj.mapped, "buffer is not mapped");
        obj.mapped = false;
        self.backend.unmap_buffer(buffer.0.index);
    }

    // ------------------------------------------------------------------
    // Images

    pub fn create_image(&mut self, info: &ImageInfo) -> Result<Image, String> {
        debug_assert!(
            !(info.image_type == ImageType::D2 && info.layers != 1),
            "2D images require layers == 1"
        );
        debug_assert!(
            !(info.image_type == ImageType::Cube && info.layers != 6),
            "cube images require layers == 6"
        );

        let rid = self.next_rid();
        let handle = self.images.insert(ImageObj {
            rid,
            info: *info,
            framebuffer_keys: FnvHashSet::default(),
        });
        if let Err(err) = self.backend.create_image(handle.index, info) {
            self.images.remove(handle);
            return Err(err);
        }
        Ok(Image(handle))
    }

    /// Destroys the image. Any cached framebuffer referencing it is
    /// destroyed first, behind a device-wide wait.
    pub fn destroy_image(&mut self, image: Image) {
        let obj = self.images.remove(image.0);

        if !obj.framebuffer_keys.is_empty() {
            let _ = self.backend.wait_idle();

            for key in obj.framebuffer_keys {
                if let Some(framebuffer) = self.caches.framebuffers.remove(&key) {
                    self.framebuffers.remove(framebuffer.0);
                    self.backend.destroy_framebuffer(framebuffer.0.index);
                }
            }
        }

        self.backend.destroy_image(image.0.index);
    }

    pub fn image_info(&self, image: Image) -> &ImageInfo {
        &self.images.get(image.0).info
    }

    pub fn image_rid(&self, image: Image) -> Rid {
        self.images.get(image.0).rid
    }

    /// Total byte size of the image's texel data.
    pub fn image_size(&self, image: Image) -> u64 {
        let info = &self.images.get(image.0).info;
        let layer_size = info.width as u64 * info.height as u64 * info.depth as u64;
        info.layers as u64 * layer_size * info.format.texel_size() as u64
    }

    // ------------------------------------------------------------------
    // Shaders

    /// Compiles GLSL to SPIR-V and creates the shader. On compile failure
    /// no object is produced and the toolchain log is returned.
    pub fn create_shader(&mut self, info: &ShaderInfo) -> Result<Shader, String> {
        let (spirv, reflection) = shader::compile_to_spirv(info.shader_type, info.source)?;

        let rid = self.next_rid();
        let handle = self.shaders.insert(ShaderObj {
            rid,
            shader_type: info.shader_type,
            reflection,
        });
        if let Err(err) = self
            .backend
            .create_shader(handle.index, info.shader_type, &spirv)
        {
            self.shaders.remove(handle);
            return Err(err);
        }
        Ok(Shader(handle))
    }

    pub fn destroy_shader(&mut self, shader: Shader) {
        self.shaders.remove(shader.0);
        self.backend.destroy_shader(shader.0.index);
    }

    pub fn shader_reflection(&self, shader: Shader) -> &ShaderReflection {
        &self.shaders.get(shader.0).reflection
    }

    // ------------------------------------------------------------------
    // Dedup-cached objects: passes, set layouts, pipeline layouts

    /// Returns the cached pass for this description, creating it on first
    /// use. Equal descriptions share one pass object.
    pub fn create_pass(&mut self, info: &PassInfo) -> Result<Pass, String> {
        if let Some(resolves) = info.color_resolve_attachments {
            debug_assert_eq!(
                resolves.len(),
                info.color_attachments.len(),
                "resolve attachments must match color attachments"
            );
        }

        let pass_hash = hash::hash32_pass_info(info);
        if let Some(&pass) = self.caches.passes.get(&pass_hash) {
            return Ok(pass);
        }

        let data = PassData::from_info(info);
        let rid = self.next_rid();
        let handle = self.passes.insert(PassObj {
            rid,
            hash: pass_hash,
            data: data.clone(),
        });
        if let Err(err) = self.backend.create_pass(handle.index, &data) {
            self.passes.remove(handle);
            return Err(err);
        }
        self.caches.passes.insert(pass_hash, Pass(handle));
        Ok(Pass(handle))
    }

    pub fn create_set_layout(&mut self, info: &SetLayoutInfo) -> Result<SetLayout, String> {
        let layout_hash = hash::hash32_set_layout_info(info);
        if let Some(&layout) = self.caches.set_layouts.get(&layout_hash) {
            return Ok(layout);
        }

        let rid = self.next_rid();
        let handle = self.set_layouts.insert(SetLayoutObj {
            rid,
            hash: layout_hash,
            bindings: info.bindings.to_vec(),
        });
        if let Err(err) = self.backend.create_set_layout(handle.index, info.bindings) {
            self.set_layouts.remove(handle);
            return Err(err);
        }
        self.caches.set_layouts.insert(layout_hash, SetLayout(handle));
        Ok(SetLayout(handle))
    }

    pub fn create_pipeline_layout(
        &mut self,
        info: &PipelineLayoutInfo,
    ) -> Result<PipelineLayout, String> {
        debug_assert!(
            info.set_layouts.len() <= PIPELINE_LAYOUT_MAX_SETS,
            "too many set layouts in a pipeline layout"
        );

        let layout_hash = hash::hash64_pipeline_layout_info(info);
        if let Some(&layout) = self.caches.pipeline_layouts.get(&layout_hash) {
            return Ok(layout);
        }

        let set_layouts: Vec<SetLayout> = info
            .set_layouts
            .iter()
            .map(|layout| self.create_set_layout(layout))
            .collect::<Result<_, _>>()?;
        let set_layout_slots: Vec<u32> = set_layouts.iter().map(|layout| layout.0.index).collect();
        let rid = self.next_rid();
        let set_layout_bindings: Vec<&[crate::SetBindingInfo]> = set_layouts
            .iter()
            .map(|layout| self.set_layouts.get(layout.0).bindings.as_slice())
            .collect();

        let obj = PipelineLayoutObj {
            rid,
            hash: layout_hash,
            set_layouts: set_layouts.clone(),
        };
        let handle = self.pipeline_layouts.insert(obj);
        if let Err(err) = self.backend.create_pipeline_layout(
            handle.index,
            &set_layout_slots,
            &set_layout_bindings,
        ) {
            self.pipeline_layouts.remove(handle);
            return Err(err);
        }
        self.caches
            .pipeline_layouts
            .insert(layout_hash, PipelineLayout(handle));
        Ok(PipelineLayout(handle))
    }

    pub fn pass_hash(&self, pass: Pass) -> u32 {
        self.passes.get(pass.0).hash
    }

    pub fn set_layout_hash(&self, layout: SetLayout) -> u32 {
        self.set_layouts.get(layout.0).hash
    }

    pub fn pipeline_layout_hash(&self, layout: PipelineLayout) -> u64 {
        self.pipeline_layouts.get(layout.0).hash
    }

    pub fn cache_counts(&self) -> CacheCounts {
        CacheCounts {
            passes: self.caches.passes.len(),
            set_layouts: self.caches.set_layouts.len(),
            pipeline_layouts: self.caches.pipeline_layouts.len(),
            framebuffers: self.caches.framebuffers.len(),
        }
    }

    // ------------------------------------------------------------------
    // Descriptor sets

    pub fn create_set_pool(&mut self, info: &SetPoolInfo) -> Result<SetPool, String> {
        let layout = self.create_set_layout(&info.layout)?;

        let rid = self.next_rid();
        let handle = self.set_pools.insert(SetPoolObj {
            rid,
            layout,
            max_sets: info.max_sets,
            sets: Vec::new(),
        });
        let bindings = self.set_layouts.get(layout.0).bindings.clone();
        if let Err(err) =
            self.backend
                .create_set_pool(handle.index, layout.0.index, &bindings, info.max_sets)
        {
            self.set_pools.remove(handle);
            return Err(err);
        }
        Ok(SetPool(handle))
    }

    pub fn destroy_set_pool(&mut self, pool: SetPool) {
        let obj = self.set_pools.remove(pool.0);
        for set in obj.sets {
            self.sets.remove(set.0);
        }
        self.backend.destroy_set_pool(pool.0.index);
    }

    /// Carves one set out of the pool. Fails when the pool is exhausted.
    pub fn set_pool_allocate(&mut self, pool: SetPool) -> Result<Set, String> {
        let obj = self.set_pools.get(pool.0);
        if obj.sets.len() as u32 >= obj.max_sets {
            return Err("set pool exhausted".to_string());
        }

        let rid = self.next_rid();
        let handle = self.sets.insert(SetObj { rid, pool });
        if let Err(err) = self.backend.allocate_set(pool.0.index, handle.index) {
            self.sets.remove(handle);
            return Err(err);
        }
        self.set_pools.get_mut(pool.0).sets.push(Set(handle));
        Ok(Set(handle))
    }

    /// Invalidates every set allocated from the pool.
    pub fn set_pool_reset(&mut self, pool: SetPool) -> Result<(), String> {
        self.backend.reset_set_pool(pool.0.index)?;
        let sets = std::mem::take(&mut self.set_pools.get_mut(pool.0).sets);
        for set in sets {
            self.sets.remove(set.0);
        }
        Ok(())
    }

    pub fn update_set_images(&mut self, updates: &[SetImageUpdate]) {
        if updates.is_empty() {
            return;
        }
        let writes: Vec<SetImageWrite> = updates
            .iter()
            .map(|update| {
                debug_assert_eq!(
                    update.images.len(),
                    update.image_layouts.len(),
                    "image/layout count mismatch"
                );
                let _ = self.sets.get(update.set.0);
                SetImageWrite {
                    set_slot: update.set.0.index,
                    dst_binding: update.dst_binding,
                    dst_array_index: update.dst_array_index,
                    binding_type: update.image_binding_type,
                    images: update
                        .images
                        .iter()
                        .zip(update.image_layouts)
                        .map(|(image, &layout)| (image.0.index, layout))
                        .collect(),
                }
            })
            .collect();
        self.backend.update_set_images(&writes);
    }

    pub fn update_set_buffers(&mut self, updates: &[SetBufferUpdate]) {
        if updates.is_empty() {
            return;
        }
        let writes: Vec<SetBufferWrite> = updates
            .iter()
            .map(|update| SetBufferWrite {
                set_slot: update.set.0.index,
                dst_binding: update.dst_binding,
                dst_array_index: update.dst_array_index,
                binding_type: update.buffer_binding_type,
                buffers: update
                    .buffers
                    .iter()
                    .map(|buffer| buffer.0.index)
                    .collect(),
            })
            .collect();
        self.backend.update_set_buffers(&writes);
    }

    // ------------------------------------------------------------------
    // Pipelines

    /// Creates a graphics pipeline template. The native pipeline for a
    /// given render pass and write-mask combination is built lazily at the
    /// first bind inside that pass.
    pub fn create_pipeline(&mut self, info: &PipelineInfo) -> Result<Pipeline, String> {
        let layout = self.create_pipeline_layout(&info.layout)?;

        let shader_slots: Vec<(ShaderType, u32)> = info
            .shaders
            .iter()
            .map(|shader| {
                (
                    self.shaders.get(shader.0).shader_type,
                    shader.0.index,
                )
            })
            .collect();

        let rid = self.next_rid();
        let handle = self.pipelines.insert(PipelineObj {
            rid,
            layout,
            is_compute: false,
            variant: VariantState {
                pass: None,
                depth_test_enabled: info.depth_stencil.depth_test_enabled,
                color_write_masks: vec![
                    ColorComponents::RGBA;
                    info.blend.color_attachments.len()
                ],
                variant_hash: 0,
            },
        });

        let desc = GraphicsPipelineDesc {
            shader_slots,
            layout_slot: layout.0.index,
            vertex_attributes: info.vertex_attributes.to_vec(),
            vertex_bindings: info.vertex_bindings.to_vec(),
            primitive_topology: info.primitive_topology,
            rasterization: info.rasterization,
            depth_stencil: info.depth_stencil,
            blend_states: info.blend.color_attachments.to_vec(),
        };
        if let Err(err) = self.backend.create_pipeline(handle.index, &desc) {
            self.pipelines.remove(handle);
            return Err(err);
        }
        Ok(Pipeline(handle))
    }

    /// Compute pipelines are built eagerly; their single variant is keyed
    /// at 0.
    pub fn create_compute_pipeline(
        &mut self,
        info: &ComputePipelineInfo,
    ) -> Result<Pipeline, String> {
        let layout = self.create_pipeline_layout(&info.layout)?;

        let rid = self.next_rid();
        let handle = self.pipelines.insert(PipelineObj {
            rid,
            layout,
            is_compute: true,
            variant: VariantState {
                pass: None,
                depth_test_enabled: false,
                color_write_masks: Vec::new(),
                variant_hash: 0,
            },
        });

        let desc = ComputePipelineDesc {
            shader_slot: info.shader.0.index,
            layout_slot: layout.0.index,
        };
        if let Err(err) = self.backend.create_compute_pipeline(handle.index, &desc) {
            self.pipelines.remove(handle);
            return Err(err);
        }
        Ok(Pipeline(handle))
    }

    pub fn destroy_pipeline(&mut self, pipeline: Pipeline) {
        self.pipelines.remove(pipeline.0);
        self.backend.destroy_pipeline(pipeline.0.index);
    }

    /// Changes one attachment's color write mask. The next bind finds or
    /// builds a matching variant.
    pub fn pipeline_set_color_write_mask(
        &mut self,
        pipeline: Pipeline,
        index: u32,
        mask: ColorComponents,
    ) {
        let obj = self.pipelines.get_mut(pipeline.0);
        debug_assert!(
            (index as usize) < obj.variant.color_write_masks.len(),
            "color write mask index out of range"
        );
        obj.variant.color_write_masks[index as usize] = mask;
    }

    /// Toggles the depth test. This is dynamic command-buffer state; it
    /// never forces a new variant.
    pub fn pipeline_set_depth_test_enable(&mut self, pipeline: Pipeline, enable: bool) {
        self.pipelines.get_mut(pipeline.0).variant.depth_test_enabled = enable;
    }

    pub fn pipeline_variant_count(&self, pipeline: Pipeline) -> usize {
        let _ = self.pipelines.get(pipeline.0);
        self.backend.pipeline_variant_count(pipeline.0.index)
    }

    pub fn pipeline_variant_hash(&self, pipeline: Pipeline) -> u64 {
        self.pipelines.get(pipeline.0).variant.variant_hash
    }

    // ------------------------------------------------------------------
    // Command pools and lists

    pub fn create_command_pool(&mut self, info: &CommandPoolInfo) -> Result<CommandPool, String> {
        let rid = self.next_rid();
        let handle = self.command_pools.insert(CommandPoolObj {
            rid,
            info: *info,
            lists: Vec::new(),
            allocated: 0,
        });
        if let Err(err) = self.backend.create_command_pool(handle.index, info) {
            self.command_pools.remove(handle);
            return Err(err);
        }
        Ok(CommandPool(handle))
    }

    pub fn destroy_command_pool(&mut self, pool: CommandPool) {
        let obj = self.command_pools.remove(pool.0);
        let mut list_slots = Vec::with_capacity(obj.lists.len());
        for list in obj.lists {
            list_slots.push(list.0.index);
            self.command_lists.remove(list.0);
        }
        self.backend.destroy_command_pool(pool.0.index, &list_slots);
    }

    pub fn command_pool_allocate(&mut self, pool: CommandPool) -> Result<CommandList, String> {
        let rid = self.next_rid();
        let handle = self.command_lists.insert(CommandListObj {
            rid,
            pool,
            state: ListState::Initial,
            current_pass: None,
        });
        if let Err(err) = self.backend.allocate_command_list(pool.0.index, handle.index) {
            self.command_lists.remove(handle);
            return Err(err);
        }
        let obj = self.command_pools.get_mut(pool.0);
        obj.lists.push(CommandList(handle));
        obj.allocated += 1;
        Ok(CommandList(handle))
    }

    /// Returns every list to the initial state and reclaims their storage.
    pub fn command_pool_reset(&mut self, pool: CommandPool) -> Result<(), String> {
        let list_slots: Vec<u32> = self
            .command_pools
            .get(pool.0)
            .lists
            .iter()
            .map(|list| list.0.index)
            .collect();
        self.backend.reset_command_pool(pool.0.index, &list_slots)?;

        let lists = self.command_pools.get(pool.0).lists.clone();
        for list in lists {
            let obj = self.command_lists.get_mut(list.0);
            obj.state = ListState::Initial;
            obj.current_pass = None;
        }
        Ok(())
    }

    pub fn begin_list(&mut self, list: CommandList) -> Result<(), String> {
        let obj = self.command_lists.get_mut(list.0);
        debug_assert_ne!(obj.state, ListState::Recording, "list is already recording");
        obj.state = ListState::Recording;
        obj.current_pass = None;
        self.backend.begin_list(list.0.index, false)
    }

    pub fn end_list(&mut self, list: CommandList) -> Result<(), String> {
        let obj = self.command_lists.get_mut(list.0);
        debug_assert_eq!(obj.state, ListState::Recording, "list is not recording");
        obj.state = ListState::Executable;
        self.backend.end_list(list.0.index)
    }

    /// Resets a single list. Requires the pool's resettable flag.
    pub fn reset_list(&mut self, list: CommandList) -> Result<(), String> {
        let pool = self.command_lists.get(list.0).pool;
        debug_assert!(
            self.command_pools.get(pool.0).info.list_resettable,
            "list reset requires a resettable pool"
        );
        let obj = self.command_lists.get_mut(list.0);
        obj.state = ListState::Initial;
        obj.current_pass = None;
        self.backend.reset_list(list.0.index)
    }

    // ------------------------------------------------------------------
    // Command recording

    fn assert_recording(&self, list: CommandList) {
        debug_assert_eq!(
            self.command_lists.get(list.0).state,
            ListState::Recording,
            "command recorded outside begin/end"
        );
    }

    /// Begins a pass, deriving the framebuffer from the attachments'
    /// identities. The framebuffer is cached and registered on every
    /// referenced image for invalidation.
    pub fn cmd_begin_pass(&mut self, list: CommandList, begin: &PassBeginInfo) -> Result<(), String> {
        self.assert_recording(list);
        debug_assert_eq!(
            begin.color_attachments.len(),
            begin.pass.color_attachments.len(),
            "attachment count mismatch"
        );

        let pass = self.create_pass(&begin.pass)?;
        let pass_hash = self.passes.get(pass.0).hash;

        let color_rids: Vec<Rid> = begin
            .color_attachments
            .iter()
            .map(|image| self.images.get(image.0).rid)
            .collect();
        let resolve_rids: Option<Vec<Rid>> = begin.color_resolve_attachments.map(|images| {
            images
                .iter()
                .map(|image| self.images.get(image.0).rid)
                .collect()
        });
        let depth_rid = begin
            .depth_stencil_attachment
            .map(|image| self.images.get(image.0).rid);

        let key = hash::hash64_framebuffer(
            pass_hash,
            begin.width,
            begin.height,
            &color_rids,
            resolve_rids.as_deref(),
            depth_rid,
        );

        let framebuffer = match self.caches.framebuffers.get(&key) {
            Some(&framebuffer) => framebuffer,
            None => self.create_framebuffer(key, pass, begin)?,
        };

        let data = PassData::from_info(&begin.pass);
        let begin_data = BeginPassData {
            width: begin.width,
            height: begin.height,
            pass_slot: pass.0.index,
            framebuffer_slot: framebuffer.0.index,
            color_load_ops: begin
                .pass
                .color_attachments
                .iter()
                .map(|attachment| attachment.color_load_op)
                .collect(),
            clear_colors: begin.clear_colors.to_vec(),
            depth_load_op: begin
                .pass
                .depth_stencil_attachment
                .map(|attachment| attachment.depth_load_op),
            clear_depth_stencil: begin.clear_depth_stencil,
        };

        let obj = self.command_lists.get_mut(list.0);
        obj.current_pass = Some(CurrentPass {
            data,
            hash: pass_hash,
        });

        self.backend.cmd_begin_pass(list.0.index, begin_data);
        Ok(())
    }

    fn create_framebuffer(
        &mut self,
        key: u64,
        pass: Pass,
        begin: &PassBeginInfo,
    ) -> Result<Framebuffer, String> {
        let rid = self.next_rid();
        let handle = self.framebuffers.insert(FramebufferObj { rid, key });

        let desc = FramebufferDesc {
            pass_slot: pass.0.index,
            width: begin.width,
            height: begin.height,
            color_slots: begin
                .color_attachments
                .iter()
                .map(|image| image.0.index)
                .collect(),
            resolve_slots: begin
                .color_resolve_attachments
                .map(|images| images.iter().map(|image| image.0.index).collect())
                .unwrap_or_default(),
            depth_stencil_slot: begin.depth_stencil_attachment.map(|image| image.0.index),
        };
        if let Err(err) = self.backend.create_framebuffer(handle.index, &desc) {
            self.framebuffers.remove(handle);
            return Err(err);
        }
        self.caches.framebuffers.insert(key, Framebuffer(handle));

        for image in begin.color_attachments {
            self.images.get_mut(image.0).framebuffer_keys.insert(key);
        }
        if let Some(resolves) = begin.color_resolve_attachments {
            for image in resolves {
                self.images.get_mut(image.0).framebuffer_keys.insert(key);
            }
        }
        if let Some(image) = begin.depth_stencil_attachment {
            self.images.get_mut(image.0).framebuffer_keys.insert(key);
        }

        Ok(Framebuffer(handle))
    }

    pub fn cmd_end_pass(&mut self, list: CommandList) {
        self.assert_recording(list);
        self.backend.cmd_end_pass(list.0.index);
    }

    /// Binds the graphics pipeline, resolving (and lazily building) the
    /// variant for the pass the list is currently inside.
    pub fn cmd_bind_graphics_pipeline(
        &mut self,
        list: CommandList,
        pipeline: Pipeline,
    ) -> Result<(), String> {
        self.assert_recording(list);

        let current = self.command_lists.get(list.0).current_pass.as_ref();
        let (pass_data, pass_hash) = match current {
            Some(current) => (current.data.clone(), current.hash),
            None => return Err("graphics pipeline bound outside a pass".to_string()),
        };
        let pass = self.create_pass(&pass_data.as_info())?;

        let obj = self.pipelines.get_mut(pipeline.0);
        debug_assert!(!obj.is_compute, "compute pipeline bound as graphics");
        obj.variant.pass = Some(pass);
        let variant_hash =
            hash::hash64_pipeline_variant(pass_hash, &obj.variant.color_write_masks);
        obj.variant.variant_hash = variant_hash;
        let masks = obj.variant.color_write_masks.clone();
        let depth_test = obj.variant.depth_test_enabled;

        let desc = VariantDesc {
            variant_hash,
            pass_slot: pass.0.index,
            samples: pass_data.samples.unwrap_or(SampleCount::X1),
            color_write_masks: masks.clone(),
        };
        self.backend
            .create_pipeline_variant(pipeline.0.index, &desc)?;

        self.backend.cmd_bind_graphics_pipeline(
            list.0.index,
            pipeline.0.index,
            variant_hash,
            depth_test,
            &masks,
        );
        Ok(())
    }

    pub fn cmd_bind_compute_pipeline(&mut self, list: CommandList, pipeline: Pipeline) {
        self.assert_recording(list);
        debug_assert!(
            self.pipelines.get(pipeline.0).is_compute,
            "graphics pipeline bound as compute"
        );
        self.backend
            .cmd_bind_compute_pipeline(list.0.index, pipeline.0.index);
    }

    pub fn cmd_bind_graphics_sets(
        &mut self,
        list: CommandList,
        layout: &PipelineLayoutInfo,
        first_set: u32,
        sets: &[Set],
    ) -> Result<(), String> {
        self.assert_recording(list);
        let layout = self.create_pipeline_layout(layout)?;
        let set_slots: Vec<u32> = sets.iter().map(|set| set.0.index).collect();
        self.backend
            .cmd_bind_graphics_sets(list.0.index, layout.0.index, first_set, &set_slots);
        Ok(())
    }

    pub fn cmd_bind_compute_sets(
        &mut self,
        list: CommandList,
        layout: &PipelineLayoutInfo,
        first_set: u32,
        sets: &[Set],
    ) -> Result<(), String> {
        self.assert_recording(list);
        let layout = self.create_pipeline_layout(layout)?;
        let set_slots: Vec<u32> = sets.iter().map(|set| set.0.index).collect();
        self.backend
            .cmd_bind_compute_sets(list.0.index, layout.0.index, first_set, &set_slots);
        Ok(())
    }

    /// Pushes into the implicit 128-byte constant range shared by all
    /// stages.
    pub fn cmd_push_constant(
        &mut self,
        list: CommandList,
        layout: &PipelineLayoutInfo,
        offset: u32,
        data: &[u8],
    ) -> Result<(), String> {
        self.assert_recording(list);
        debug_assert!(
            offset + data.len() as u32 <= PUSH_CONSTANT_SIZE,
            "push constant write out of range"
        );
        let layout = self.create_pipeline_layout(layout)?;
        self.backend
            .cmd_push_constant(list.0.index, layout.0.index, offset, data);
        Ok(())
    }

    pub fn cmd_bind_vertex_buffers(
        &mut self,
        list: CommandList,
        first_binding: u32,
        buffers: &[Buffer],
    ) {
        self.assert_recording(list);
        for buffer in buffers {
            debug_assert!(
                self.buffers
                    .get(buffer.0)
                    .info
                    .usage
                    .contains(BufferUsage::VERTEX),
                "buffer lacks VERTEX usage"
            );
        }
        let buffer_slots: Vec<u32> = buffers.iter().map(|buffer| buffer.0.index).collect();
        self.backend
            .cmd_bind_vertex_buffers(list.0.index, first_binding, &buffer_slots);
    }

    pub fn cmd_bind_index_buffer(
        &mut self,
        list: CommandList,
        buffer: Buffer,
        index_type: IndexType,
    ) {
        self.assert_recording(list);
        debug_assert!(
            self.buffers
                .get(buffer.0)
                .info
                .usage
                .contains(BufferUsage::INDEX),
            "buffer lacks INDEX usage"
        );
        self.backend
            .cmd_bind_index_buffer(list.0.index, buffer.0.index, index_type);
    }

    /// Sets the scissor rectangle, clamped to non-negative origin. A
    /// rectangle without area is dropped.
    pub fn cmd_set_scissor(&mut self, list: CommandList, scissor: Rect) {
        self.assert_recording(list);
        let Some(adjusted) = clamp_scissor(scissor) else {
            return;
        };
        self.backend.cmd_set_scissor(list.0.index, adjusted);
    }

    pub fn cmd_draw(&mut self, list: CommandList, draw: &DrawInfo) {
        self.assert_recording(list);
        self.backend.cmd_draw(list.0.index, *draw);
    }

    pub fn cmd_draw_indexed(&mut self, list: CommandList, draw: &DrawIndexedInfo) {
        self.assert_recording(list);
        self.backend.cmd_draw_indexed(list.0.index, *draw);
    }

    pub fn cmd_draw_indirect(&mut self, list: CommandList, draw: &DrawIndirectInfo) {
        self.assert_recording(list);
        debug_assert!(
            self.buffers
                .get(draw.indirect_buffer.0)
                .info
                .usage
                .contains(BufferUsage::INDIRECT),
            "buffer lacks INDIRECT usage"
        );
        self.backend.cmd_draw_indirect(
            list.0.index,
            draw.indirect_buffer.0.index,
            draw.offset,
            draw.info_count,
            draw.stride,
        );
    }

    pub fn cmd_draw_indexed_indirect(&mut self, list: CommandList, draw: &DrawIndexedIndirectInfo) {
        self.assert_recording(list);
        debug_assert!(
            self.buffers
                .get(draw.indirect_buffer.0)
                .info
                .usage
                .contains(BufferUsage::INDIRECT),
            "buffer lacks INDIRECT usage"
        );
        self.backend.cmd_draw_indexed_indirect(
            list.0.index,
            draw.indirect_buffer.0.index,
            draw.offset,
            draw.info_count,
            draw.stride,
        );
    }

    pub fn cmd_dispatch(&mut self, list: CommandList, x: u32, y: u32, z: u32) {
        self.assert_recording(list);
        self.backend.cmd_dispatch(list.0.index, x, y, z);
    }

    pub fn cmd_buffer_memory_barrier(
        &mut self,
        list: CommandList,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barrier: &crate::BufferMemoryBarrier,
    ) {
        self.assert_recording(list);
        self.backend.cmd_buffer_memory_barrier(
            list.0.index,
            src_stages,
            dst_stages,
            barrier.buffer.0.index,
            barrier.src_access,
            barrier.dst_access,
        );
    }

    pub fn cmd_image_memory_barrier(
        &mut self,
        list: CommandList,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
        barrier: &crate::ImageMemoryBarrier,
    ) {
        self.assert_recording(list);
        self.backend.cmd_image_memory_barrier(
            list.0.index,
            src_stages,
            dst_stages,
            barrier.image.0.index,
            barrier.old_layout,
            barrier.new_layout,
            barrier.src_access,
            barrier.dst_access,
        );
    }

    pub fn cmd_copy_buffer(
        &mut self,
        list: CommandList,
        src: Buffer,
        dst: Buffer,
        regions: &[BufferCopy],
    ) {
        self.assert_recording(list);
        debug_assert!(
            self.buffers
                .get(src.0)
                .info
                .usage
                .contains(BufferUsage::TRANSFER_SRC),
            "source lacks TRANSFER_SRC usage"
        );
        debug_assert!(
            self.buffers
                .get(dst.0)
                .info
                .usage
                .contains(BufferUsage::TRANSFER_DST),
            "destination lacks TRANSFER_DST usage"
        );
        self.backend
            .cmd_copy_buffer(list.0.index, src.0.index, dst.0.index, regions);
    }

    pub fn cmd_copy_buffer_to_image(
        &mut self,
        list: CommandList,
        src: Buffer,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.assert_recording(list);
        debug_assert!(
            self.buffers
                .get(src.0)
                .info
                .usage
                .contains(BufferUsage::TRANSFER_SRC),
            "source lacks TRANSFER_SRC usage"
        );
        debug_assert!(
            self.images
                .get(dst.0)
                .info
                .usage
                .contains(ImageUsage::TRANSFER_DST),
            "destination lacks TRANSFER_DST usage"
        );
        self.backend.cmd_copy_buffer_to_image(
            list.0.index,
            src.0.index,
            dst.0.index,
            dst_layout,
            regions,
        );
    }

    pub fn cmd_copy_image_to_buffer(
        &mut self,
        list: CommandList,
        src: Image,
        src_layout: ImageLayout,
        dst: Buffer,
        regions: &[BufferImageCopy],
    ) {
        self.assert_recording(list);
        debug_assert!(
            self.images
                .get(src.0)
                .info
                .usage
                .contains(ImageUsage::TRANSFER_SRC),
            "source lacks TRANSFER_SRC usage"
        );
        debug_assert!(
            self.buffers
                .get(dst.0)
                .info
                .usage
                .contains(BufferUsage::TRANSFER_DST),
            "destination lacks TRANSFER_DST usage"
        );
        self.backend.cmd_copy_image_to_buffer(
            list.0.index,
            src.0.index,
            src_layout,
            dst.0.index,
            regions,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn cmd_blit_image(
        &mut self,
        list: CommandList,
        src: Image,
        src_layout: ImageLayout,
        dst: Image,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        self.assert_recording(list);
        self.backend.cmd_blit_image(
            list.0.index,
            src.0.index,
            src_layout,
            dst.0.index,
            dst_layout,
            regions,
            filter,
        );
    }

    // ------------------------------------------------------------------
    // Queues

    pub fn get_graphics_queue(&self) -> Queue {
        self.queue_graphics
    }

    pub fn get_transfer_queue(&self) -> Queue {
        self.queue_transfer
    }

    pub fn get_compute_queue(&self) -> Queue {
        self.queue_compute
    }

    pub fn queue_submit(
        &mut self,
        queue: Queue,
        submit: &SubmitInfo,
        fence: Option<Fence>,
    ) -> Result<(), String> {
        debug_assert_eq!(
            submit.waits.len(),
            submit.wait_stages.len(),
            "wait stages must match wait semaphores"
        );
        debug_assert!(
            fence.map_or(true, |fence| self.fences.contains(fence.0)),
            "submit fence was destroyed"
        );

        let family = self.queues.get(queue.0).family;
        let data = SubmitData {
            wait_slots: submit.waits.iter().map(|s| s.0.index).collect(),
            wait_stages: submit.wait_stages.to_vec(),
            list_slots: submit
                .lists
                .iter()
                .map(|list| {
                    debug_assert_eq!(
                        self.command_lists.get(list.0).state,
                        ListState::Executable,
                        "submitted list was not ended"
                    );
                    list.0.index
                })
                .collect(),
            signal_slots: submit.signals.iter().map(|s| s.0.index).collect(),
            fence_slot: fence.map(|fence| fence.0.index),
        };
        self.backend.queue_submit(family, &data)
    }

    pub fn queue_wait_idle(&mut self, queue: Queue) -> Result<(), String> {
        let family = self.queues.get(queue.0).family;
        self.backend.queue_wait_idle(family)
    }

    pub fn wait_idle(&mut self) -> Result<(), String> {
        self.backend.wait_idle()
    }

    // ------------------------------------------------------------------
    // Frame driver

    /// Advances to the next frame generation, waits for its previous use
    /// to complete, and acquires a swapchain image. An out-of-date or
    /// suboptimal swapchain is rebuilt and the acquire retried once.
    pub fn next_frame(&mut self) -> Result<FrameAcquire, String> {
        if self.headless {
            return Err("headless device has no frame driver".to_string());
        }

        self.frame_index = (self.frame_index + 1) % self.frames.len() as u32;

        let frame = self.frames[self.frame_index as usize];
        self.backend.wait_fence(frame.frame_complete.0.index)?;

        if self.swapchain_stale {
            // A previous present reported the swapchain stale.
            self.invalidate_swapchain()?;
            self.swapchain_stale = false;
        }

        let frame = self.frames[self.frame_index as usize];
        let mut outcome = self.backend.acquire_image(frame.image_acquired.0.index)?;

        if matches!(outcome, AcquireOutcome::Stale) {
            self.invalidate_swapchain()?;
            let frame = self.frames[self.frame_index as usize];
            outcome = self.backend.acquire_image(frame.image_acquired.0.index)?;
        }

        let image_index = match outcome {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Stale => {
                log::error!(target: "rhi", "swapchain still stale after invalidation");
                return Err("unable to recover the swapchain".to_string());
            }
        };

        let frame = self.frames[self.frame_index as usize];
        self.backend.reset_fence(frame.frame_complete.0.index)?;

        self.image_index = image_index;
        Ok(FrameAcquire {
            image_index,
            image_acquired: frame.image_acquired,
            present_ready: frame.present_ready,
            frame_complete: frame.frame_complete,
        })
    }

    /// Presents the acquired image, waiting on this frame's present-ready
    /// semaphore. A stale result is remembered and recovered on the next
    /// `next_frame`.
    pub fn present_frame(&mut self) -> Result<(), String> {
        if self.headless {
            return Err("headless device has no frame driver".to_string());
        }

        let frame = self.frames[self.frame_index as usize];
        match self
            .backend
            .present(self.image_index, frame.present_ready.0.index)?
        {
            PresentOutcome::Presented => {}
            PresentOutcome::Stale => self.swapchain_stale = true,
        }
        Ok(())
    }

    pub fn get_frames_in_flight_count(&self) -> u32 {
        self.info.frames_in_flight
    }

    pub fn get_frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn get_swapchain_image_count(&self) -> u32 {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.desc.image_count)
            .unwrap_or(0)
    }

    pub fn get_swapchain_extent(&self) -> (u32, u32) {
        self.swapchain
            .as_ref()
            .map(|swapchain| (swapchain.desc.width, swapchain.desc.height))
            .unwrap_or((0, 0))
    }

    pub fn get_swapchain_color_format(&self) -> Format {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.desc.format)
            .unwrap_or(Format::Undefined)
    }

    pub fn get_swapchain_color_attachment(&self, image_index: u32) -> Image {
        let swapchain = self.swapchain.as_ref().expect("device is headless");
        swapchain.images[image_index as usize]
    }

    pub fn get_depth_stencil_formats(&self) -> Vec<Format> {
        self.backend.depth_stencil_formats()
    }

    pub fn get_max_sample_count(&self) -> SampleCount {
        self.backend.max_sample_count()
    }

    // ------------------------------------------------------------------
    // Swapchain internals

    fn build_swapchain(&mut self) -> Result<(), String> {
        let desc = self.backend.create_swapchain(self.info.vsync)?;

        let mut images = Vec::with_capacity(desc.image_count as usize);
        for image_index in 0..desc.image_count {
            let info = ImageInfo {
                image_type: ImageType::D2,
                format: desc.format,
                width: desc.width,
                height: desc.height,
                depth: 1,
                layers: 1,
                usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_DST,
                samples: SampleCount::X1,
                sampler: Default::default(),
            };
            let rid = self.next_rid();
            let handle = self.images.insert(ImageObj {
                rid,
                info,
                framebuffer_keys: FnvHashSet::default(),
            });
            self.backend
                .register_swapchain_image(image_index, handle.index)?;
            images.push(Image(handle));
        }

        self.swapchain = Some(SwapchainData { desc, images });
        Ok(())
    }

    fn create_frame_sync(&mut self) -> Result<(), String> {
        for _ in 0..self.info.frames_in_flight {
            let image_acquired = self.create_semaphore()?;
            let present_ready = self.create_semaphore()?;
            let frame_complete = self.create_fence(true)?;
            self.frames.push(FrameSync {
                image_acquired,
                present_ready,
                frame_complete,
            });
        }
        Ok(())
    }

    /// Wait-idle, rebuild surface capabilities, recreate the swapchain, its
    /// color attachments and the per-frame sync objects. All replacements
    /// get fresh `rid`s, so every cached object keyed on the old attachments
    /// is invalidated.
    fn invalidate_swapchain(&mut self) -> Result<(), String> {
        self.backend.wait_idle()?;

        let old = self.swapchain.take().ok_or("no swapchain")?;
        let old_count = old.images.len() as u32;
        for image in old.images {
            self.destroy_image(image);
        }
        self.backend.destroy_swapchain();

        self.backend.refresh_surface_caps()?;
        self.build_swapchain()?;

        let new_count = self
            .swapchain
            .as_ref()
            .map(|swapchain| swapchain.desc.image_count)
            .unwrap_or(0);
        if new_count != old_count {
            log::warn!(
                target: "rhi",
                "swapchain image count changed from {old_count} to {new_count}"
            );
            return Err("swapchain image count changed across invalidation".to_string());
        }

        for frame in std::mem::take(&mut self.frames) {
            self.destroy_semaphore(frame.image_acquired);
            self.destroy_semaphore(frame.present_ready);
            self.destroy_fence(frame.frame_complete);
        }
        self.create_frame_sync()?;

        Ok(())
    }
}

impl Drop for Device {
    /// Teardown order: frame sync, swapchain attachments, then the dedup
    /// caches as pipeline layouts, set layouts, passes, framebuffers.
    fn drop(&mut self) {
        let _ = self.backend.wait_idle();

        for frame in std::mem::take(&mut self.frames) {
            self.destroy_semaphore(frame.image_acquired);
            self.destroy_semaphore(frame.present_ready);
            self.destroy_fence(frame.frame_complete);
        }
        if let Some(swapchain) = self.swapchain.take() {
            for image in swapchain.images {
                self.destroy_image(image);
            }
            self.backend.destroy_swapchain();
        }

        let pipeline_layouts: Vec<PipelineLayout> =
            self.caches.pipeline_layouts.drain().map(|(_, v)| v).collect();
        log::info!(target: "rhi", "device destroying {} pipeline layouts", pipeline_layouts.len());
        for layout in pipeline_layouts {
            self.pipeline_layouts.remove(layout.0);
            self.backend.destroy_pipeline_layout(layout.0.index);
        }

        let set_layouts: Vec<SetLayout> =
            self.caches.set_layouts.drain().map(|(_, v)| v).collect();
        log::info!(target: "rhi", "device destroying {} set layouts", set_layouts.len());
        for layout in set_layouts {
            self.set_layouts.remove(layout.0);
            self.backend.destroy_set_layout(layout.0.index);
        }

        let passes: Vec<Pass> = self.caches.passes.drain().map(|(_, v)| v).collect();
        log::info!(target: "rhi", "device destroying {} passes", passes.len());
        for pass in passes {
            self.passes.remove(pass.0);
            self.backend.destroy_pass(pass.0.index);
        }

        // Destroying images usually empties this cache already.
        let framebuffers: Vec<Framebuffer> =
            self.caches.framebuffers.drain().map(|(_, v)| v).collect();
        log::info!(target: "rhi", "device destroying {} framebuffers", framebuffers.len());
        for framebuffer in framebuffers {
            self.framebuffers.remove(framebuffer.0);
            self.backend.destroy_framebuffer(framebuffer.0.index);
        }

        for (kind, live) in [
            (ObjectKind::Buffer, self.buffers.live_count()),
            (ObjectKind::Image, self.images.live_count()),
            (ObjectKind::Shader, self.shaders.live_count()),
            (ObjectKind::Pipeline, self.pipelines.live_count()),
            (ObjectKind::SetPool, self.set_pools.live_count()),
            (ObjectKind::CommandPool, self.command_pools.live_count()),
            (ObjectKind::Semaphore, self.semaphores.live_count()),
            (ObjectKind::Fence, self.fences.live_count()),
        ] {
            if live > 0 {
                log::warn!(target: "rhi", "{live} {kind:?} objects leaked at device teardown");
            }
        }

        self.backend.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::clamp_scissor;
    use crate::Rect;

    #[test]
    fn scissor_negative_origin_is_clamped() {
        let adjusted = clamp_scissor(Rect::new(-10.0, -5.0, 100.0, 50.0)).unwrap();
        assert_eq!(adjusted, Rect::new(0.0, 0.0, 90.0, 45.0));
    }

    #[test]
    fn scissor_positive_rect_is_untouched() {
        let rect = Rect::new(4.0, 8.0, 32.0, 16.0);
        assert_eq!(clamp_scissor(rect), Some(rect));
    }

    #[test]
    fn scissor_without_area_is_dropped() {
        assert_eq!(clamp_scissor(Rect::new(-20.0, 0.0, 10.0, 10.0)), None);
        assert_eq!(clamp_scissor(Rect::new(0.0, 0.0, 0.0, 10.0)), None);
        assert_eq!(clamp_scissor(Rect::new(5.0, -32.0, 16.0, 32.0)), None);
    }
}
