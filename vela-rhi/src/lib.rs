//! Vela RHI: handle-based rendering hardware interface.
//! One recording API, two backends: immediate Vulkan and deferred OpenGL.

mod backend;
mod device;
mod hash;
mod pool;
mod shader;

#[cfg(feature = "opengl")]
mod gl;
#[cfg(feature = "vulkan")]
mod vulkan;

pub use device::{CacheCounts, Device, FrameAcquire};
pub use pool::Handle;
pub use shader::{ShaderBinding, ShaderReflection};

/// Unique identifier for a GPU resource. Monotonically increasing,
/// assigned at creation, never recycled.
pub type Rid = u64;

/// Backend graphics API selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceBackend {
    Vulkan,
    OpenGl,
}

/// Object type tag, used by the device pools for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Device,
    Semaphore,
    Fence,
    Buffer,
    Image,
    Shader,
    SetLayout,
    Set,
    SetPool,
    Pass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    CommandList,
    CommandPool,
    Queue,
}

macro_rules! define_handles {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) Handle);
        )*
    };
}

define_handles! {
    /// GPU-GPU synchronization primitive.
    Semaphore,
    /// CPU-GPU synchronization primitive. May be created signaled.
    Fence,
    Buffer,
    Image,
    /// Compiled shader stage. Created from GLSL source, stores SPIR-V.
    Shader,
    /// Value-semantic descriptor set layout, deduplicated by content hash.
    SetLayout,
    Set,
    /// Reset-only descriptor set pool.
    SetPool,
    /// Value-semantic render pass, deduplicated by content hash.
    Pass,
    /// Derived internally from pass begin info; never user-created.
    Framebuffer,
    /// Pipeline layout, deduplicated by content hash.
    PipelineLayout,
    Pipeline,
    CommandList,
    CommandPool,
    Queue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Undefined,
    R8,
    R8U,
    R32U,
    Rgb8,
    Rgb8U,
    Bgra8,
    Rgba8,
    Rgba8U,
    Rgba32F,
    D32FS8U,
    D24S8U,
}

impl Format {
    /// Byte size of a single texel in this format.
    pub fn texel_size(self) -> u32 {
        match self {
            Format::Undefined => 0,
            Format::R8 | Format::R8U => 1,
            Format::R32U => 4,
            Format::Rgb8 | Format::Rgb8U => 3,
            Format::Bgra8 | Format::Rgba8 | Format::Rgba8U => 4,
            Format::Rgba32F => 16,
            Format::D32FS8U | Format::D24S8U => 5,
        }
    }

    pub fn has_depth(self) -> bool {
        matches!(self, Format::D32FS8U | Format::D24S8U)
    }
}

/// Sample count bits. Values are bit-identical with the Vulkan flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum SampleCount {
    X1 = 1,
    X2 = 2,
    X4 = 4,
    X8 = 8,
    X16 = 16,
    X32 = 32,
    X64 = 64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageType {
    #[default]
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentLoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentStoreOp {
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerAddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn byte_size(self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    F32,
    F32x2,
    F32x3,
    F32x4,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexInputRate {
    Vertex,
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderType {
    Vertex,
    Fragment,
    Compute,
}

/// Descriptor binding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    CombinedImageSampler,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
}

/// Queue family selector. One queue per family (families may overlap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFamily {
    Graphics,
    Transfer,
    Compute,
    Present,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
        const INDIRECT = 1 << 6;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        const TRANSIENT = 1 << 6;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const DRAW_INDIRECT = 1 << 1;
        const VERTEX_INPUT = 1 << 2;
        const VERTEX_SHADER = 1 << 3;
        const FRAGMENT_SHADER = 1 << 4;
        const EARLY_FRAGMENT_TESTS = 1 << 5;
        const LATE_FRAGMENT_TESTS = 1 << 6;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 7;
        const COMPUTE_SHADER = 1 << 8;
        const TRANSFER = 1 << 9;
        const BOTTOM_OF_PIPE = 1 << 10;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const SHADER_READ = 1 << 3;
        const SHADER_WRITE = 1 << 4;
        const COLOR_ATTACHMENT_READ = 1 << 5;
        const COLOR_ATTACHMENT_WRITE = 1 << 6;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 8;
        const TRANSFER_READ = 1 << 9;
        const TRANSFER_WRITE = 1 << 10;
    }

    /// Color write mask bits. Bit-identical with the Vulkan flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorComponents: u32 {
        const R = 1 << 0;
        const G = 1 << 1;
        const B = 1 << 2;
        const A = 1 << 3;
    }
}

impl ColorComponents {
    pub const RGBA: ColorComponents = ColorComponents::all();
}

/// Device creation parameters. A device is headless unless created through
/// one of the windowed constructors.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub backend: DeviceBackend,
    /// Prefer a vsynced present mode when a swapchain is created.
    pub vsync: bool,
    /// Number of per-frame synchronization generations the frame driver
    /// cycles through.
    pub frames_in_flight: u32,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Vulkan,
            vsync: true,
            frames_in_flight: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub size: u64,
    pub usage: BufferUsage,
    /// Allocate from host-visible, host-coherent memory. Required for `buffer_map`.
    pub host_visible: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SamplerInfo {
    pub filter: Filter,
    pub mipmap_filter: Filter,
    pub address_mode: SamplerAddressMode,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub image_type: ImageType,
    pub format: Format,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Array layer count; must be 1 for 2D images and 6 for cube images.
    pub layers: u32,
    pub usage: ImageUsage,
    pub samples: SampleCount,
    /// Consulted only when `usage` contains `SAMPLED`.
    pub sampler: SamplerInfo,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderInfo<'a> {
    pub shader_type: ShaderType,
    /// GLSL source targeting Vulkan semantics; compiled to SPIR-V at creation.
    pub source: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBindingInfo {
    pub binding: u32,
    pub binding_type: BindingType,
    pub array_count: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SetLayoutInfo<'a> {
    pub bindings: &'a [SetBindingInfo],
}

/// At most four set layouts. A single 128-byte push-constant range visible
/// to all stages is implicit in every pipeline layout.
#[derive(Debug, Clone, Copy)]
pub struct PipelineLayoutInfo<'a> {
    pub set_layouts: &'a [SetLayoutInfo<'a>],
}

pub const PIPELINE_LAYOUT_MAX_SETS: usize = 4;
pub const PUSH_CONSTANT_SIZE: u32 = 128;

#[derive(Debug, Clone, Copy)]
pub struct SetPoolInfo<'a> {
    pub layout: SetLayoutInfo<'a>,
    pub max_sets: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandPoolInfo {
    /// Lists from this pool are short-lived.
    pub transient: bool,
    /// Allow resetting individual lists instead of the whole pool.
    pub list_resettable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassColorAttachment {
    pub color_format: Format,
    pub color_load_op: AttachmentLoadOp,
    pub color_store_op: AttachmentStoreOp,
    pub initial_layout: ImageLayout,
    /// Layout during and after the pass.
    pub pass_layout: ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassResolveAttachment {
    pub load_op: AttachmentLoadOp,
    pub store_op: AttachmentStoreOp,
    pub initial_layout: ImageLayout,
    pub pass_layout: ImageLayout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassDepthStencilAttachment {
    pub depth_stencil_format: Format,
    pub depth_load_op: AttachmentLoadOp,
    pub depth_store_op: AttachmentStoreOp,
    pub stencil_load_op: AttachmentLoadOp,
    pub stencil_store_op: AttachmentStoreOp,
    pub initial_layout: ImageLayout,
    pub pass_layout: ImageLayout,
}

/// External-to-subpass dependency of the single subpass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassDependency {
    pub src_stage_mask: PipelineStages,
    pub dst_stage_mask: PipelineStages,
    pub src_access_mask: Access,
    pub dst_access_mask: Access,
}

/// Value-semantic render pass description. Equal infos resolve to the same
/// cached pass object.
#[derive(Debug, Clone, Copy)]
pub struct PassInfo<'a> {
    pub samples: SampleCount,
    pub color_attachments: &'a [PassColorAttachment],
    /// When present, must match `color_attachments` in count.
    pub color_resolve_attachments: Option<&'a [PassResolveAttachment]>,
    pub depth_stencil_attachment: Option<&'a PassDepthStencilAttachment>,
    pub dependency: Option<&'a PassDependency>,
}

#[derive(Debug, Clone, Copy)]
pub enum ClearColorValue {
    F32([f32; 4]),
    I32([i32; 4]),
    U32([u32; 4]),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClearDepthStencilValue {
    pub depth: f32,
    pub stencil: u32,
}

/// Framebuffers are derived internally from this description; the user never
/// creates one.
#[derive(Debug, Clone, Copy)]
pub struct PassBeginInfo<'a> {
    pub width: u32,
    pub height: u32,
    pub pass: PassInfo<'a>,
    pub color_attachments: &'a [Image],
    pub color_resolve_attachments: Option<&'a [Image]>,
    pub depth_stencil_attachment: Option<Image>,
    /// One entry per color attachment; consulted for `Clear` load ops.
    pub clear_colors: &'a [ClearColorValue],
    pub clear_depth_stencil: ClearDepthStencilValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }
}

/// Layout matches the Vulkan indirect draw command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawInfo {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub vertex_start: u32,
    pub instance_start: u32,
}

/// Layout matches the Vulkan indexed indirect draw command.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DrawIndexedInfo {
    pub index_count: u32,
    pub instance_count: u32,
    pub index_start: u32,
    pub vertex_offset: i32,
    pub instance_start: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawIndirectInfo {
    pub indirect_buffer: Buffer,
    pub offset: u64,
    pub info_count: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawIndexedIndirectInfo {
    pub indirect_buffer: Buffer,
    pub offset: u64,
    pub info_count: u32,
    pub stride: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Tightly packed buffer region of a full-mip image subresource.
#[derive(Debug, Clone, Copy)]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub image_width: u32,
    pub image_height: u32,
    pub image_depth: u32,
    pub image_layers: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageBlit {
    pub src_min_offset: [i32; 3],
    pub src_max_offset: [i32; 3],
    pub dst_min_offset: [i32; 3],
    pub dst_max_offset: [i32; 3],
}

#[derive(Debug, Clone, Copy)]
pub struct BufferMemoryBarrier {
    pub buffer: Buffer,
    pub src_access: Access,
    pub dst_access: Access,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageMemoryBarrier {
    pub image: Image,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
    pub src_access: Access,
    pub dst_access: Access,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationInfo {
    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,
    pub line_width: f32,
}

impl Default for RasterizationInfo {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::None,
            polygon_mode: PolygonMode::Fill,
            line_width: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthStencilInfo {
    pub depth_test_enabled: bool,
    pub depth_write_enabled: bool,
    pub depth_compare_op: CompareOp,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
}

impl BlendState {
    /// Blending disabled; all writes pass through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            src_color_factor: BlendFactor::One,
            dst_color_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
        }
    }

    /// Standard src-alpha over blending.
    pub fn alpha() -> Self {
        Self {
            enabled: true,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            color_blend_op: BlendOp::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::OneMinusSrcAlpha,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineBlendInfo<'a> {
    /// Per color attachment blend state.
    pub color_attachments: &'a [BlendState],
}

/// Graphics pipeline template. The render pass and per-attachment color
/// write masks are variant properties resolved at first bind inside a pass.
#[derive(Debug, Clone, Copy)]
pub struct PipelineInfo<'a> {
    pub shaders: &'a [Shader],
    pub vertex_attributes: &'a [VertexAttribute],
    pub vertex_bindings: &'a [VertexBinding],
    pub primitive_topology: PrimitiveTopology,
    pub rasterization: RasterizationInfo,
    pub depth_stencil: DepthStencilInfo,
    pub blend: PipelineBlendInfo<'a>,
    pub layout: PipelineLayoutInfo<'a>,
}

#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineInfo<'a> {
    pub shader: Shader,
    pub layout: PipelineLayoutInfo<'a>,
}

/// Batched descriptor image write.
#[derive(Debug, Clone, Copy)]
pub struct SetImageUpdate<'a> {
    pub set: Set,
    pub dst_binding: u32,
    pub dst_array_index: u32,
    pub image_binding_type: BindingType,
    pub images: &'a [Image],
    pub image_layouts: &'a [ImageLayout],
}

/// Batched descriptor buffer write. Buffers are bound at full range.
#[derive(Debug, Clone, Copy)]
pub struct SetBufferUpdate<'a> {
    pub set: Set,
    pub dst_binding: u32,
    pub dst_array_index: u32,
    pub buffer_binding_type: BindingType,
    pub buffers: &'a [Buffer],
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitInfo<'a> {
    pub waits: &'a [Semaphore],
    /// Stage masks matched element-wise to `waits`.
    pub wait_stages: &'a [PipelineStages],
    pub lists: &'a [CommandList],
    pub signals: &'a [Semaphore],
}
