//! Stateless translation between API-neutral enums and OpenGL values.

use crate::{
    BlendFactor, BlendOp, CompareOp, Filter, Format, ImageType, IndexType, PolygonMode,
    PrimitiveTopology, SamplerAddressMode, ShaderType,
};

/// `(internal format, data format, data type)` triple for a texel format.
pub(super) fn format(format: Format) -> (u32, u32, u32) {
    match format {
        Format::Undefined => (glow::NONE, glow::NONE, glow::NONE),
        Format::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        Format::R8U => (glow::R8UI, glow::RED_INTEGER, glow::UNSIGNED_BYTE),
        Format::R32U => (glow::R32UI, glow::RED_INTEGER, glow::UNSIGNED_INT),
        Format::Rgb8 => (glow::RGB8, glow::RGB, glow::UNSIGNED_BYTE),
        Format::Rgb8U => (glow::RGB8UI, glow::RGB_INTEGER, glow::UNSIGNED_BYTE),
        Format::Bgra8 => (glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
        Format::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        Format::Rgba8U => (glow::RGBA8UI, glow::RGBA_INTEGER, glow::UNSIGNED_BYTE),
        Format::Rgba32F => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        Format::D32FS8U => (
            glow::DEPTH32F_STENCIL8,
            glow::DEPTH_STENCIL,
            glow::FLOAT_32_UNSIGNED_INT_24_8_REV,
        ),
        Format::D24S8U => (
            glow::DEPTH24_STENCIL8,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
    }
}

pub(super) fn image_target(image_type: ImageType) -> u32 {
    match image_type {
        ImageType::D2 => glow::TEXTURE_2D,
        ImageType::Cube => glow::TEXTURE_CUBE_MAP,
    }
}

pub(super) fn shader_stage(shader_type: ShaderType) -> u32 {
    match shader_type {
        ShaderType::Vertex => glow::VERTEX_SHADER,
        ShaderType::Fragment => glow::FRAGMENT_SHADER,
        ShaderType::Compute => glow::COMPUTE_SHADER,
    }
}

pub(super) fn primitive_mode(topology: PrimitiveTopology) -> u32 {
    match topology {
        PrimitiveTopology::TriangleList => glow::TRIANGLES,
        PrimitiveTopology::TriangleStrip => glow::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => glow::LINES,
        PrimitiveTopology::PointList => glow::POINTS,
    }
}

pub(super) fn polygon_mode(mode: PolygonMode) -> u32 {
    match mode {
        PolygonMode::Fill => glow::FILL,
        PolygonMode::Line => glow::LINE,
    }
}

pub(super) fn compare_op(op: CompareOp) -> u32 {
    match op {
        CompareOp::Never => glow::NEVER,
        CompareOp::Less => glow::LESS,
        CompareOp::Equal => glow::EQUAL,
        CompareOp::LessOrEqual => glow::LEQUAL,
        CompareOp::Greater => glow::GREATER,
        CompareOp::NotEqual => glow::NOTEQUAL,
        CompareOp::GreaterOrEqual => glow::GEQUAL,
        CompareOp::Always => glow::ALWAYS,
    }
}

pub(super) fn blend_factor(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
    }
}

pub(super) fn blend_op(op: BlendOp) -> u32 {
    match op {
        BlendOp::Add => glow::FUNC_ADD,
        BlendOp::Subtract => glow::FUNC_SUBTRACT,
    }
}

/// `(GL type, byte size)` of an index type.
pub(super) fn index_type(index_type: IndexType) -> (u32, u64) {
    match index_type {
        IndexType::U16 => (glow::UNSIGNED_SHORT, 2),
        IndexType::U32 => (glow::UNSIGNED_INT, 4),
    }
}

pub(super) fn mag_filter(filter: Filter) -> u32 {
    match filter {
        Filter::Nearest => glow::NEAREST,
        Filter::Linear => glow::LINEAR,
    }
}

pub(super) fn min_filter(filter: Filter, mipmap_filter: Filter) -> u32 {
    match (filter, mipmap_filter) {
        (Filter::Nearest, Filter::Nearest) => glow::NEAREST_MIPMAP_NEAREST,
        (Filter::Nearest, Filter::Linear) => glow::NEAREST_MIPMAP_LINEAR,
        (Filter::Linear, Filter::Nearest) => glow::LINEAR_MIPMAP_NEAREST,
        (Filter::Linear, Filter::Linear) => glow::LINEAR_MIPMAP_LINEAR,
    }
}

pub(super) fn address_mode(mode: SamplerAddressMode) -> u32 {
    match mode {
        SamplerAddressMode::Repeat => glow::REPEAT,
        SamplerAddressMode::MirroredRepeat => glow::MIRRORED_REPEAT,
        SamplerAddressMode::ClampToEdge => glow::CLAMP_TO_EDGE,
    }
}
