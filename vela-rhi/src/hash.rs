//! Content hashing for the deduplication caches.
//!
//! Pass and set-layout descriptions hash to 32 bits with FNV-1a over a
//! canonical string form. Combined keys (pipeline layouts, framebuffers,
//! pipeline variants) fold those hashes into 64-bit keys with a boost-style
//! `hash_combine`.

use crate::{ColorComponents, PassInfo, PipelineLayoutInfo, Rid, SetLayoutInfo};

const FNV_OFFSET_BASIS: u32 = 2166136261;
const FNV_PRIME: u32 = 16777619;

pub(crate) fn hash32_fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub(crate) fn hash_combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9e3779b9)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Canonical 32-bit hash of a pass description. Equal `PassInfo` values
/// always produce equal hashes; the cache treats equal hashes as equal
/// passes.
pub(crate) fn hash32_pass_info(pass: &PassInfo) -> u32 {
    let mut s = String::with_capacity(128);

    s.push_str(&pass.color_attachments.len().to_string());
    s.push('m');
    s.push_str(&(pass.samples as u32).to_string());

    for (i, attachment) in pass.color_attachments.iter().enumerate() {
        s.push('c');
        s.push_str(&(attachment.color_format as u32).to_string());
        s.push('l');
        s.push_str(&(attachment.color_load_op as u32).to_string());
        s.push('s');
        s.push_str(&(attachment.color_store_op as u32).to_string());
        s.push('i');
        s.push_str(&(attachment.initial_layout as u32).to_string());
        s.push('p');
        s.push_str(&(attachment.pass_layout as u32).to_string());

        if let Some(resolves) = pass.color_resolve_attachments {
            let resolve = &resolves[i];
            s.push('l');
            s.push_str(&(resolve.load_op as u32).to_string());
            s.push('s');
            s.push_str(&(resolve.store_op as u32).to_string());
            s.push('i');
            s.push_str(&(resolve.initial_layout as u32).to_string());
            s.push('p');
            s.push_str(&(resolve.pass_layout as u32).to_string());
        }
    }

    if let Some(attachment) = pass.depth_stencil_attachment {
        s.push('d');
        s.push_str(&(attachment.depth_stencil_format as u32).to_string());
        s.push('l');
        s.push_str(&(attachment.depth_load_op as u32).to_string());
        s.push('s');
        s.push_str(&(attachment.depth_store_op as u32).to_string());
        s.push('l');
        s.push_str(&(attachment.stencil_load_op as u32).to_string());
        s.push('s');
        s.push_str(&(attachment.stencil_store_op as u32).to_string());
        s.push('i');
        s.push_str(&(attachment.initial_layout as u32).to_string());
        s.push('p');
        s.push_str(&(attachment.pass_layout as u32).to_string());
    }

    if let Some(dep) = pass.dependency {
        s.push('D');
        s.push_str(&dep.src_stage_mask.bits().to_string());
        s.push('_');
        s.push_str(&dep.dst_stage_mask.bits().to_string());
        s.push('_');
        s.push_str(&dep.src_access_mask.bits().to_string());
        s.push('_');
        s.push_str(&dep.dst_access_mask.bits().to_string());
    }

    hash32_fnv1a(s.as_bytes())
}

pub(crate) fn hash32_set_layout_info(layout: &SetLayoutInfo) -> u32 {
    let mut s = String::with_capacity(64);

    s.push_str(&layout.bindings.len().to_string());

    for binding in layout.bindings {
        s.push('b');
        s.push_str(&binding.binding.to_string());
        s.push('t');
        s.push_str(&(binding.binding_type as u32).to_string());
        s.push('a');
        s.push_str(&binding.array_count.to_string());
    }

    hash32_fnv1a(s.as_bytes())
}

/// Hash of the ordered set-layout chain. A pipeline layout with a single set
/// layout hashes equal to that set layout alone; the caches are disjoint so
/// this is acceptable.
pub(crate) fn hash64_pipeline_layout_info(layout: &PipelineLayoutInfo) -> u64 {
    let Some((first, rest)) = layout.set_layouts.split_first() else {
        return 0;
    };

    let mut hash = hash32_set_layout_info(first) as u64;
    for set_layout in rest {
        hash_combine(&mut hash, hash32_set_layout_info(set_layout) as u64);
    }

    hash
}

/// Framebuffer cache key: the pass identity, the extent, and the `rid` of
/// every referenced attachment. Recreating any attachment image therefore
/// produces a different key.
pub(crate) fn hash64_framebuffer(
    pass_hash: u32,
    width: u32,
    height: u32,
    color_rids: &[Rid],
    resolve_rids: Option<&[Rid]>,
    depth_stencil_rid: Option<Rid>,
) -> u64 {
    let mut hash = pass_hash as u64;

    hash_combine(&mut hash, width as u64);
    hash_combine(&mut hash, height as u64);

    for (i, &rid) in color_rids.iter().enumerate() {
        hash_combine(&mut hash, rid);

        if let Some(resolves) = resolve_rids {
            hash_combine(&mut hash, resolves[i]);
        }
    }

    if let Some(rid) = depth_stencil_rid {
        hash_combine(&mut hash, rid);
    }

    hash
}

/// Pipeline variant key: the pass identity folded with the per-attachment
/// color write masks.
pub(crate) fn hash64_pipeline_variant(pass_hash: u32, color_write_masks: &[ColorComponents]) -> u64 {
    let mut hash = pass_hash as u64;

    for mask in color_write_masks {
        hash_combine(&mut hash, mask.bits() as u64);
    }

    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AttachmentLoadOp, AttachmentStoreOp, BindingType, Format, ImageLayout, PassColorAttachment,
        SampleCount, SetBindingInfo,
    };

    fn color_attachment(format: Format) -> PassColorAttachment {
        PassColorAttachment {
            color_format: format,
            color_load_op: AttachmentLoadOp::Clear,
            color_store_op: AttachmentStoreOp::Store,
            initial_layout: ImageLayout::Undefined,
            pass_layout: ImageLayout::ColorAttachment,
        }
    }

    #[test]
    fn fnv1a_known_values() {
        // Reference vectors for 32-bit FNV-1a.
        assert_eq!(hash32_fnv1a(b""), 0x811c9dc5);
        assert_eq!(hash32_fnv1a(b"a"), 0xe40c292c);
        assert_eq!(hash32_fnv1a(b"foobar"), 0xbf9cf968);
    }

    #[test]
    fn equal_pass_infos_hash_equal() {
        let attachments = [color_attachment(Format::Rgba8)];
        let a = PassInfo {
            samples: SampleCount::X1,
            color_attachments: &attachments,
            color_resolve_attachments: None,
            depth_stencil_attachment: None,
            dependency: None,
        };
        let b = a;
        assert_eq!(hash32_pass_info(&a), hash32_pass_info(&b));
    }

    #[test]
    fn pass_hash_depends_on_format_and_samples() {
        let rgba = [color_attachment(Format::Rgba8)];
        let bgra = [color_attachment(Format::Bgra8)];
        let base = PassInfo {
            samples: SampleCount::X1,
            color_attachments: &rgba,
            color_resolve_attachments: None,
            depth_stencil_attachment: None,
            dependency: None,
        };
        let other_format = PassInfo {
            color_attachments: &bgra,
            ..base
        };
        let other_samples = PassInfo {
            samples: SampleCount::X4,
            ..base
        };
        assert_ne!(hash32_pass_info(&base), hash32_pass_info(&other_format));
        assert_ne!(hash32_pass_info(&base), hash32_pass_info(&other_samples));
    }

    #[test]
    fn set_layout_hash_is_order_sensitive() {
        let uniform = SetBindingInfo {
            binding: 0,
            binding_type: BindingType::UniformBuffer,
            array_count: 1,
        };
        let sampler = SetBindingInfo {
            binding: 1,
            binding_type: BindingType::CombinedImageSampler,
            array_count: 1,
        };
        let forward = [uniform, sampler];
        let reversed = [sampler, uniform];
        assert_ne!(
            hash32_set_layout_info(&SetLayoutInfo { bindings: &forward }),
            hash32_set_layout_info(&SetLayoutInfo { bindings: &reversed }),
        );
    }

    #[test]
    fn single_set_pipeline_layout_matches_set_layout_hash() {
        let bindings = [SetBindingInfo {
            binding: 0,
            binding_type: BindingType::StorageBuffer,
            array_count: 4,
        }];
        let set_layout = SetLayoutInfo {
            bindings: &bindings,
        };
        let set_layouts = [set_layout];
        let layout = PipelineLayoutInfo {
            set_layouts: &set_layouts,
        };
        assert_eq!(
            hash64_pipeline_layout_info(&layout),
            hash32_set_layout_info(&set_layout) as u64,
        );
        assert_eq!(
            hash64_pipeline_layout_info(&PipelineLayoutInfo { set_layouts: &[] }),
            0,
        );
    }

    #[test]
    fn framebuffer_hash_changes_with_attachment_rid() {
        let a = hash64_framebuffer(77, 256, 256, &[1, 2], None, Some(3));
        let b = hash64_framebuffer(77, 256, 256, &[1, 4], None, Some(3));
        let c = hash64_framebuffer(77, 128, 256, &[1, 2], None, Some(3));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn variant_hash_folds_write_masks() {
        let rgba = [ColorComponents::RGBA];
        let rgb = [ColorComponents::R | ColorComponents::G | ColorComponents::B];
        assert_eq!(
            hash64_pipeline_variant(9, &rgba),
            hash64_pipeline_variant(9, &rgba),
        );
        assert_ne!(
            hash64_pipeline_variant(9, &rgba),
            hash64_pipeline_variant(9, &rgb),
        );
        assert_ne!(
            hash64_pipeline_variant(9, &rgba),
            hash64_pipeline_variant(10, &rgba),
        );
    }
}
