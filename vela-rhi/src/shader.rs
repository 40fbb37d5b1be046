//! Shader compilation and reflection.
//!
//! GLSL source with Vulkan semantics is parsed into naga IR, validated, and
//! written out as SPIR-V 1.0 targeting a Vulkan 1.3 environment. The OpenGL
//! backend feeds the stored SPIR-V back through naga to produce GLSL 460
//! with `set`/`binding` qualifiers remapped to flat GL binding indices.

use crate::{BindingType, ShaderType};

pub(crate) const GLSL_ENTRY_POINT: &str = "main";

/// One resource binding discovered by shader reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinding {
    pub set: u32,
    pub binding: u32,
    pub array_count: u32,
    pub binding_type: BindingType,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub bindings: Vec<ShaderBinding>,
}

fn naga_shader_stage(shader_type: ShaderType) -> naga::ShaderStage {
    match shader_type {
        ShaderType::Vertex => naga::ShaderStage::Vertex,
        ShaderType::Fragment => naga::ShaderStage::Fragment,
        ShaderType::Compute => naga::ShaderStage::Compute,
    }
}

fn parse_and_validate(
    shader_type: ShaderType,
    source: &str,
) -> Result<(naga::Module, naga::valid::ModuleInfo), String> {
    let options = naga::front::glsl::Options {
        stage: naga_shader_stage(shader_type),
        defines: Default::default(),
    };
    let module = naga::front::glsl::Frontend::default()
        .parse(&options, source)
        .map_err(|errors| format!("GLSL parse failed:\n{}", errors.emit_to_string(source)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| format!("shader validation failed:\n{}", err.emit_to_string(source)))?;

    Ok((module, info))
}

/// Compiles Vulkan-dialect GLSL of the given stage to SPIR-V plus binding
/// reflection. On failure the toolchain log is returned in the error.
pub(crate) fn compile_to_spirv(
    shader_type: ShaderType,
    source: &str,
) -> Result<(Vec<u32>, ShaderReflection), String> {
    let (module, info) = parse_and_validate(shader_type, source)?;

    let mut options = naga::back::spv::Options::default();
    options.lang_version = (1, 0);
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga_shader_stage(shader_type),
        entry_point: GLSL_ENTRY_POINT.to_string(),
    };

    let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|err| format!("SPIR-V generation failed: {err}"))?;

    Ok((words, reflect_module(&module)))
}

/// Resource bindings of the module: uniform buffers, storage buffers,
/// sampled images and storage images. Plain samplers are an artifact of the
/// IR's split texture/sampler model and are not reported.
fn reflect_module(module: &naga::Module) -> ShaderReflection {
    let mut reflection = ShaderReflection::default();

    for (_, var) in module.global_variables.iter() {
        let Some(resource) = &var.binding else {
            continue;
        };

        let Some((binding_type, array_count)) = classify_binding(module, var.ty, &var.space)
        else {
            continue;
        };

        reflection.bindings.push(ShaderBinding {
            set: resource.group,
            binding: resource.binding,
            array_count,
            binding_type,
            name: var.name.clone().unwrap_or_default(),
        });
    }

    reflection
}

fn classify_binding(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    space: &naga::AddressSpace,
) -> Option<(BindingType, u32)> {
    match &module.types[ty].inner {
        naga::TypeInner::Image { class, .. } => Some((image_binding_type(*class), 1)),
        naga::TypeInner::Sampler { .. } => None,
        naga::TypeInner::BindingArray { base, size } => {
            let count = match size {
                naga::ArraySize::Constant(count) => count.get(),
                _ => 1,
            };
            match &module.types[*base].inner {
                naga::TypeInner::Image { class, .. } => Some((image_binding_type(*class), count)),
                _ => None,
            }
        }
        _ => match space {
            naga::AddressSpace::Uniform => Some((BindingType::UniformBuffer, 1)),
            naga::AddressSpace::Storage { .. } => Some((BindingType::StorageBuffer, 1)),
            _ => None,
        },
    }
}

fn image_binding_type(class: naga::ImageClass) -> BindingType {
    match class {
        naga::ImageClass::Storage { .. } => BindingType::StorageImage,
        _ => BindingType::CombinedImageSampler,
    }
}

/// Decompiles stored SPIR-V to OpenGL GLSL 460. `binding_map` carries the
/// flat GL binding index for every `(set, binding)` pair; entries missing
/// from the map fail the write.
#[cfg(feature = "opengl")]
pub(crate) fn decompile_to_opengl_glsl(
    shader_type: ShaderType,
    spirv: &[u32],
    binding_map: &naga::back::glsl::BindingMap,
) -> Result<String, String> {
    let options = naga::front::spv::Options {
        adjust_coordinate_space: false,
        strict_capabilities: false,
        block_ctx_dump_prefix: None,
    };
    let module = naga::front::spv::Frontend::new(spirv.iter().cloned(), &options)
        .parse()
        .map_err(|err| format!("SPIR-V parse failed: {err}"))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|err| format!("SPIR-V module validation failed: {err}"))?;

    let options = naga::back::glsl::Options {
        version: naga::back::glsl::Version::Desktop(460),
        writer_flags: naga::back::glsl::WriterFlags::empty(),
        binding_map: binding_map.clone(),
        zero_initialize_workgroup_memory: true,
    };
    let pipeline_options = naga::back::glsl::PipelineOptions {
        shader_stage: naga_shader_stage(shader_type),
        entry_point: GLSL_ENTRY_POINT.to_string(),
        multiview: None,
    };

    let mut glsl = String::new();
    let mut writer = naga::back::glsl::Writer::new(
        &mut glsl,
        &module,
        &info,
        &options,
        &pipeline_options,
        naga::proc::BoundsCheckPolicies::default(),
    )
    .map_err(|err| format!("GLSL writer setup failed: {err}"))?;
    writer
        .write()
        .map_err(|err| format!("GLSL generation failed: {err}"))?;

    Ok(glsl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX_SRC: &str = r#"
        #version 460
        layout(location = 0) in vec3 a_position;
        layout(set = 0, binding = 0) uniform Globals {
            mat4 mvp;
        } u_globals;
        void main() {
            gl_Position = u_globals.mvp * vec4(a_position, 1.0);
        }
    "#;

    const COMPUTE_SRC: &str = r#"
        #version 460
        layout(local_size_x = 64) in;
        layout(set = 0, binding = 0) buffer Values {
            float values[];
        } b_values;
        void main() {
            b_values.values[gl_GlobalInvocationID.x] *= 2.0;
        }
    "#;

    #[test]
    fn compiles_vertex_shader_with_reflection() {
        let (spirv, reflection) = compile_to_spirv(ShaderType::Vertex, VERTEX_SRC).unwrap();
        assert_eq!(spirv[0], 0x0723_0203); // SPIR-V magic
        assert_eq!(reflection.bindings.len(), 1);
        let binding = &reflection.bindings[0];
        assert_eq!(binding.set, 0);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.array_count, 1);
        assert_eq!(binding.binding_type, BindingType::UniformBuffer);
    }

    #[test]
    fn compiles_compute_shader_with_storage_binding() {
        let (_, reflection) = compile_to_spirv(ShaderType::Compute, COMPUTE_SRC).unwrap();
        assert_eq!(reflection.bindings.len(), 1);
        assert_eq!(
            reflection.bindings[0].binding_type,
            BindingType::StorageBuffer
        );
    }

    #[test]
    fn parse_failure_reports_log() {
        let err = compile_to_spirv(ShaderType::Fragment, "void broken(").unwrap_err();
        assert!(err.contains("parse failed"), "unexpected error: {err}");
    }

    #[cfg(feature = "opengl")]
    #[test]
    fn decompiles_to_desktop_glsl() {
        let (spirv, _) = compile_to_spirv(ShaderType::Compute, COMPUTE_SRC).unwrap();
        let mut binding_map = naga::back::glsl::BindingMap::new();
        binding_map.insert(
            naga::ResourceBinding {
                group: 0,
                binding: 0,
            },
            0,
        );
        let glsl = decompile_to_opengl_glsl(ShaderType::Compute, &spirv, &binding_map).unwrap();
        assert!(glsl.contains("#version 460"), "missing version: {glsl}");
        assert!(glsl.contains("main"), "missing entry point: {glsl}");
    }
}
