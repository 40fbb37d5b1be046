//! Device-level tests against a headless Vulkan device. Every test skips
//! gracefully when no Vulkan implementation is present on the machine.

use vela_rhi::*;

fn create_device() -> Option<Device> {
    let _ = env_logger::builder().is_test(true).try_init();

    let info = DeviceInfo {
        backend: DeviceBackend::Vulkan,
        vsync: false,
        frames_in_flight: 2,
    };
    match Device::new(&info) {
        Ok(device) => Some(device),
        Err(err) => {
            eprintln!("skipping: no Vulkan device available ({err})");
            None
        }
    }
}

fn color_attachment_info(format: Format) -> PassColorAttachment {
    PassColorAttachment {
        color_format: format,
        color_load_op: AttachmentLoadOp::Clear,
        color_store_op: AttachmentStoreOp::Store,
        initial_layout: ImageLayout::Undefined,
        pass_layout: ImageLayout::ColorAttachment,
    }
}

fn color_image_info(format: Format) -> ImageInfo {
    ImageInfo {
        image_type: ImageType::D2,
        format,
        width: 256,
        height: 256,
        depth: 1,
        layers: 1,
        usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC,
        samples: SampleCount::X1,
        sampler: SamplerInfo::default(),
    }
}

const TRIANGLE_VS: &str = r#"
    #version 460
    void main() {
        const vec2 positions[3] = vec2[](
            vec2(-1.0, -1.0),
            vec2(3.0, -1.0),
            vec2(-1.0, 3.0)
        );
        gl_Position = vec4(positions[gl_VertexIndex], 0.0, 1.0);
    }
"#;

const TRIANGLE_FS: &str = r#"
    #version 460
    layout(location = 0) out vec4 o_color;
    void main() {
        o_color = vec4(1.0, 0.0, 1.0, 1.0);
    }
"#;

const DOUBLE_CS: &str = r#"
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
fn buffer_map_roundtrip() {
    let Some(mut device) = create_device() else {
        return;
    };

    let buffer = device
        .create_buffer(&BufferInfo {
            size: 4096,
            usage: BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
            host_visible: true,
        })
        .unwrap();

    for (offset, len) in [(0u64, 4096usize), (16, 64), (4000, 96), (1, 3)] {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + offset as usize) as u8).collect();

        device.buffer_map(buffer).unwrap();
        device.buffer_map_write(buffer, offset, &data);
        device.buffer_unmap(buffer);

        device.buffer_map(buffer).unwrap();
        let read = device.buffer_map_read(buffer, offset, len as u64).to_vec();
        device.buffer_unmap(buffer);

        assert_eq!(read, data, "roundtrip at offset {offset} length {len}");
    }

    device.destroy_buffer(buffer);
}

#[test]
fn pass_and_set_layout_caches_are_idempotent() {
    let Some(mut device) = create_device() else {
        return;
    };

    // Equal pass descriptions resolve to one object.
    let attachments = [color_attachment_info(Format::Rgba8)];
    let pass_info = PassInfo {
        samples: SampleCount::X1,
        color_attachments: &attachments,
        color_resolve_attachments: None,
        depth_stencil_attachment: None,
        dependency: None,
    };
    let pass_a = device.create_pass(&pass_info).unwrap();
    let pass_b = device.create_pass(&pass_info).unwrap();
    assert_eq!(pass_a, pass_b);
    assert_eq!(device.pass_hash(pass_a), device.pass_hash(pass_b));
    assert_eq!(device.cache_counts().passes, 1);

    // Equal set layouts resolve to one object, and the cache grows by
    // exactly one.
    let bindings = [
        SetBindingInfo {
            binding: 0,
            binding_type: BindingType::UniformBuffer,
            array_count: 1,
        },
        SetBindingInfo {
            binding: 1,
            binding_type: BindingType::CombinedImageSampler,
            array_count: 2,
        },
    ];
    let before = device.cache_counts().set_layouts;
    let layout_a = device
        .create_set_layout(&SetLayoutInfo {
            bindings: &bindings,
        })
        .unwrap();
    let layout_b = device
        .create_set_layout(&SetLayoutInfo {
            bindings: &bindings,
        })
        .unwrap();
    assert_eq!(layout_a, layout_b);
    assert_eq!(
        device.set_layout_hash(layout_a),
        device.set_layout_hash(layout_b)
    );
    assert_eq!(device.cache_counts().set_layouts, before + 1);

    // A single-set pipeline layout shares the set layout's hash value.
    let set_layouts = [SetLayoutInfo {
        bindings: &bindings,
    }];
    let pipeline_layout = device
        .create_pipeline_layout(&PipelineLayoutInfo {
            set_layouts: &set_layouts,
        })
        .unwrap();
    assert_eq!(
        device.pipeline_layout_hash(pipeline_layout),
        device.set_layout_hash(layout_a) as u64
    );
}

#[test]
fn framebuffer_cache_invalidates_with_image() {
    let Some(mut device) = create_device() else {
        return;
    };

    let image = device.create_image(&color_image_info(Format::Rgba8)).unwrap();

    let pool = device
        .create_command_pool(&CommandPoolInfo::default())
        .unwrap();
    let list = device.command_pool_allocate(pool).unwrap();

    let attachments = [color_attachment_info(Format::Rgba8)];
    let begin = PassBeginInfo {
        width: 256,
        height: 256,
        pass: PassInfo {
            samples: SampleCount::X1,
            color_attachments: &attachments,
            color_resolve_attachments: None,
            depth_stencil_attachment: None,
            dependency: None,
        },
        color_attachments: &[image],
        color_resolve_attachments: None,
        depth_stencil_attachment: None,
        clear_colors: &[ClearColorValue::F32([0.0, 0.0, 0.0, 1.0])],
        clear_depth_stencil: ClearDepthStencilValue::default(),
    };

    device.begin_list(list).unwrap();
    device.cmd_begin_pass(list, &begin).unwrap();
    device.cmd_end_pass(list);
    device.end_list(list).unwrap();

    assert_eq!(device.cache_counts().framebuffers, 1);

    // Destroying the image takes its framebuffers down with it.
    device.destroy_image(image);
    assert_eq!(device.cache_counts().framebuffers, 0);

    device.destroy_command_pool(pool);
}

#[test]
fn pipeline_variants_by_pass_and_rebind_hit() {
    let Some(mut device) = create_device() else {
        return;
    };

    let vs = device
        .create_shader(&ShaderInfo {
            shader_type: ShaderType::Vertex,
            source: TRIANGLE_VS,
        })
        .unwrap();
    let fs = device
        .create_shader(&ShaderInfo {
            shader_type: ShaderType::Fragment,
            source: TRIANGLE_FS,
        })
        .unwrap();

    let shaders = [vs, fs];
    let blend = [BlendState::disabled()];
    let pipeline = device
        .create_pipeline(&PipelineInfo {
            shaders: &shaders,
            vertex_attributes: &[],
            vertex_bindings: &[],
            primitive_topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationInfo::default(),
            depth_stencil: DepthStencilInfo::default(),
            blend: PipelineBlendInfo {
                color_attachments: &blend,
            },
            layout: PipelineLayoutInfo { set_layouts: &[] },
        })
        .unwrap();
    assert_eq!(device.pipeline_variant_count(pipeline), 0);

    let image_rgba = device.create_image(&color_image_info(Format::Rgba8)).unwrap();
    let image_bgra = device.create_image(&color_image_info(Format::Bgra8)).unwrap();

    let pool = device
        .create_command_pool(&CommandPoolInfo::default())
        .unwrap();
    let list = device.command_pool_allocate(pool).unwrap();

    let record_pass = |device: &mut Device, format: Format, image: Image, list: CommandList| {
        let attachments = [color_attachment_info(format)];
        let begin = PassBeginInfo {
            width: 256,
            height: 256,
            pass: PassInfo {
                samples: SampleCount::X1,
                color_attachments: &attachments,
                color_resolve_attachments: None,
                depth_stencil_attachment: None,
                dependency: None,
            },
            color_attachments: &[image],
            color_resolve_attachments: None,
            depth_stencil_attachment: None,
            clear_colors: &[ClearColorValue::F32([0.0; 4])],
            clear_depth_stencil: ClearDepthStencilValue::default(),
        };
        device.cmd_begin_pass(list, &begin).unwrap();
    };

    device.begin_list(list).unwrap();

    record_pass(&mut device, Format::Rgba8, image_rgba, list);
    device.cmd_bind_graphics_pipeline(list, pipeline).unwrap();
    let first_hash = device.pipeline_variant_hash(pipeline);
    device.cmd_end_pass(list);
    assert_eq!(device.pipeline_variant_count(pipeline), 1);

    record_pass(&mut device, Format::Bgra8, image_bgra, list);
    device.cmd_bind_graphics_pipeline(list, pipeline).unwrap();
    let second_hash = device.pipeline_variant_hash(pipeline);
    device.cmd_end_pass(list);
    assert_eq!(device.pipeline_variant_count(pipeline), 2);
    assert_ne!(first_hash, second_hash);

    // Rebinding inside an identical pass is a variant cache hit.
    record_pass(&mut device, Format::Rgba8, image_rgba, list);
    device.cmd_bind_graphics_pipeline(list, pipeline).unwrap();
    assert_eq!(device.pipeline_variant_hash(pipeline), first_hash);
    device.cmd_end_pass(list);
    assert_eq!(device.pipeline_variant_count(pipeline), 2);

    device.end_list(list).unwrap();

    device.destroy_command_pool(pool);
    device.destroy_pipeline(pipeline);
    device.destroy_shader(vs);
    device.destroy_shader(fs);
    device.destroy_image(image_rgba);
    device.destroy_image(image_bgra);
}

#[test]
fn set_pool_reset_allows_reallocation() {
    let Some(mut device) = create_device() else {
        return;
    };

    let bindings = [SetBindingInfo {
        binding: 0,
        binding_type: BindingType::UniformBuffer,
        array_count: 1,
    }];
    let pool = device
        .create_set_pool(&SetPoolInfo {
            layout: SetLayoutInfo {
                bindings: &bindings,
            },
            max_sets: 32,
        })
        .unwrap();

    let first: Vec<Set> = (0..32)
        .map(|_| device.set_pool_allocate(pool).unwrap())
        .collect();
    assert!(device.set_pool_allocate(pool).is_err(), "pool should be full");

    device.set_pool_reset(pool).unwrap();

    let second: Vec<Set> = (0..32)
        .map(|_| device.set_pool_allocate(pool).unwrap())
        .collect();
    for set in &second {
        assert!(
            !first.contains(set),
            "second-generation set aliases a first-generation handle"
        );
    }

    device.destroy_set_pool(pool);
}

#[test]
fn headless_triangle_renders() {
    let Some(mut device) = create_device() else {
        return;
    };

    let target = device.create_image(&color_image_info(Format::Rgba8)).unwrap();
    let readback = device
        .create_buffer(&BufferInfo {
            size: device.image_size(target),
            usage: BufferUsage::TRANSFER_DST,
            host_visible: true,
        })
        .unwrap();

    let vs = device
        .create_shader(&ShaderInfo {
            shader_type: ShaderType::Vertex,
            source: TRIANGLE_VS,
        })
        .unwrap();
    let fs = device
        .create_shader(&ShaderInfo {
            shader_type: ShaderType::Fragment,
            source: TRIANGLE_FS,
        })
        .unwrap();

    let shaders = [vs, fs];
    let blend = [BlendState::disabled()];
    let pipeline = device
        .create_pipeline(&PipelineInfo {
            shaders: &shaders,
            vertex_attributes: &[],
            vertex_bindings: &[],
            primitive_topology: PrimitiveTopology::TriangleList,
            rasterization: RasterizationInfo::default(),
            depth_stencil: DepthStencilInfo::default(),
            blend: PipelineBlendInfo {
                color_attachments: &blend,
            },
            layout: PipelineLayoutInfo { set_layouts: &[] },
        })
        .unwrap();

    let pool = device
        .create_command_pool(&CommandPoolInfo::default())
        .unwrap();
    let list = device.command_pool_allocate(pool).unwrap();

    let attachments = [color_attachment_info(Format::Rgba8)];
    let begin = PassBeginInfo {
        width: 256,
        height: 256,
        pass: PassInfo {
            samples: SampleCount::X1,
            color_attachments: &attachments,
            color_resolve_attachments: None,
            depth_stencil_attachment: None,
            dependency: None,
        },
        color_attachments: &[target],
        color_resolve_attachments: None,
        depth_stencil_attachment: None,
        clear_colors: &[ClearColorValue::F32([0.0, 0.0, 0.0, 0.0])],
        clear_depth_stencil: ClearDepthStencilValue::default(),
    };

    device.begin_list(list).unwrap();
    device.cmd_begin_pass(list, &begin).unwrap();
    device.cmd_bind_graphics_pipeline(list, pipeline).unwrap();
    device.cmd_draw(
        list,
        &DrawInfo {
            vertex_count: 3,
            instance_count: 1,
            vertex_start: 0,
            instance_start: 0,
        },
    );
    device.cmd_end_pass(list);

    device.cmd_image_memory_barrier(
        list,
        PipelineStages::COLOR_ATTACHMENT_OUTPUT,
        PipelineStages::TRANSFER,
        &ImageMemoryBarrier {
            image: target,
            old_layout: ImageLayout::ColorAttachment,
            new_layout: ImageLayout::TransferSrc,
            src_access: Access::COLOR_ATTACHMENT_WRITE,
            dst_access: Access::TRANSFER_READ,
        },
    );
    device.cmd_copy_image_to_buffer(
        list,
        target,
        ImageLayout::TransferSrc,
        readback,
        &[BufferImageCopy {
            buffer_offset: 0,
            image_width: 256,
            image_height: 256,
            image_depth: 1,
            image_layers: 1,
        }],
    );
    device.end_list(list).unwrap();

    let fence = device.create_fence(false).unwrap();
    let queue = device.get_graphics_queue();
    let lists = [list];
    device
        .queue_submit(
            queue,
            &SubmitInfo {
                waits: &[],
                wait_stages: &[],
                lists: &lists,
                signals: &[],
            },
            Some(fence),
        )
        .unwrap();
    device.wait_fence(fence).unwrap();

    device.buffer_map(readback).unwrap();
    let pixel = device.buffer_map_read(readback, 0, 4).to_vec();
    device.buffer_unmap(readback);

    // The full-screen triangle covers the first pixel; alpha is 1.0.
    assert_eq!(pixel[3], 255, "unexpected alpha in {pixel:?}");
    assert_eq!(pixel[0], 255, "unexpected red in {pixel:?}");

    device.destroy_fence(fence);
    device.destroy_command_pool(pool);
    device.destroy_pipeline(pipeline);
    device.destroy_shader(vs);
    device.destroy_shader(fs);
    device.destroy_buffer(readback);
    device.destroy_image(target);
}

#[test]
fn compute_dispatch_doubles_values() {
    let Some(mut device) = create_device() else {
        return;
    };

    const COUNT: usize = 128;

    let buffer = device
        .create_buffer(&BufferInfo {
            size: (COUNT * 4) as u64,
            usage: BufferUsage::STORAGE,
            host_visible: true,
        })
        .unwrap();

    let values: Vec<f32> = (0..COUNT).map(|i| i as f32).collect();
    device.buffer_map(buffer).unwrap();
    device.buffer_map_write(buffer, 0, float_bytes(&values));
    device.buffer_unmap(buffer);

    let cs = device
        .create_shader(&ShaderInfo {
            shader_type: ShaderType::Compute,
            source: DOUBLE_CS,
        })
        .unwrap();
    let reflection = device.shader_reflection(cs);
    assert_eq!(reflection.bindings.len(), 1);
    assert_eq!(reflection.bindings[0].binding_type, BindingType::StorageBuffer);

    let bindings = [SetBindingInfo {
        binding: 0,
        binding_type: BindingType::StorageBuffer,
        array_count: 1,
    }];
    let layout = PipelineLayoutInfo {
        set_layouts: &[SetLayoutInfo {
            bindings: &bindings,
        }],
    };

    let pipeline = device
        .create_compute_pipeline(&ComputePipelineInfo { shader: cs, layout })
        .unwrap();
    assert_eq!(device.pipeline_variant_count(pipeline), 1);

    let pool = device
        .create_set_pool(&SetPoolInfo {
            layout: SetLayoutInfo {
                bindings: &bindings,
            },
            max_sets: 1,
        })
        .unwrap();
    let set = device.set_pool_allocate(pool).unwrap();
    let buffers = [buffer];
    device.update_set_buffers(&[SetBufferUpdate {
        set,
        dst_binding: 0,
        dst_array_index: 0,
        buffer_binding_type: BindingType::StorageBuffer,
        buffers: &buffers,
    }]);

    let cmd_pool = device
        .create_command_pool(&CommandPoolInfo::default())
        .unwrap();
    let list = device.command_pool_allocate(cmd_pool).unwrap();

    device.begin_list(list).unwrap();
    device.cmd_bind_compute_pipeline(list, pipeline);
    let sets = [set];
    device.cmd_bind_compute_sets(list, &layout, 0, &sets).unwrap();
    device.cmd_dispatch(list, (COUNT as u32).div_ceil(64), 1, 1);
    device.end_list(list).unwrap();

    let fence = device.create_fence(false).unwrap();
    let queue = device.get_compute_queue();
    let lists = [list];
    device
        .queue_submit(
            queue,
            &SubmitInfo {
                waits: &[],
                wait_stages: &[],
                lists: &lists,
                signals: &[],
            },
            Some(fence),
        )
        .unwrap();
    device.wait_fence(fence).unwrap();

    device.buffer_map(buffer).unwrap();
    let bytes = device.buffer_map_read(buffer, 0, (COUNT * 4) as u64).to_vec();
    device.buffer_unmap(buffer);

    for (i, chunk) in bytes.chunks_exact(4).enumerate() {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        assert_eq!(value, i as f32 * 2.0, "value {i} not doubled");
    }

    device.destroy_fence(fence);
    device.destroy_command_pool(cmd_pool);
    device.destroy_set_pool(pool);
    device.destroy_pipeline(pipeline);
    device.destroy_shader(cs);
    device.destroy_buffer(buffer);
}

fn float_bytes(values: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values))
    }
}
