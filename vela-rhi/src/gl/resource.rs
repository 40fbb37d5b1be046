//! Buffers, images and samplers on the OpenGL backend.

use glow::HasContext;

use super::{cast, OpenGlDevice};
use crate::{BufferInfo, ImageInfo, ImageUsage, SampleCount};

pub(super) struct GlBuffer {
    pub handle: glow::Buffer,
    pub size: u64,
    pub host_map: Option<*mut u8>,
}

pub(super) struct GlImage {
    pub handle: glow::Texture,
    pub target: u32,
    pub internal_format: u32,
    pub data_format: u32,
    pub data_type: u32,
    pub sampler: Option<glow::Sampler>,
}

impl OpenGlDevice {
    pub(super) fn create_buffer_impl(&mut self, slot: u32, info: &BufferInfo) -> Result<(), String> {
        let size = info.size.max(1);
        let handle = unsafe {
            let handle = self.gl.create_buffer()?;
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(handle));
            self.gl
                .buffer_data_size(glow::COPY_WRITE_BUFFER, size as i32, glow::DYNAMIC_DRAW);
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            handle
        };
        self.buffers.set(
            slot,
            GlBuffer {
                handle,
                size,
                host_map: None,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_buffer_impl(&mut self, slot: u32) {
        if let Some(buffer) = self.buffers.take(slot) {
            unsafe { self.gl.delete_buffer(buffer.handle) };
        }
    }

    pub(super) fn map_buffer_impl(&mut self, slot: u32) -> Result<(), String> {
        let buffer = self.buffers.get(slot);
        let ptr = unsafe {
            self.gl
                .bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer.handle));
            let ptr = self.gl.map_buffer_range(
                glow::COPY_WRITE_BUFFER,
                0,
                buffer.size as i32,
                glow::MAP_READ_BIT | glow::MAP_WRITE_BIT,
            );
            self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            ptr
        };
        if ptr.is_null() {
            return Err("glMapBufferRange returned null".to_string());
        }
        self.buffers.get_mut(slot).host_map = Some(ptr);
        Ok(())
    }

    pub(super) fn map_read_impl(&self, slot: u32, offset: u64, size: u64) -> &[u8] {
        let buffer = self.buffers.get(slot);
        let base = buffer.host_map.expect("buffer is not mapped");
        unsafe { std::slice::from_raw_parts(base.add(offset as usize), size as usize) }
    }

    pub(super) fn map_write_impl(&mut self, slot: u32, offset: u64, data: &[u8]) {
        let buffer = self.buffers.get_mut(slot);
        let base = buffer.host_map.expect("buffer is not mapped");
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(offset as usize), data.len());
        }
    }

    pub(super) fn unmap_buffer_impl(&mut self, slot: u32) {
        let buffer = self.buffers.get_mut(slot);
        if buffer.host_map.take().is_some() {
            unsafe {
                self.gl
                    .bind_buffer(glow::COPY_WRITE_BUFFER, Some(buffer.handle));
                self.gl.unmap_buffer(glow::COPY_WRITE_BUFFER);
                self.gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            }
        }
    }

    pub(super) fn create_image_impl(&mut self, slot: u32, info: &ImageInfo) -> Result<(), String> {
        let (internal_format, data_format, data_type) = cast::format(info.format);
        let target = cast::image_target(info.image_type);

        let handle = unsafe {
            let handle = self.gl.create_texture()?;
            self.gl.bind_texture(target, Some(handle));
            if info.samples == SampleCount::X1 {
                self.gl.tex_storage_2d(
                    target,
                    1,
                    internal_format,
                    info.width as i32,
                    info.height as i32,
                );
            } else {
                self.gl.tex_storage_2d_multisample(
                    target,
                    info.samples as i32,
                    internal_format,
                    info.width as i32,
                    info.height as i32,
                    true,
                );
            }
            self.gl.bind_texture(target, None);
            handle
        };

        let sampler = if info.usage.contains(ImageUsage::SAMPLED) {
            let sampler = unsafe { self.gl.create_sampler()? };
            let address_mode = cast::address_mode(info.sampler.address_mode) as i32;
            unsafe {
                self.gl.sampler_parameter_i32(
                    sampler,
                    glow::TEXTURE_MIN_FILTER,
                    cast::min_filter(info.sampler.filter, info.sampler.mipmap_filter) as i32,
                );
                self.gl.sampler_parameter_i32(
                    sampler,
                    glow::TEXTURE_MAG_FILTER,
                    cast::mag_filter(info.sampler.filter) as i32,
                );
                self.gl
                    .sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_S, address_mode);
                self.gl
                    .sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_T, address_mode);
                self.gl
                    .sampler_parameter_i32(sampler, glow::TEXTURE_WRAP_R, address_mode);
            }
            Some(sampler)
        } else {
            None
        };

        self.images.set(
            slot,
            GlImage {
                handle,
                target,
                internal_format,
                data_format,
                data_type,
                sampler,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_image_impl(&mut self, slot: u32) {
        if let Some(image) = self.images.take(slot) {
            unsafe {
                if let Some(sampler) = image.sampler {
                    self.gl.delete_sampler(sampler);
                }
                self.gl.delete_texture(image.handle);
            }
        }
    }
}
