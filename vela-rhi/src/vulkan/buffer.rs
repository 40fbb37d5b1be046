//! Buffers and host mapping through the device allocator.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::{cast, vk_check, VulkanDevice};
use crate::BufferInfo;

pub(super) struct VulkanBuffer {
    pub handle: vk::Buffer,
    pub allocation: Option<Allocation>,
    /// Base pointer of the exclusive host mapping, while mapped. The
    /// allocator keeps host-visible memory persistently mapped; this tracks
    /// the map/unmap discipline on top of it.
    pub host_map: Option<*mut u8>,
}

impl VulkanDevice {
    pub(super) fn create_buffer_impl(&mut self, slot: u32, info: &BufferInfo) -> Result<(), String> {
        let create_info = vk::BufferCreateInfo::default()
            .size(info.size.max(1))
            .usage(cast::buffer_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = vk_check("vkCreateBuffer", unsafe {
            self.device.create_buffer(&create_info, None)
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(handle) };
        let location = if info.host_visible {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let allocation = match self.allocator_mut().allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(handle, None) };
                log::error!(target: "rhi::vk", "buffer allocation failed: {err}");
                return Err(format!("buffer allocation failed: {err}"));
            }
        };

        if let Err(err) = vk_check("vkBindBufferMemory", unsafe {
            self.device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        }) {
            let _ = self.allocator_mut().free(allocation);
            unsafe { self.device.destroy_buffer(handle, None) };
            return Err(err);
        }

        self.buffers.set(
            slot,
            VulkanBuffer {
                handle,
                allocation: Some(allocation),
                host_map: None,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_buffer_impl(&mut self, slot: u32) {
        if let Some(buffer) = self.buffers.take(slot) {
            self.release_buffer(buffer);
        }
    }

    pub(super) fn release_buffer(&mut self, buffer: VulkanBuffer) {
        if let Some(allocation) = buffer.allocation {
            let _ = self.allocator_mut().free(allocation);
        }
        unsafe { self.device.destroy_buffer(buffer.handle, None) };
    }

    pub(super) fn map_buffer_impl(&mut self, slot: u32) -> Result<(), String> {
        let buffer = self.buffers.get_mut(slot);
        let ptr = buffer
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or("buffer memory is not host visible")?;
        buffer.host_map = Some(ptr.as_ptr().cast());
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
        self.buffers.get_mut(slot).host_map = None;
    }
}
