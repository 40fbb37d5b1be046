//! Images with their full-range view and optional sampler.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::{cast, vk_check, VulkanDevice};
use crate::{ImageInfo, ImageType, ImageUsage};

pub(super) struct VulkanImage {
    pub handle: vk::Image,
    pub allocation: Option<Allocation>,
    pub view: vk::ImageView,
    pub sampler: Option<vk::Sampler>,
    pub aspect: vk::ImageAspectFlags,
    /// Swapchain images are owned by the swapchain, not by us.
    pub owns_image: bool,
}

impl VulkanDevice {
    pub(super) fn create_image_impl(&mut self, slot: u32, info: &ImageInfo) -> Result<(), String> {
        let vk_format = cast::format(info.format);
        let aspect = cast::format_aspect(info.format);

        let mut flags = vk::ImageCreateFlags::empty();
        if info.image_type == ImageType::Cube {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let create_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(cast::image_type(info.image_type))
            .format(vk_format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: info.depth,
            })
            .mip_levels(1)
            .array_layers(info.layers)
            .samples(cast::sample_count(info.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(cast::image_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let handle = vk_check("vkCreateImage", unsafe {
            self.device.create_image(&create_info, None)
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(handle) };
        let allocation = match self.allocator_mut().allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_image(handle, None) };
                log::error!(target: "rhi::vk", "image allocation failed: {err}");
                return Err(format!("image allocation failed: {err}"));
            }
        };
        if let Err(err) = vk_check("vkBindImageMemory", unsafe {
            self.device
                .bind_image_memory(handle, allocation.memory(), allocation.offset())
        }) {
            let _ = self.allocator_mut().free(allocation);
            unsafe { self.device.destroy_image(handle, None) };
            return Err(err);
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(cast::image_view_type(info.image_type))
            .format(vk_format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );
        let view = vk_check("vkCreateImageView", unsafe {
            self.device.create_image_view(&view_info, None)
        })?;

        let sampler = if info.usage.contains(ImageUsage::SAMPLED) {
            let address_mode = cast::address_mode(info.sampler.address_mode);
            // Mip LOD range is fixed at [0, 1]; images are single-mip.
            let sampler_info = vk::SamplerCreateInfo::default()
                .mag_filter(cast::filter(info.sampler.filter))
                .min_filter(cast::filter(info.sampler.filter))
                .mipmap_mode(cast::mipmap_mode(info.sampler.mipmap_filter))
                .address_mode_u(address_mode)
                .address_mode_v(address_mode)
                .address_mode_w(address_mode)
                .mip_lod_bias(0.0)
                .min_lod(0.0)
                .max_lod(1.0);
            Some(vk_check("vkCreateSampler", unsafe {
                self.device.create_sampler(&sampler_info, None)
            })?)
        } else {
            None
        };

        self.images.set(
            slot,
            VulkanImage {
                handle,
                allocation: Some(allocation),
                view,
                sampler,
                aspect,
                owns_image: true,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_image_impl(&mut self, slot: u32) {
        if let Some(image) = self.images.take(slot) {
            self.release_image(image);
        }
    }

    pub(super) fn release_image(&mut self, image: VulkanImage) {
        unsafe {
            if let Some(sampler) = image.sampler {
                self.device.destroy_sampler(sampler, None);
            }
            self.device.destroy_image_view(image.view, None);
            if image.owns_image {
                self.device.destroy_image(image.handle, None);
            }
        }
        if let Some(allocation) = image.allocation {
            let _ = self.allocator_mut().free(allocation);
        }
    }
}
