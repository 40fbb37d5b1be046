//! Descriptor set layouts, pools, and bulk set updates.

use ash::vk;

use super::{cast, vk_check, VulkanDevice, VulkanSetPool};
use crate::backend::{SetBufferWrite, SetImageWrite};
use crate::SetBindingInfo;

impl VulkanDevice {
    pub(super) fn create_set_layout_impl(
        &mut self,
        slot: u32,
        bindings: &[SetBindingInfo],
    ) -> Result<(), String> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(cast::binding_type(binding.binding_type))
                    .descriptor_count(binding.array_count.max(1))
                    .stage_flags(vk::ShaderStageFlags::ALL)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let handle = vk_check("vkCreateDescriptorSetLayout", unsafe {
            self.device.create_descriptor_set_layout(&create_info, None)
        })?;

        self.set_layouts.set(slot, handle);
        Ok(())
    }

    /// Pool sizes follow the layout: `array_count * max_sets` descriptors of
    /// each binding's type.
    pub(super) fn create_set_pool_impl(
        &mut self,
        slot: u32,
        layout_slot: u32,
        bindings: &[SetBindingInfo],
        max_sets: u32,
    ) -> Result<(), String> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorPoolSize::default()
                    .ty(cast::binding_type(binding.binding_type))
                    .descriptor_count(binding.array_count.max(1) * max_sets)
            })
            .collect();

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);
        let handle = vk_check("vkCreateDescriptorPool", unsafe {
            self.device.create_descriptor_pool(&create_info, None)
        })?;

        self.set_pools.set(
            slot,
            VulkanSetPool {
                handle,
                layout: *self.set_layouts.get(layout_slot),
            },
        );
        Ok(())
    }

    pub(super) fn allocate_set_impl(&mut self, pool_slot: u32, set_slot: u32) -> Result<(), String> {
        let pool = self.set_pools.get(pool_slot);
        let layouts = [pool.layout];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.handle)
            .set_layouts(&layouts);
        let sets = vk_check("vkAllocateDescriptorSets", unsafe {
            self.device.allocate_descriptor_sets(&info)
        })?;
        self.sets.set(set_slot, sets[0]);
        Ok(())
    }

    pub(super) fn update_set_images_impl(&mut self, writes: &[SetImageWrite]) {
        let image_infos: Vec<Vec<vk::DescriptorImageInfo>> = writes
            .iter()
            .map(|write| {
                write
                    .images
                    .iter()
                    .map(|&(image_slot, layout)| {
                        let image = self.images.get(image_slot);
                        vk::DescriptorImageInfo::default()
                            .sampler(image.sampler.unwrap_or(vk::Sampler::null()))
                            .image_view(image.view)
                            .image_layout(cast::image_layout(layout))
                    })
                    .collect()
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&image_infos)
            .map(|(write, infos)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(*self.sets.get(write.set_slot))
                    .dst_binding(write.dst_binding)
                    .dst_array_element(write.dst_array_index)
                    .descriptor_type(cast::binding_type(write.binding_type))
                    .image_info(infos)
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    pub(super) fn update_set_buffers_impl(&mut self, writes: &[SetBufferWrite]) {
        let buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = writes
            .iter()
            .map(|write| {
                write
                    .buffers
                    .iter()
                    .map(|&buffer_slot| {
                        vk::DescriptorBufferInfo::default()
                            .buffer(self.buffers.get(buffer_slot).handle)
                            .offset(0)
                            .range(vk::WHOLE_SIZE)
                    })
                    .collect()
            })
            .collect();

        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&buffer_infos)
            .map(|(write, infos)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(*self.sets.get(write.set_slot))
                    .dst_binding(write.dst_binding)
                    .dst_array_element(write.dst_array_index)
                    .descriptor_type(cast::binding_type(write.binding_type))
                    .buffer_info(infos)
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }
}
