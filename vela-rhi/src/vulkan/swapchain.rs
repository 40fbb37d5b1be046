//! Swapchain configuration, image wrapping, acquire and present.

use ash::vk;

use super::image::VulkanImage;
use super::{cast, vk_check, VulkanDevice};
use crate::backend::{AcquireOutcome, PresentOutcome, SwapchainDesc};

/// We ask for one image above the surface minimum so acquire never blocks
/// on the driver handing back an in-flight image.
const SWAPCHAIN_IMAGE_HINT: u32 = 3;

pub(super) struct SwapchainState {
    pub handle: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub width: u32,
    pub height: u32,
    pub images: Vec<vk::Image>,
    pub image_index: u32,
}

impl VulkanDevice {
    pub(super) fn create_swapchain_impl(&mut self, vsync: bool) -> Result<SwapchainDesc, String> {
        let surface_handle = self
            .surface
            .as_ref()
            .ok_or("device is headless")?
            .handle;
        let caps = self.pdevice.surface_caps.ok_or("no surface capabilities")?;

        let mut surface_format = self
            .pdevice
            .surface_formats
            .first()
            .copied()
            .ok_or("no surface formats reported")?;
        for format in &self.pdevice.surface_formats {
            if format.format == vk::Format::B8G8R8A8_UNORM
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            {
                surface_format = *format;
                break;
            }
        }

        // FIFO is guaranteed; mailbox and immediate are upgrades depending
        // on the vsync hint.
        let mut present_mode = vk::PresentModeKHR::FIFO;
        for &mode in &self.pdevice.present_modes {
            if vsync && mode == vk::PresentModeKHR::MAILBOX {
                present_mode = mode;
                break;
            }
            if !vsync && mode == vk::PresentModeKHR::IMMEDIATE {
                present_mode = mode;
                break;
            }
        }

        let mut min_image_count = (caps.min_image_count + 1).max(SWAPCHAIN_IMAGE_HINT);
        if caps.max_image_count > 0 {
            min_image_count = min_image_count.min(caps.max_image_count);
        }

        let mut extent = caps.current_extent;
        if extent.width == u32::MAX || extent.height == u32::MAX {
            // The driver has not observed the surface yet; fall back to the
            // framebuffer size the embedder reported.
            extent = vk::Extent2D {
                width: self.extent_hint.0,
                height: self.extent_hint.1,
            };
        }

        let present_family = self
            .queue_present
            .ok_or("windowed device has no present queue")?
            .family;
        let family_indices = [self.queue_graphics.family, present_family];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface_handle)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        create_info = if self.queue_graphics.family == present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        };

        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or("swapchain extension not loaded")?;
        let handle = vk_check("vkCreateSwapchainKHR", unsafe {
            loader.create_swapchain(&create_info, None)
        })?;
        let images = vk_check("vkGetSwapchainImagesKHR", unsafe {
            loader.get_swapchain_images(handle)
        })?;

        log::info!(
            target: "rhi::vk",
            "swapchain {}x{} with {} images (hint {}, min {}, max {}) {:?}",
            extent.width,
            extent.height,
            images.len(),
            SWAPCHAIN_IMAGE_HINT,
            caps.min_image_count,
            caps.max_image_count,
            present_mode,
        );

        let image_count = images.len() as u32;
        self.swapchain = Some(SwapchainState {
            handle,
            surface_format,
            width: extent.width,
            height: extent.height,
            images,
            image_index: 0,
        });

        Ok(SwapchainDesc {
            image_count,
            width: extent.width,
            height: extent.height,
            format: cast::format_from_vk(surface_format.format),
        })
    }

    /// Wraps one swapchain image in an image slot so passes can target it.
    /// The view is ours; the image itself belongs to the swapchain.
    pub(super) fn register_swapchain_image_impl(
        &mut self,
        image_index: u32,
        image_slot: u32,
    ) -> Result<(), String> {
        let swapchain = self.swapchain.as_ref().ok_or("no swapchain")?;
        let image = swapchain.images[image_index as usize];
        let format = swapchain.surface_format.format;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );
        let view = vk_check("vkCreateImageView", unsafe {
            self.device.create_image_view(&view_info, None)
        })?;

        self.images.set(
            image_slot,
            VulkanImage {
                handle: image,
                allocation: None,
                view,
                sampler: None,
                aspect: vk::ImageAspectFlags::COLOR,
                owns_image: false,
            },
        );
        Ok(())
    }

    pub(super) fn destroy_swapchain_impl(&mut self) {
        if let Some(swapchain) = self.swapchain.take() {
            if let Some(loader) = &self.swapchain_loader {
                unsafe { loader.destroy_swapchain(swapchain.handle, None) };
            }
        }
    }

    pub(super) fn acquire_image_impl(
        &mut self,
        semaphore_slot: u32,
    ) -> Result<AcquireOutcome, String> {
        let semaphore = *self.semaphores.get(semaphore_slot);
        let swapchain = self.swapchain.as_mut().ok_or("no swapchain")?;
        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or("swapchain extension not loaded")?;

        match unsafe {
            loader.acquire_next_image(swapchain.handle, u64::MAX, semaphore, vk::Fence::null())
        } {
            Ok((index, false)) => {
                swapchain.image_index = index;
                Ok(AcquireOutcome::Acquired(index))
            }
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(err) => {
                log::error!(target: "rhi::vk", "vkAcquireNextImageKHR failed: {err:?}");
                Err(format!("vkAcquireNextImageKHR failed: {err:?}"))
            }
        }
    }

    pub(super) fn present_impl(
        &mut self,
        image_index: u32,
        wait_semaphore_slot: u32,
    ) -> Result<PresentOutcome, String> {
        let wait = [*self.semaphores.get(wait_semaphore_slot)];
        let swapchain = self.swapchain.as_ref().ok_or("no swapchain")?;
        let loader = self
            .swapchain_loader
            .as_ref()
            .ok_or("swapchain extension not loaded")?;
        let queue = self
            .queue_present
            .ok_or("windowed device has no present queue")?
            .handle;

        let swapchains = [swapchain.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        // May or may not block, depending on the present mode.
        match unsafe { loader.queue_present(queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(err) => {
                log::error!(target: "rhi::vk", "vkQueuePresentKHR failed: {err:?}");
                Err(format!("vkQueuePresentKHR failed: {err:?}"))
            }
        }
    }
}
