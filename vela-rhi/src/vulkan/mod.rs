//! Vulkan backend. Commands record immediately into native command buffers.

mod buffer;
mod cast;
mod command;
mod descriptor;
mod image;
mod pass;
mod pipeline;
mod swapchain;

use std::ffi::{c_void, CStr, CString};

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::{
    AcquireOutcome, BeginPassData, ComputePipelineDesc, FramebufferDesc, GpuBackend,
    GraphicsPipelineDesc, PassData, PresentOutcome, SetBufferWrite, SetImageWrite, SlotStore,
    SubmitData, SwapchainDesc, VariantDesc,
};
use crate::{
    Access, BufferCopy, BufferImageCopy, BufferInfo, CommandPoolInfo, DeviceBackend,
    DrawIndexedInfo, DrawInfo, Filter, Format, ImageBlit, ImageInfo, ImageLayout, IndexType,
    QueueFamily, Rect, SampleCount, SetBindingInfo, ShaderType,
};

use buffer::VulkanBuffer;
use image::VulkanImage;
use pipeline::VulkanPipeline;
use swapchain::SwapchainState;

const DEPTH_STENCIL_CANDIDATES: [Format; 2] = [Format::D32FS8U, Format::D24S8U];

pub(super) fn vk_check<T>(what: &str, result: ash::prelude::VkResult<T>) -> Result<T, String> {
    result.map_err(|err| {
        log::error!(target: "rhi::vk", "{what} failed: {err:?}");
        format!("{what} failed: {err:?}")
    })
}

unsafe extern "system" fn debug_utils_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if callback_data.is_null() {
        String::new()
    } else {
        (*callback_data)
            .message_as_c_str()
            .map(|m| m.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!(target: "rhi::vk", "{message}");
        debug_assert!(false, "Vulkan validation error: {message}");
    } else {
        log::warn!(target: "rhi::vk", "{message}");
    }

    vk::FALSE
}

struct SurfaceState {
    loader: ash::khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

/// Properties gathered once per physical device.
struct PhysicalDeviceState {
    handle: vk::PhysicalDevice,
    features: vk::PhysicalDeviceFeatures,
    family_props: Vec<vk::QueueFamilyProperties>,
    surface_caps: Option<vk::SurfaceCapabilitiesKHR>,
    surface_formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    depth_stencil_formats: Vec<Format>,
    msaa_cap: vk::SampleCountFlags,
}

#[derive(Clone, Copy)]
struct QueueState {
    family: u32,
    handle: vk::Queue,
}

struct VulkanSetPool {
    handle: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
}

struct VulkanCommandList {
    handle: vk::CommandBuffer,
}

pub(crate) struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<SurfaceState>,
    pdevice: PhysicalDeviceState,
    device: ash::Device,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    allocator: Option<gpu_allocator::vulkan::Allocator>,
    queue_graphics: QueueState,
    queue_transfer: QueueState,
    queue_compute: QueueState,
    queue_present: Option<QueueState>,
    swapchain: Option<SwapchainState>,
    /// Fallback framebuffer size for when the surface reports no extent.
    extent_hint: (u32, u32),

    buffers: SlotStore<VulkanBuffer>,
    images: SlotStore<VulkanImage>,
    shaders: SlotStore<vk::ShaderModule>,
    passes: SlotStore<vk::RenderPass>,
    framebuffers: SlotStore<vk::Framebuffer>,
    set_layouts: SlotStore<vk::DescriptorSetLayout>,
    sets: SlotStore<vk::DescriptorSet>,
    set_pools: SlotStore<VulkanSetPool>,
    pipeline_layouts: SlotStore<vk::PipelineLayout>,
    pipelines: SlotStore<VulkanPipeline>,
    command_pools: SlotStore<vk::CommandPool>,
    command_lists: SlotStore<VulkanCommandList>,
    semaphores: SlotStore<vk::Semaphore>,
    fences: SlotStore<vk::Fence>,
}

impl VulkanDevice {
    pub fn new_headless() -> Result<Self, String> {
        Self::create(None, (1, 1))
    }

    pub fn new_windowed(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        framebuffer_extent: (u32, u32),
    ) -> Result<Self, String> {
        Self::create(Some((display, window)), framebuffer_extent)
    }

    fn create(
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
        extent_hint: (u32, u32),
    ) -> Result<Self, String> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| format!("Vulkan loader not available: {err}"))?;

        let instance = Self::create_instance(&entry, window.map(|(display, _)| display))?;

        let debug_utils = if cfg!(debug_assertions) || cfg!(feature = "validation") {
            Self::create_debug_messenger(&entry, &instance)
        } else {
            None
        };

        let surface = match window {
            Some((display, window)) => {
                let handle = vk_check("vkCreateSurfaceKHR", unsafe {
                    ash_window::create_surface(&entry, &instance, display, window, None)
                })?;
                Some(SurfaceState {
                    loader: ash::khr::surface::Instance::new(&entry, &instance),
                    handle,
                })
            }
            None => None,
        };

        let pdevice = Self::choose_physical_device(&instance, surface.as_ref())?;

        let family_count = pdevice.family_props.len() as u32;
        let mut family_graphics = None;
        let mut family_transfer = None;
        let mut family_compute = None;
        let mut family_present = None;

        for (idx, props) in pdevice.family_props.iter().enumerate() {
            let idx = idx as u32;

            // TODO: `|` accepts the first reported family for every role; an
            // intersection test was probably intended here.
            if family_graphics.is_none()
                && !(props.queue_flags | vk::QueueFlags::GRAPHICS).is_empty()
            {
                family_graphics = Some(idx);
            }
            if family_transfer.is_none()
                && !(props.queue_flags | vk::QueueFlags::TRANSFER).is_empty()
            {
                family_transfer = Some(idx);
            }
            if family_compute.is_none() && !(props.queue_flags | vk::QueueFlags::COMPUTE).is_empty()
            {
                family_compute = Some(idx);
            }

            if let Some(surface) = &surface {
                let supported = unsafe {
                    surface
                        .loader
                        .get_physical_device_surface_support(pdevice.handle, idx, surface.handle)
                }
                .unwrap_or(false);
                if family_present.is_none() && supported {
                    family_present = Some(idx);
                }
            }
        }

        let family_graphics = family_graphics.ok_or("no graphics queue family")?;
        let family_transfer = family_transfer.ok_or("no transfer queue family")?;
        let family_compute = family_compute.ok_or("no compute queue family")?;
        if surface.is_some() && family_present.is_none() {
            return Err("no present queue family".to_string());
        }

        log::info!(
            target: "rhi::vk",
            "queue families: graphics {family_graphics}, transfer {family_transfer}, \
             compute {family_compute}, present {family_present:?}"
        );

        // One queue from every reported family, priority 1.
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = (0..family_count)
            .map(|idx| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(idx)
                    .queue_priorities(&priorities)
            })
            .collect();

        let mut device_exts: Vec<*const i8> = Vec::new();
        if surface.is_some() {
            device_exts.push(ash::khr::swapchain::NAME.as_ptr());
        }

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_exts)
            .enabled_features(&pdevice.features);
        let device = vk_check("vkCreateDevice", unsafe {
            instance.create_device(pdevice.handle, &device_info, None)
        })?;

        let queue = |family: u32| QueueState {
            family,
            handle: unsafe { device.get_device_queue(family, 0) },
        };
        let queue_graphics = queue(family_graphics);
        let queue_transfer = queue(family_transfer);
        let queue_compute = queue(family_compute);
        let queue_present = family_present.map(queue);

        let swapchain_loader = surface
            .as_ref()
            .map(|_| ash::khr::swapchain::Device::new(&instance, &device));

        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device: pdevice.handle,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })
            .map_err(|err| format!("allocator init failed: {err}"))?;

        Ok(Self {
            _entry: entry,
            instance,
            debug_utils,
            surface,
            pdevice,
            device,
            swapchain_loader,
            allocator: Some(allocator),
            queue_graphics,
            queue_transfer,
            queue_compute,
            queue_present,
            swapchain: None,
            extent_hint,
            buffers: SlotStore::new(),
            images: SlotStore::new(),
            shaders: SlotStore::new(),
            passes: SlotStore::new(),
            framebuffers: SlotStore::new(),
            set_layouts: SlotStore::new(),
            sets: SlotStore::new(),
            set_pools: SlotStore::new(),
            pipeline_layouts: SlotStore::new(),
            pipelines: SlotStore::new(),
            command_pools: SlotStore::new(),
            command_lists: SlotStore::new(),
            semaphores: SlotStore::new(),
            fences: SlotStore::new(),
        })
    }

    fn create_instance(
        entry: &ash::Entry,
        display: Option<RawDisplayHandle>,
    ) -> Result<ash::Instance, String> {
        let supported_exts: Vec<CString> = unsafe {
            entry.enumerate_instance_extension_properties(None)
        }
        .map_err(|err| format!("vkEnumerateInstanceExtensionProperties failed: {err:?}"))?
        .iter()
        .filter_map(|props| props.extension_name_as_c_str().ok().map(CStr::to_owned))
        .collect();

        let supported_layers: Vec<CString> =
            unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(|err| format!("vkEnumerateInstanceLayerProperties failed: {err:?}"))?
                .iter()
                .filter_map(|props| props.layer_name_as_c_str().ok().map(CStr::to_owned))
                .collect();

        let mut desired_exts: Vec<&CStr> = Vec::new();
        if cfg!(debug_assertions) || cfg!(feature = "validation") {
            desired_exts.push(ash::ext::debug_utils::NAME);
        }
        if let Some(display) = display {
            let surface_exts = ash_window::enumerate_required_extensions(display)
                .map_err(|err| format!("surface extension query failed: {err:?}"))?;
            for &ext in surface_exts {
                desired_exts.push(unsafe { CStr::from_ptr(ext) });
            }
        }

        // Requested = desired ∩ supported; missing extensions are dropped.
        let requested_exts: Vec<*const i8> = desired_exts
            .iter()
            .filter(|&&ext| supported_exts.iter().any(|s| s.as_c_str() == ext))
            .map(|ext| ext.as_ptr())
            .collect();

        let validation_layer = c"VK_LAYER_KHRONOS_validation";
        let mut requested_layers: Vec<*const i8> = Vec::new();
        if (cfg!(debug_assertions) || cfg!(feature = "validation"))
            && supported_layers
                .iter()
                .any(|s| s.as_c_str() == validation_layer)
        {
            requested_layers.push(validation_layer.as_ptr());
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"vela")
            .engine_name(c"vela")
            .api_version(vk::API_VERSION_1_3);
        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&requested_layers)
            .enabled_extension_names(&requested_exts);

        vk_check("vkCreateInstance", unsafe {
            entry.create_instance(&instance_info, None)
        })
    }

    fn create_debug_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_utils_callback));

        match unsafe { loader.create_debug_utils_messenger(&info, None) } {
            Ok(messenger) => Some((loader, messenger)),
            Err(err) => {
                log::warn!(target: "rhi::vk", "debug messenger unavailable: {err:?}");
                None
            }
        }
    }

    /// Picks the first enumerated physical device and snapshots everything
    /// the rest of the backend needs from it. The policy is intentionally
    /// simple and deterministic.
    fn choose_physical_device(
        instance: &ash::Instance,
        surface: Option<&SurfaceState>,
    ) -> Result<PhysicalDeviceState, String> {
        let handles = vk_check("vkEnumeratePhysicalDevices", unsafe {
            instance.enumerate_physical_devices()
        })?;
        let handle = *handles.first().ok_or("no Vulkan physical device")?;

        let props = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let family_props = unsafe { instance.get_physical_device_queue_family_properties(handle) };

        let device_name = props
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!(target: "rhi::vk", "physical device: {device_name}");

        let limits = &props.limits;
        let counts =
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;
        let msaa_cap = [
            vk::SampleCountFlags::TYPE_64,
            vk::SampleCountFlags::TYPE_32,
            vk::SampleCountFlags::TYPE_16,
            vk::SampleCountFlags::TYPE_8,
            vk::SampleCountFlags::TYPE_4,
            vk::SampleCountFlags::TYPE_2,
        ]
        .into_iter()
        .find(|&bit| counts.contains(bit))
        .unwrap_or(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_formats = DEPTH_STENCIL_CANDIDATES
            .into_iter()
            .filter(|&candidate| {
                let format_props = unsafe {
                    instance.get_physical_device_format_properties(handle, cast::format(candidate))
                };
                format_props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .collect();

        let (surface_caps, surface_formats, present_modes) = match surface {
            Some(surface) => unsafe {
                let caps = vk_check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", {
                    surface
                        .loader
                        .get_physical_device_surface_capabilities(handle, surface.handle)
                })?;
                let formats = vk_check("vkGetPhysicalDeviceSurfaceFormatsKHR", {
                    surface
                        .loader
                        .get_physical_device_surface_formats(handle, surface.handle)
                })?;
                let modes = vk_check("vkGetPhysicalDeviceSurfacePresentModesKHR", {
                    surface
                        .loader
                        .get_physical_device_surface_present_modes(handle, surface.handle)
                })?;
                (Some(caps), formats, modes)
            },
            None => (None, Vec::new(), Vec::new()),
        };

        Ok(PhysicalDeviceState {
            handle,
            features,
            family_props,
            surface_caps,
            surface_formats,
            present_modes,
            depth_stencil_formats,
            msaa_cap,
        })
    }

    fn queue(&self, family: QueueFamily) -> QueueState {
        match family {
            QueueFamily::Graphics => self.queue_graphics,
            QueueFamily::Transfer => self.queue_transfer,
            QueueFamily::Compute => self.queue_compute,
            QueueFamily::Present => self
                .queue_present
                .expect("present queue on a headless device"),
        }
    }

    fn allocator_mut(&mut self) -> &mut gpu_allocator::vulkan::Allocator {
        self.allocator.as_mut().expect("allocator already shut down")
    }

    fn list(&self, slot: u32) -> vk::CommandBuffer {
        self.command_lists.get(slot).handle
    }
}

impl GpuBackend for VulkanDevice {
    fn backend(&self) -> DeviceBackend {
        DeviceBackend::Vulkan
    }

    fn create_semaphore(&mut self, slot: u32) -> Result<(), String> {
        let info = vk::SemaphoreCreateInfo::default();
        let handle = vk_check("vkCreateSemaphore", unsafe {
            self.device.create_semaphore(&info, None)
        })?;
        self.semaphores.set(slot, handle);
        Ok(())
    }

    fn destroy_semaphore(&mut self, slot: u32) {
        if let Some(handle) = self.semaphores.take(slot) {
            unsafe { self.device.destroy_semaphore(handle, None) };
        }
    }

    fn create_fence(&mut self, slot: u32, signaled: bool) -> Result<(), String> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let handle = vk_check("vkCreateFence", unsafe {
            self.device.create_fence(&info, None)
        })?;
        self.fences.set(slot, handle);
        Ok(())
    }

    fn destroy_fence(&mut self, slot: u32) {
        if let Some(handle) = self.fences.take(slot) {
            unsafe { self.device.destroy_fence(handle, None) };
        }
    }

    fn wait_fence(&mut self, slot: u32) -> Result<(), String> {
        let fence = [*self.fences.get(slot)];
        vk_check("vkWaitForFences", unsafe {
            self.device.wait_for_fences(&fence, true, u64::MAX)
        })
    }

    fn reset_fence(&mut self, slot: u32) -> Result<(), String> {
        let fence = [*self.fences.get(slot)];
        vk_check("vkResetFences", unsafe { self.device.reset_fences(&fence) })
    }

    fn create_buffer(&mut self, slot: u32, info: &BufferInfo) -> Result<(), String> {
        self.create_buffer_impl(slot, info)
    }

    fn destroy_buffer(&mut self, slot: u32) {
        self.destroy_buffer_impl(slot);
    }

    fn map_buffer(&mut self, slot: u32) -> Result<(), String> {
        self.map_buffer_impl(slot)
    }

    fn map_read(&self, slot: u32, offset: u64, size: u64) -> &[u8] {
        self.map_read_impl(slot, offset, size)
    }

    fn map_write(&mut self, slot: u32, offset: u64, data: &[u8]) {
        self.map_write_impl(slot, offset, data);
    }

    fn unmap_buffer(&mut self, slot: u32) {
        self.unmap_buffer_impl(slot);
    }

    fn create_image(&mut self, slot: u32, info: &ImageInfo) -> Result<(), String> {
        self.create_image_impl(slot, info)
    }

    fn destroy_image(&mut self, slot: u32) {
        self.destroy_image_impl(slot);
    }

    fn create_shader(
        &mut self,
        slot: u32,
        _shader_type: ShaderType,
        spirv: &[u32],
    ) -> Result<(), String> {
        let info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = vk_check("vkCreateShaderModule", unsafe {
            self.device.create_shader_module(&info, None)
        })?;
        self.shaders.set(slot, module);
        Ok(())
    }

    fn destroy_shader(&mut self, slot: u32) {
        if let Some(module) = self.shaders.take(slot) {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
    }

    fn create_pass(&mut self, slot: u32, pass: &PassData) -> Result<(), String> {
        self.create_pass_impl(slot, pass)
    }

    fn destroy_pass(&mut self, slot: u32) {
        if let Some(handle) = self.passes.take(slot) {
            unsafe { self.device.destroy_render_pass(handle, None) };
        }
    }

    fn create_framebuffer(&mut self, slot: u32, desc: &FramebufferDesc) -> Result<(), String> {
        self.create_framebuffer_impl(slot, desc)
    }

    fn destroy_framebuffer(&mut self, slot: u32) {
        if let Some(handle) = self.framebuffers.take(slot) {
            unsafe { self.device.destroy_framebuffer(handle, None) };
        }
    }

    fn create_set_layout(&mut self, slot: u32, bindings: &[SetBindingInfo]) -> Result<(), String> {
        self.create_set_layout_impl(slot, bindings)
    }

    fn destroy_set_layout(&mut self, slot: u32) {
        if let Some(handle) = self.set_layouts.take(slot) {
            unsafe { self.device.destroy_descriptor_set_layout(handle, None) };
        }
    }

    fn create_set_pool(
        &mut self,
        slot: u32,
        layout_slot: u32,
        bindings: &[SetBindingInfo],
        max_sets: u32,
    ) -> Result<(), String> {
        self.create_set_pool_impl(slot, layout_slot, bindings, max_sets)
    }

    fn destroy_set_pool(&mut self, slot: u32) {
        if let Some(pool) = self.set_pools.take(slot) {
            unsafe { self.device.destroy_descriptor_pool(pool.handle, None) };
        }
    }

    fn allocate_set(&mut self, pool_slot: u32, set_slot: u32) -> Result<(), String> {
        self.allocate_set_impl(pool_slot, set_slot)
    }

    fn reset_set_pool(&mut self, pool_slot: u32) -> Result<(), String> {
        let pool = self.set_pools.get(pool_slot).handle;
        vk_check("vkResetDescriptorPool", unsafe {
            self.device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
        })
    }

    fn update_set_images(&mut self, writes: &[SetImageWrite]) {
        self.update_set_images_impl(writes);
    }

    fn update_set_buffers(&mut self, writes: &[SetBufferWrite]) {
        self.update_set_buffers_impl(writes);
    }

    fn create_pipeline_layout(
        &mut self,
        slot: u32,
        set_layout_slots: &[u32],
        _set_layout_bindings: &[&[SetBindingInfo]],
    ) -> Result<(), String> {
        self.create_pipeline_layout_impl(slot, set_layout_slots)
    }

    fn destroy_pipeline_layout(&mut self, slot: u32) {
        if let Some(handle) = self.pipeline_layouts.take(slot) {
            unsafe { self.device.destroy_pipeline_layout(handle, None) };
        }
    }

    fn create_pipeline(&mut self, slot: u32, desc: &GraphicsPipelineDesc) -> Result<(), String> {
        self.create_pipeline_impl(slot, desc)
    }

    fn create_compute_pipeline(
        &mut self,
        slot: u32,
        desc: &ComputePipelineDesc,
    ) -> Result<(), String> {
        self.create_compute_pipeline_impl(slot, desc)
    }

    fn destroy_pipeline(&mut self, slot: u32) {
        self.destroy_pipeline_impl(slot);
    }

    fn create_pipeline_variant(
        &mut self,
        pipeline_slot: u32,
        desc: &VariantDesc,
    ) -> Result<(), String> {
        self.create_pipeline_variant_impl(pipeline_slot, desc)
    }

    fn pipeline_variant_count(&self, pipeline_slot: u32) -> usize {
        self.pipelines.get(pipeline_slot).handles.len()
    }

    fn create_command_pool(&mut self, slot: u32, info: &CommandPoolInfo) -> Result<(), String> {
        let mut flags = vk::CommandPoolCreateFlags::empty();
        if info.transient {
            flags |= vk::CommandPoolCreateFlags::TRANSIENT;
        }
        if info.list_resettable {
            flags |= vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER;
        }
        // TODO: parameterize the queue family once pools carry a queue type.
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(flags)
            .queue_family_index(self.queue_graphics.family);
        let handle = vk_check("vkCreateCommandPool", unsafe {
            self.device.create_command_pool(&create_info, None)
        })?;
        self.command_pools.set(slot, handle);
        Ok(())
    }

    fn destroy_command_pool(&mut self, slot: u32, list_slots: &[u32]) {
        for &list_slot in list_slots {
            self.command_lists.take(list_slot);
        }
        if let Some(handle) = self.command_pools.take(slot) {
            unsafe { self.device.destroy_command_pool(handle, None) };
        }
    }

    fn allocate_command_list(&mut self, pool_slot: u32, list_slot: u32) -> Result<(), String> {
        let pool = *self.command_pools.get(pool_slot);
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let handles = vk_check("vkAllocateCommandBuffers", unsafe {
            self.device.allocate_command_buffers(&info)
        })?;
        self.command_lists.set(
            list_slot,
            VulkanCommandList {
                handle: handles[0],
            },
        );
        Ok(())
    }

    fn reset_command_pool(&mut self, pool_slot: u32, _list_slots: &[u32]) -> Result<(), String> {
        let pool = *self.command_pools.get(pool_slot);
        vk_check("vkResetCommandPool", unsafe {
            self.device
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        })
    }

    fn begin_list(&mut self, list: u32, one_time_submit: bool) -> Result<(), String> {
        self.begin_list_impl(list, one_time_submit)
    }

    fn end_list(&mut self, list: u32) -> Result<(), String> {
        vk_check("vkEndCommandBuffer", unsafe {
            self.device.end_command_buffer(self.list(list))
        })
    }

    fn reset_list(&mut self, list: u32) -> Result<(), String> {
        vk_check("vkResetCommandBuffer", unsafe {
            self.device
                .reset_command_buffer(self.list(list), vk::CommandBufferResetFlags::empty())
        })
    }

    fn cmd_begin_pass(&mut self, list: u32, data: BeginPassData) {
        self.cmd_begin_pass_impl(list, &data);
    }

    fn cmd_end_pass(&mut self, list: u32) {
        unsafe { self.device.cmd_end_render_pass(self.list(list)) };
    }

    fn cmd_push_constant(&mut self, list: u32, layout_slot: u32, offset: u32, data: &[u8]) {
        let layout = *self.pipeline_layouts.get(layout_slot);
        unsafe {
            self.device.cmd_push_constants(
                self.list(list),
                layout,
                vk::ShaderStageFlags::ALL,
                offset,
                data,
            );
        }
    }

    fn cmd_bind_graphics_pipeline(
        &mut self,
        list: u32,
        pipeline_slot: u32,
        variant_hash: u64,
        depth_test_enable: bool,
        _color_write_masks: &[crate::ColorComponents],
    ) {
        // Write masks are baked into the bound variant.
        self.cmd_bind_graphics_pipeline_impl(list, pipeline_slot, variant_hash, depth_test_enable);
    }

    fn cmd_bind_compute_pipeline(&mut self, list: u32, pipeline_slot: u32) {
        self.cmd_bind_compute_pipeline_impl(list, pipeline_slot);
    }

    fn cmd_bind_graphics_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    ) {
        self.cmd_bind_sets_impl(
            list,
            vk::PipelineBindPoint::GRAPHICS,
            layout_slot,
            first_set,
            set_slots,
        );
    }

    fn cmd_bind_compute_sets(
        &mut self,
        list: u32,
        layout_slot: u32,
        first_set: u32,
        set_slots: &[u32],
    ) {
        self.cmd_bind_sets_impl(
            list,
            vk::PipelineBindPoint::COMPUTE,
            layout_slot,
            first_set,
            set_slots,
        );
    }

    fn cmd_bind_vertex_buffers(&mut self, list: u32, first_binding: u32, buffer_slots: &[u32]) {
        self.cmd_bind_vertex_buffers_impl(list, first_binding, buffer_slots);
    }

    fn cmd_bind_index_buffer(&mut self, list: u32, buffer_slot: u32, index_type: IndexType) {
        let buffer = self.buffers.get(buffer_slot).handle;
        unsafe {
            self.device.cmd_bind_index_buffer(
                self.list(list),
                buffer,
                0,
                cast::index_type(index_type),
            );
        }
    }

    fn cmd_set_scissor(&mut self, list: u32, scissor: Rect) {
        let vk_scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x as i32,
                y: scissor.y as i32,
            },
            extent: vk::Extent2D {
                width: scissor.w as u32,
                height: scissor.h as u32,
            },
        };
        unsafe {
            self.device
                .cmd_set_scissor(self.list(list), 0, &[vk_scissor]);
        }
    }

    fn cmd_draw(&mut self, list: u32, draw: DrawInfo) {
        unsafe {
            self.device.cmd_draw(
                self.list(list),
                draw.vertex_count,
                draw.instance_count,
                draw.vertex_start,
                draw.instance_start,
            );
        }
    }

    fn cmd_draw_indexed(&mut self, list: u32, draw: DrawIndexedInfo) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.list(list),
                draw.index_count,
                draw.instance_count,
                draw.index_start,
                draw.vertex_offset,
                draw.instance_start,
            );
        }
    }

    fn cmd_draw_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    ) {
        let buffer = self.buffers.get(buffer_slot).handle;
        unsafe {
            self.device
                .cmd_draw_indirect(self.list(list), buffer, offset, info_count, stride);
        }
    }

    fn cmd_draw_indexed_indirect(
        &mut self,
        list: u32,
        buffer_slot: u32,
        offset: u64,
        info_count: u32,
        stride: u32,
    ) {
        let buffer = self.buffers.get(buffer_slot).handle;
        unsafe {
            self.device.cmd_draw_indexed_indirect(
                self.list(list),
                buffer,
                offset,
                info_count,
                stride,
            );
        }
    }

    fn cmd_dispatch(&mut self, list: u32, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(self.list(list), x, y, z) };
    }

    fn cmd_buffer_memory_barrier(
        &mut self,
        list: u32,
        src_stages: crate::PipelineStages,
        dst_stages: crate::PipelineStages,
        buffer_slot: u32,
        src_access: Access,
        dst_access: Access,
    ) {
        self.cmd_buffer_memory_barrier_impl(
            list,
            src_stages,
            dst_stages,
            buffer_slot,
            src_access,
            dst_access,
        );
    }

    fn cmd_image_memory_barrier(
        &mut self,
        list: u32,
        src_stages: crate::PipelineStages,
        dst_stages: crate::PipelineStages,
        image_slot: u32,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        src_access: Access,
        dst_access: Access,
    ) {
        self.cmd_image_memory_barrier_impl(
            list, src_stages, dst_stages, image_slot, old_layout, new_layout, src_access,
            dst_access,
        );
    }

    fn cmd_copy_buffer(&mut self, list: u32, src_slot: u32, dst_slot: u32, regions: &[BufferCopy]) {
        self.cmd_copy_buffer_impl(list, src_slot, dst_slot, regions);
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        list: u32,
        src_slot: u32,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[BufferImageCopy],
    ) {
        self.cmd_copy_buffer_to_image_impl(list, src_slot, dst_slot, dst_layout, regions);
    }

    fn cmd_copy_image_to_buffer(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        regions: &[BufferImageCopy],
    ) {
        self.cmd_copy_image_to_buffer_impl(list, src_slot, src_layout, dst_slot, regions);
    }

    fn cmd_blit_image(
        &mut self,
        list: u32,
        src_slot: u32,
        src_layout: ImageLayout,
        dst_slot: u32,
        dst_layout: ImageLayout,
        regions: &[ImageBlit],
        filter: Filter,
    ) {
        self.cmd_blit_image_impl(list, src_slot, src_layout, dst_slot, dst_layout, regions, filter);
    }

    fn queue_submit(&mut self, family: QueueFamily, submit: &SubmitData) -> Result<(), String> {
        self.queue_submit_impl(family, submit)
    }

    fn queue_wait_idle(&mut self, family: QueueFamily) -> Result<(), String> {
        let queue = self.queue(family);
        vk_check("vkQueueWaitIdle", unsafe {
            self.device.queue_wait_idle(queue.handle)
        })
    }

    fn wait_idle(&mut self) -> Result<(), String> {
        vk_check("vkDeviceWaitIdle", unsafe { self.device.device_wait_idle() })
    }

    fn create_swapchain(&mut self, vsync: bool) -> Result<SwapchainDesc, String> {
        self.create_swapchain_impl(vsync)
    }

    fn register_swapchain_image(
        &mut self,
        image_index: u32,
        image_slot: u32,
    ) -> Result<(), String> {
        self.register_swapchain_image_impl(image_index, image_slot)
    }

    fn destroy_swapchain(&mut self) {
        self.destroy_swapchain_impl();
    }

    fn refresh_surface_caps(&mut self) -> Result<(), String> {
        let surface = self.surface.as_ref().ok_or("device is headless")?;
        self.pdevice.surface_caps = Some(vk_check(
            "vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
            unsafe {
                surface
                    .loader
                    .get_physical_device_surface_capabilities(self.pdevice.handle, surface.handle)
            },
        )?);
        Ok(())
    }

    fn acquire_image(&mut self, semaphore_slot: u32) -> Result<AcquireOutcome, String> {
        self.acquire_image_impl(semaphore_slot)
    }

    fn present(
        &mut self,
        image_index: u32,
        wait_semaphore_slot: u32,
    ) -> Result<PresentOutcome, String> {
        self.present_impl(image_index, wait_semaphore_slot)
    }

    fn depth_stencil_formats(&self) -> Vec<Format> {
        self.pdevice.depth_stencil_formats.clone()
    }

    fn max_sample_count(&self) -> SampleCount {
        match self.pdevice.msaa_cap {
            vk::SampleCountFlags::TYPE_64 => SampleCount::X64,
            vk::SampleCountFlags::TYPE_32 => SampleCount::X32,
            vk::SampleCountFlags::TYPE_16 => SampleCount::X16,
            vk::SampleCountFlags::TYPE_8 => SampleCount::X8,
            vk::SampleCountFlags::TYPE_4 => SampleCount::X4,
            vk::SampleCountFlags::TYPE_2 => SampleCount::X2,
            _ => SampleCount::X1,
        }
    }

    fn shutdown(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            for (_, pipeline) in self.pipelines.drain().flat_map(|p| p.handles) {
                self.device.destroy_pipeline(pipeline, None);
            }
            for handle in self.pipeline_layouts.drain() {
                self.device.destroy_pipeline_layout(handle, None);
            }
            for handle in self.framebuffers.drain() {
                self.device.destroy_framebuffer(handle, None);
            }
            for handle in self.passes.drain() {
                self.device.destroy_render_pass(handle, None);
            }
            for handle in self.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(handle, None);
            }
            for pool in self.set_pools.drain() {
                self.device.destroy_descriptor_pool(pool.handle, None);
            }
            for handle in self.command_pools.drain() {
                self.device.destroy_command_pool(handle, None);
            }
            for module in self.shaders.drain() {
                self.device.destroy_shader_module(module, None);
            }
            for handle in self.semaphores.drain() {
                self.device.destroy_semaphore(handle, None);
            }
            for handle in self.fences.drain() {
                self.device.destroy_fence(handle, None);
            }

            let images: Vec<VulkanImage> = self.images.drain().collect();
            for image in images {
                self.release_image(image);
            }
            let buffers: Vec<VulkanBuffer> = self.buffers.drain().collect();
            for buffer in buffers {
                self.release_buffer(buffer);
            }

            if let Some(swapchain) = self.swapchain.take() {
                if let Some(loader) = &self.swapchain_loader {
                    loader.destroy_swapchain(swapchain.handle, None);
                }
            }

            // The allocator logs any leaked allocations as it drops; it must
            // go before the logical device.
            drop(self.allocator.take());

            self.device.destroy_device(None);

            if let Some(surface) = self.surface.take() {
                surface.loader.destroy_surface(surface.handle, None);
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
