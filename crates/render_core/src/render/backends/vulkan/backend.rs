//! [`DeviceBackend`] over a real Vulkan logical device

use ash::extensions::ext::DebugUtils;
use ash::vk;
use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::context::{PhysicalDeviceInfo, VulkanContext};
use super::{pipeline, recording};
use crate::render::backend::{
    DescriptorBinding, DescriptorWrite, DeviceBackend, DeviceLimits, GpuCommand, GraphicsPipelineDesc, ImageDesc,
    MemoryProperties, RenderPassDesc, SamplerDesc,
};
use crate::render::{VulkanError, VulkanResult};

/// One logical device with a single graphics queue
pub struct VulkanBackend {
    context: Arc<VulkanContext>,
    physical: PhysicalDeviceInfo,
    device: ash::Device,
    graphics_family: u32,
    queue: Mutex<vk::Queue>,
    debug_utils: Option<DebugUtils>,
}

impl VulkanBackend {
    /// Create a logical device on `physical` with one graphics queue
    pub fn new(context: Arc<VulkanContext>, physical: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let graphics_family = physical
            .graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed(format!("adapter '{}' has no graphics queue", physical.name)))?;

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_family)
            .queue_priorities(&priorities)
            .build()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_features(&features);

        // SAFETY: `physical.handle` belongs to the context's instance
        let device = unsafe { context.instance().create_device(physical.handle, &create_info, None) }
            .map_err(VulkanError::creation("logical device"))?;
        // SAFETY: queue 0 of the family was requested above
        let queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let debug_utils = context.debug_utils().cloned();

        log::info!("[VULKAN] logical device created on '{}' (graphics family {})", physical.name, graphics_family);
        Ok(Self { context, physical: physical.clone(), device, graphics_family, queue: Mutex::new(queue), debug_utils })
    }

    /// Create one backend per suitable adapter, skipping adapters that fail
    pub fn create_all(context: &Arc<VulkanContext>) -> Vec<Self> {
        context
            .physical_devices()
            .iter()
            .filter(|physical| physical.is_suitable())
            .filter_map(|physical| match Self::new(context.clone(), physical) {
                Ok(backend) => Some(backend),
                Err(err) => {
                    log::warn!("[VULKAN] skipping '{}': {}", physical.name, err);
                    None
                }
            })
            .collect()
    }

    /// Adapter the device runs on
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Graphics queue family index
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Instance the device was created from
    pub fn context(&self) -> &Arc<VulkanContext> {
        &self.context
    }

    fn queue(&self) -> MutexGuard<'_, vk::Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let _queue = self.queue();
        // SAFETY: every object created from the device has been destroyed by its owner,
        // and the queue lock keeps submissions out while the device goes away
        unsafe {
            if let Err(result) = self.device.device_wait_idle() {
                log::error!("[VULKAN] wait idle before destroying '{}' failed: {:?}", self.physical.name, result);
            }
            self.device.destroy_device(None);
        }
        log::debug!("[VULKAN] logical device on '{}' destroyed", self.physical.name);
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("adapter", &self.physical.name)
            .field("graphics_family", &self.graphics_family)
            .finish_non_exhaustive()
    }
}

fn color_attachment(format: vk::Format, final_layout: vk::ImageLayout) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout,
        ..Default::default()
    }
}

fn depth_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    }
}

// SAFETY (all methods below): handles passed in were created on this device by the
// layers above, which also uphold Vulkan's external synchronisation rules; queue
// access is serialised through `self.queue`.
impl DeviceBackend for VulkanBackend {
    fn name(&self) -> &str {
        &self.physical.name
    }

    fn limits(&self) -> DeviceLimits {
        self.physical.limits
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.physical.memory.clone()
    }

    fn allocate_memory(&self, memory_type_index: u32, size: vk::DeviceSize) -> VulkanResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::builder().allocation_size(size).memory_type_index(memory_type_index);
        unsafe { self.device.allocate_memory(&info, None) }.map_err(VulkanError::creation("device memory"))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) };
    }

    fn map_memory(&self, memory: vk::DeviceMemory) -> VulkanResult<NonNull<u8>> {
        let ptr = unsafe { self.device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
            .map_err(VulkanError::Api)?;
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| VulkanError::invalid("vkMapMemory returned null"))
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) };
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let range = vk::MappedMemoryRange::builder().memory(memory).offset(offset).size(size).build();
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }.map_err(VulkanError::Api)
    }

    fn invalidate_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let range = vk::MappedMemoryRange::builder().memory(memory).offset(offset).size(size).build();
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }.map_err(VulkanError::Api)
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::builder().size(size).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device.create_buffer(&info, None) }.map_err(VulkanError::creation("buffer"))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, offset) }.map_err(VulkanError::Api)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) };
    }

    fn create_buffer_view(&self, buffer: vk::Buffer, format: vk::Format, offset: vk::DeviceSize, range: vk::DeviceSize) -> VulkanResult<vk::BufferView> {
        let info = vk::BufferViewCreateInfo::builder().buffer(buffer).format(format).offset(offset).range(range);
        unsafe { self.device.create_buffer_view(&info, None) }.map_err(VulkanError::creation("buffer view"))
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        unsafe { self.device.destroy_buffer_view(view, None) };
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        unsafe { self.device.create_image(&info, None) }.map_err(VulkanError::creation("image"))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, offset) }.map_err(VulkanError::Api)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) };
    }

    fn create_image_view(&self, image: vk::Image, desc: &ImageDesc) -> VulkanResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.device.create_image_view(&info, None) }.map_err(VulkanError::creation("image view"))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) };
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        let mipmap_mode = if desc.min_filter == vk::Filter::NEAREST {
            vk::SamplerMipmapMode::NEAREST
        } else {
            vk::SamplerMipmapMode::LINEAR
        };
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .max_lod(vk::LOD_CLAMP_NONE);
        unsafe { self.device.create_sampler(&info, None) }.map_err(VulkanError::creation("sampler"))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.binding)
                    .descriptor_type(binding.descriptor_type)
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stage_flags)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        unsafe { self.device.create_descriptor_set_layout(&info, None) }.map_err(VulkanError::creation("descriptor set layout"))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.device.create_descriptor_pool(&info, None) }.map_err(VulkanError::creation("descriptor pool"))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(pool).set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }.map_err(VulkanError::Api)?;
        sets.into_iter().next().ok_or_else(|| VulkanError::invalid("driver returned no descriptor set"))
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()> {
        unsafe { self.device.free_descriptor_sets(pool, &[set]) }.map_err(VulkanError::Api)
    }

    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, write: &DescriptorWrite) {
        let mut buffer_info = Vec::new();
        let mut image_info = Vec::new();
        match *write {
            DescriptorWrite::UniformBuffer { buffer, offset, range } | DescriptorWrite::StorageBuffer { buffer, offset, range } => {
                buffer_info.push(vk::DescriptorBufferInfo { buffer, offset, range });
            }
            DescriptorWrite::CombinedImageSampler { view, sampler, layout } => {
                image_info.push(vk::DescriptorImageInfo { sampler, image_view: view, image_layout: layout });
            }
            DescriptorWrite::SampledImage { view, layout } => {
                image_info.push(vk::DescriptorImageInfo { sampler: vk::Sampler::null(), image_view: view, image_layout: layout });
            }
            DescriptorWrite::StorageImage { view } => {
                image_info.push(vk::DescriptorImageInfo {
                    sampler: vk::Sampler::null(),
                    image_view: view,
                    image_layout: vk::ImageLayout::GENERAL,
                });
            }
            DescriptorWrite::Sampler { sampler } => {
                image_info.push(vk::DescriptorImageInfo { sampler, image_view: vk::ImageView::null(), image_layout: vk::ImageLayout::UNDEFINED });
            }
        }

        let mut builder = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(write.descriptor_type());
        builder = if buffer_info.is_empty() { builder.image_info(&image_info) } else { builder.buffer_info(&buffer_info) };
        unsafe { self.device.update_descriptor_sets(&[builder.build()], &[]) };
    }

    fn create_pipeline_cache(&self) -> VulkanResult<vk::PipelineCache> {
        let info = vk::PipelineCacheCreateInfo::default();
        unsafe { self.device.create_pipeline_cache(&info, None) }.map_err(VulkanError::creation("pipeline cache"))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.device.destroy_pipeline_cache(cache, None) };
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constants: &[vk::PushConstantRange]) -> VulkanResult<vk::PipelineLayout> {
        let info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constants);
        unsafe { self.device.create_pipeline_layout(&info, None) }.map_err(VulkanError::creation("pipeline layout"))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        desc: &GraphicsPipelineDesc,
    ) -> VulkanResult<vk::Pipeline> {
        pipeline::create_graphics_pipeline(&self.device, cache, layout, render_pass, desc)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        let mut attachments = vec![color_attachment(desc.color_format, desc.color_final_layout)];
        let color_refs = [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
        let depth_ref = vk::AttachmentReference { attachment: 1, layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_format) = desc.depth_format {
            attachments.push(depth_attachment(depth_format));
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: stages,
            dst_stage_mask: stages,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.device.create_render_pass(&info, None) }.map_err(VulkanError::creation("render pass"))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> VulkanResult<vk::Framebuffer> {
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&info, None) }.map_err(VulkanError::creation("framebuffer"))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_family);
        unsafe { self.device.create_command_pool(&info, None) }.map_err(VulkanError::creation("command pool"))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&info) }.map_err(VulkanError::creation("command buffer"))?;
        buffers.into_iter().next().ok_or_else(|| VulkanError::invalid("driver returned no command buffer"))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.free_command_buffers(pool, &[command_buffer]) };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &info) }.map_err(VulkanError::Api)
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }.map_err(VulkanError::Api)
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }.map_err(VulkanError::Api)
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: GpuCommand) {
        recording::record(&self.device, command_buffer, command);
    }

    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> VulkanResult<()> {
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();
        let queue = self.queue();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }.map_err(VulkanError::Api)
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&info, None) }.map_err(VulkanError::creation("fence"))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        unsafe { self.device.get_fence_status(fence) }.map_err(VulkanError::Api)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Option<Duration>) -> VulkanResult<bool> {
        let nanos = timeout.map_or(u64::MAX, |timeout| u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX));
        match unsafe { self.device.wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(result) => Err(VulkanError::Api(result)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.map_err(VulkanError::Api)
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        let _queue = self.queue();
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)
    }

    fn set_debug_name(&self, object_type: vk::ObjectType, handle: u64, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(object_type)
            .object_handle(handle)
            .object_name(&name);
        if let Err(result) = unsafe { debug_utils.set_debug_utils_object_name(self.device.handle(), &info) } {
            log::trace!("[VULKAN] naming {:?} failed: {:?}", object_type, result);
        }
    }
}
