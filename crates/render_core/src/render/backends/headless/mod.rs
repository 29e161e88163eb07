//! Headless device backend
//!
//! A deterministic, CPU-only [`DeviceBackend`]. Device memory is host RAM,
//! buffers and images are bound to real bytes, and copies recorded into
//! command buffers actually move data when they run.
//!
//! Submissions are not executed on `submit`. They wait in a FIFO queue and
//! run, in order, when:
//!
//! - a fence of a queued submission is waited (everything up to and
//!   including that submission runs),
//! - the device is waited idle,
//! - the owner calls [`HeadlessBackend::complete_next`] or
//!   [`HeadlessBackend::complete_all`].
//!
//! Polling a fence never runs work, so "submitted but not finished" is an
//! observable state. The backend also counts misuse it can detect (resetting
//! a pending command buffer, destroying a buffer a queued copy still reads,
//! copying into an image in the wrong layout) in
//! [`HeadlessStats::validation_errors`].

mod execute;
mod objects;

use ash::vk::{self, Handle};
use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use self::objects::{
    Binding, BufferObject, CommandBufferObject, CommandBufferState, DescriptorPoolObject, DescriptorSetObject,
    HeadlessState, HostBlock, ImageObject, MemoryObject, SimpleKind, Submission,
};
use crate::render::backend::{
    DescriptorBinding, DescriptorWrite, DeviceBackend, DeviceLimits, GpuCommand, GraphicsPipelineDesc, ImageDesc,
    MemoryHeapInfo, MemoryProperties, MemoryTypeInfo, RenderPassDesc, SamplerDesc,
};
use crate::render::{VulkanError, VulkanResult};

/// Construction parameters for a [`HeadlessBackend`]
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Adapter name
    pub name: String,
    /// Limits reported to the core
    pub limits: DeviceLimits,
    /// Memory types and heaps reported to the core
    pub memory: MemoryProperties,
}

impl Default for HeadlessConfig {
    /// A discrete-GPU shaped device: device-local VRAM, host-visible system
    /// memory, and a small device-local host-visible window.
    fn default() -> Self {
        Self::with_heap_sizes(256 * 1024 * 1024, 256 * 1024 * 1024, 16 * 1024 * 1024)
    }
}

impl HeadlessConfig {
    /// Default memory layout with custom heap sizes
    pub fn with_heap_sizes(device_local: u64, host_visible: u64, shared: u64) -> Self {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        Self {
            name: "headless".to_string(),
            limits: DeviceLimits::default(),
            memory: MemoryProperties {
                types: vec![
                    MemoryTypeInfo { property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL, heap_index: 0 },
                    MemoryTypeInfo { property_flags: host, heap_index: 1 },
                    MemoryTypeInfo { property_flags: host | vk::MemoryPropertyFlags::DEVICE_LOCAL, heap_index: 2 },
                ],
                heaps: vec![
                    MemoryHeapInfo { size: device_local, flags: vk::MemoryHeapFlags::DEVICE_LOCAL },
                    MemoryHeapInfo { size: host_visible, flags: vk::MemoryHeapFlags::empty() },
                    MemoryHeapInfo { size: shared, flags: vk::MemoryHeapFlags::DEVICE_LOCAL },
                ],
            },
        }
    }

    /// Builder-style setter for the adapter name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Snapshot of the headless device's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Live `VkDeviceMemory` objects
    pub memory_objects: usize,
    /// Bytes of live device memory
    pub memory_bytes: u64,
    /// Live buffers
    pub buffers: usize,
    /// Live images
    pub images: usize,
    /// Live descriptor sets
    pub descriptor_sets: usize,
    /// Live command buffers
    pub command_buffers: usize,
    /// Live fences
    pub fences: usize,
    /// Command buffers ever allocated
    pub command_buffers_allocated: u64,
    /// Queue submissions
    pub submissions: u64,
    /// Submissions that finished executing
    pub completed: u64,
    /// Submissions still queued
    pub pending: usize,
    /// Draw commands executed
    pub draws: u64,
    /// Copy commands executed
    pub copies: u64,
    /// Render passes executed
    pub render_passes: u64,
    /// Graphics pipelines created
    pub pipelines_created: u64,
    /// Detected API misuse
    pub validation_errors: u64,
}

/// CPU implementation of [`DeviceBackend`]
pub struct HeadlessBackend {
    config: HeadlessConfig,
    state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    /// Create a headless device
    pub fn new(config: HeadlessConfig) -> Self {
        let state = HeadlessState { heap_usage: vec![0; config.memory.heaps.len()], ..HeadlessState::default() };
        log::info!("[HEADLESS] created device '{}'", config.name);
        Self { config, state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Counters and live object counts
    pub fn stats(&self) -> HeadlessStats {
        let state = self.state();
        HeadlessStats {
            memory_objects: state.memory.len(),
            memory_bytes: state.memory.values().map(|m| m.size).sum(),
            buffers: state.buffers.len(),
            images: state.images.len(),
            descriptor_sets: state.descriptor_sets.len(),
            command_buffers: state.command_buffers.len(),
            fences: state.fences.len(),
            command_buffers_allocated: state.counters.command_buffers_allocated,
            submissions: state.counters.submissions,
            completed: state.counters.completed,
            pending: state.pending.len(),
            draws: state.counters.draws,
            copies: state.counters.copies,
            render_passes: state.counters.render_passes,
            pipelines_created: state.counters.pipelines_created,
            validation_errors: state.counters.validation_errors,
        }
    }

    /// Debug name recorded for a raw handle
    pub fn debug_name(&self, handle: u64) -> Option<String> {
        self.state().debug_names.get(&handle).cloned()
    }

    /// Number of submissions waiting to run
    pub fn pending_submissions(&self) -> usize {
        self.state().pending.len()
    }

    /// Run the oldest queued submission; false when the queue is empty
    pub fn complete_next(&self) -> bool {
        let mut state = self.state();
        match state.pending.pop_front() {
            Some(submission) => {
                execute::execute_submission(&mut state, &submission);
                true
            }
            None => false,
        }
    }

    /// Run every queued submission, returning how many ran
    pub fn complete_all(&self) -> usize {
        let mut state = self.state();
        let mut count = 0;
        while let Some(submission) = state.pending.pop_front() {
            execute::execute_submission(&mut state, &submission);
            count += 1;
        }
        count
    }

    /// Make the next `count` blocking waits on unsignaled fences fail with `ERROR_DEVICE_LOST`
    pub fn fail_next_fence_waits(&self, count: u32) {
        self.state().failing_fence_waits = count;
    }

    /// Make the next `count` fence resets fail with `ERROR_DEVICE_LOST`
    pub fn fail_next_fence_resets(&self, count: u32) {
        self.state().failing_fence_resets = count;
    }

    /// Current layout of an image as tracked by executed barriers
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state().images.get(&image.as_raw()).map(|image| image.layout)
    }

    /// Last write recorded for a descriptor binding
    pub fn descriptor_write(&self, set: vk::DescriptorSet, binding: u32) -> Option<DescriptorWrite> {
        self.state().descriptor_sets.get(&set.as_raw()).and_then(|s| s.writes.get(&binding).copied())
    }

    /// Commands currently recorded in a command buffer
    pub fn recorded_commands(&self, command_buffer: vk::CommandBuffer) -> Vec<GpuCommand> {
        self.state()
            .command_buffers
            .get(&command_buffer.as_raw())
            .map(|cb| cb.commands.clone())
            .unwrap_or_default()
    }

    fn create_simple<H: Handle>(&self, kind: SimpleKind) -> H {
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.simple.insert(handle, kind);
        H::from_raw(handle)
    }

    fn destroy_simple<H: Handle>(&self, handle: H, kind: SimpleKind) {
        let raw = handle.as_raw();
        if raw == 0 {
            return;
        }
        let mut state = self.state();
        if state.in_use_by_pending(raw) {
            state.validation_error(&format!("{kind:?} destroyed while a queued submission uses it"));
        }
        match state.simple.remove(&raw) {
            Some(found) if found == kind => {}
            _ => state.validation_error(&format!("destroying unknown {kind:?}")),
        }
    }

    fn requirements(&self, size: u64, alignment: u64) -> vk::MemoryRequirements {
        let type_count = self.config.memory.types.len().min(32);
        vk::MemoryRequirements {
            size: size.max(1).next_multiple_of(4),
            alignment,
            memory_type_bits: if type_count == 32 { u32::MAX } else { (1u32 << type_count) - 1 },
        }
    }

    fn run_until(state: &mut HeadlessState, fence: u64) -> bool {
        if !state.pending.iter().any(|submission| submission.fence == fence) {
            return false;
        }
        while let Some(submission) = state.pending.pop_front() {
            let done = submission.fence == fence;
            execute::execute_submission(state, &submission);
            if done {
                break;
            }
        }
        true
    }
}

impl DeviceBackend for HeadlessBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn limits(&self) -> DeviceLimits {
        self.config.limits
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.config.memory.clone()
    }

    fn allocate_memory(&self, memory_type_index: u32, size: vk::DeviceSize) -> VulkanResult<vk::DeviceMemory> {
        let ty = self
            .config
            .memory
            .types
            .get(memory_type_index as usize)
            .ok_or_else(|| VulkanError::invalid(format!("memory type {memory_type_index} does not exist")))?;
        let heap_index = ty.heap_index as usize;
        let heap_size = self.config.memory.heaps.get(heap_index).map_or(0, |heap| heap.size);

        let mut state = self.state();
        if state.memory.len() as u32 >= self.config.limits.max_memory_allocation_count
            || state.heap_usage[heap_index] + size > heap_size
        {
            return Err(VulkanError::creation("device memory")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let len = usize::try_from(size)
            .map_err(|_| VulkanError::creation("device memory")(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;

        let handle = state.allocate_handle();
        state.heap_usage[heap_index] += size;
        state
            .memory
            .insert(handle, MemoryObject { type_index: memory_type_index, heap_index, size, block: HostBlock::zeroed(len), mapped: false });
        Ok(vk::DeviceMemory::from_raw(handle))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.state();
        match state.memory.remove(&memory.as_raw()) {
            Some(object) => {
                state.heap_usage[object.heap_index] -= object.size;
                if object.mapped {
                    log::trace!("[HEADLESS] freeing mapped memory {:#x}", memory.as_raw());
                }
            }
            None => state.validation_error("freeing unknown memory"),
        }
    }

    fn map_memory(&self, memory: vk::DeviceMemory) -> VulkanResult<NonNull<u8>> {
        let mut state = self.state();
        let object = state
            .memory
            .get_mut(&memory.as_raw())
            .ok_or_else(|| VulkanError::invalid("mapping unknown memory"))?;
        let host_visible = self
            .config
            .memory
            .types
            .get(object.type_index as usize)
            .is_some_and(|ty| ty.property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        if !host_visible {
            return Err(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        if object.mapped {
            return Err(VulkanError::invalid("memory is already mapped"));
        }
        object.mapped = true;
        Ok(object.block.ptr())
    }

    fn unmap_memory(&self, memory: vk::DeviceMemory) {
        if let Some(object) = self.state().memory.get_mut(&memory.as_raw()) {
            object.mapped = false;
        }
    }

    fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        let state = self.state();
        let object = state.memory.get(&memory.as_raw()).ok_or_else(|| VulkanError::invalid("flushing unknown memory"))?;
        if offset + size > object.size {
            return Err(VulkanError::invalid("flush range exceeds memory object"));
        }
        Ok(())
    }

    fn invalidate_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()> {
        self.flush_memory(memory, offset, size)
    }

    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer> {
        if size == 0 {
            return Err(VulkanError::creation("buffer")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.buffers.insert(handle, BufferObject { size, usage, binding: None });
        Ok(vk::Buffer::from_raw(handle))
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let (size, usage) = self
            .state()
            .buffers
            .get(&buffer.as_raw())
            .map_or((0, vk::BufferUsageFlags::empty()), |b| (b.size, b.usage));
        let alignment = if usage.contains(vk::BufferUsageFlags::UNIFORM_BUFFER) {
            self.config.limits.min_uniform_buffer_offset_alignment
        } else {
            16
        };
        self.requirements(size, alignment)
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        let mut state = self.state();
        let memory_size = state.memory.get(&memory.as_raw()).map(|m| m.size);
        let object = state.buffers.get_mut(&buffer.as_raw()).ok_or_else(|| VulkanError::invalid("binding unknown buffer"))?;
        match memory_size {
            Some(len) if offset + object.size <= len && object.binding.is_none() => {
                object.binding = Some(Binding { memory: memory.as_raw(), offset });
                Ok(())
            }
            _ => Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT)),
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state();
        if state.in_use_by_pending(buffer.as_raw()) {
            state.validation_error("buffer destroyed while a queued submission uses it");
        }
        if state.buffers.remove(&buffer.as_raw()).is_none() {
            state.validation_error("destroying unknown buffer");
        }
    }

    fn create_buffer_view(&self, buffer: vk::Buffer, _format: vk::Format, offset: vk::DeviceSize, range: vk::DeviceSize) -> VulkanResult<vk::BufferView> {
        let size = self.state().buffers.get(&buffer.as_raw()).map(|b| b.size);
        match size {
            Some(size) if offset + range <= size => Ok(self.create_simple(SimpleKind::BufferView)),
            _ => Err(VulkanError::creation("buffer view")(vk::Result::ERROR_INITIALIZATION_FAILED)),
        }
    }

    fn destroy_buffer_view(&self, view: vk::BufferView) {
        self.destroy_simple(view, SimpleKind::BufferView);
    }

    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::creation("image")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.images.insert(handle, ImageObject { desc: *desc, binding: None, layout: vk::ImageLayout::UNDEFINED });
        Ok(vk::Image::from_raw(handle))
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let size = self
            .state()
            .images
            .get(&image.as_raw())
            .map_or(0, |i| i.desc.byte_size().unwrap_or_else(|| u64::from(i.desc.extent.width) * u64::from(i.desc.extent.height) * 4));
        self.requirements(size, 256)
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()> {
        let mut state = self.state();
        if !state.memory.contains_key(&memory.as_raw()) {
            return Err(VulkanError::Api(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        let object = state.images.get_mut(&image.as_raw()).ok_or_else(|| VulkanError::invalid("binding unknown image"))?;
        object.binding = Some(Binding { memory: memory.as_raw(), offset });
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state();
        if state.in_use_by_pending(image.as_raw()) {
            state.validation_error("image destroyed while a queued submission uses it");
        }
        if state.images.remove(&image.as_raw()).is_none() {
            state.validation_error("destroying unknown image");
        }
    }

    fn create_image_view(&self, image: vk::Image, _desc: &ImageDesc) -> VulkanResult<vk::ImageView> {
        let mut state = self.state();
        if !state.images.contains_key(&image.as_raw()) {
            return Err(VulkanError::creation("image view")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let handle = state.allocate_handle();
        state.image_views.insert(handle, image.as_raw());
        Ok(vk::ImageView::from_raw(handle))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state();
        if state.image_views.remove(&view.as_raw()).is_none() {
            state.validation_error("destroying unknown image view");
        }
    }

    fn create_sampler(&self, _desc: &SamplerDesc) -> VulkanResult<vk::Sampler> {
        Ok(self.create_simple(SimpleKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy_simple(sampler, SimpleKind::Sampler);
    }

    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout> {
        let mut seen = HashSet::new();
        if !bindings.iter().all(|b| seen.insert(b.binding)) {
            return Err(VulkanError::creation("descriptor set layout")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.set_layouts.insert(handle, bindings.to_vec());
        Ok(vk::DescriptorSetLayout::from_raw(handle))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        let mut state = self.state();
        if state.set_layouts.remove(&layout.as_raw()).is_none() {
            state.validation_error("destroying unknown descriptor set layout");
        }
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool> {
        let mut capacity = HashMap::new();
        for size in sizes {
            *capacity.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        let mut state = self.state();
        let handle = state.allocate_handle();
        state
            .descriptor_pools
            .insert(handle, DescriptorPoolObject { max_sets, capacity, used: HashMap::new(), sets: HashSet::new() });
        Ok(vk::DescriptorPool::from_raw(handle))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state();
        match state.descriptor_pools.remove(&pool.as_raw()) {
            Some(object) => {
                for set in object.sets {
                    state.descriptor_sets.remove(&set);
                }
            }
            None => state.validation_error("destroying unknown descriptor pool"),
        }
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let mut state = self.state();
        let bindings = state
            .set_layouts
            .get(&layout.as_raw())
            .cloned()
            .ok_or_else(|| VulkanError::invalid("allocating with unknown descriptor set layout"))?;
        let handle = state.allocate_handle();
        let object = state
            .descriptor_pools
            .get_mut(&pool.as_raw())
            .ok_or_else(|| VulkanError::invalid("allocating from unknown descriptor pool"))?;

        if object.sets.len() as u32 >= object.max_sets {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        for binding in &bindings {
            let used = object.used.get(&binding.descriptor_type).copied().unwrap_or(0);
            let capacity = object.capacity.get(&binding.descriptor_type).copied().unwrap_or(0);
            if used + binding.count > capacity {
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
            }
        }
        for binding in &bindings {
            *object.used.entry(binding.descriptor_type).or_insert(0) += binding.count;
        }
        object.sets.insert(handle);
        state
            .descriptor_sets
            .insert(handle, DescriptorSetObject { pool: pool.as_raw(), layout: layout.as_raw(), writes: HashMap::new() });
        Ok(vk::DescriptorSet::from_raw(handle))
    }

    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()> {
        let mut state = self.state();
        if state.in_use_by_pending(set.as_raw()) {
            state.validation_error("descriptor set freed while a queued submission binds it");
        }
        let object = state
            .descriptor_sets
            .remove(&set.as_raw())
            .ok_or_else(|| VulkanError::invalid("freeing unknown descriptor set"))?;
        if object.pool != pool.as_raw() {
            return Err(VulkanError::invalid("descriptor set freed to a different pool"));
        }
        let bindings = state.set_layouts.get(&object.layout).cloned().unwrap_or_default();
        if let Some(pool_object) = state.descriptor_pools.get_mut(&pool.as_raw()) {
            pool_object.sets.remove(&set.as_raw());
            for binding in bindings {
                if let Some(used) = pool_object.used.get_mut(&binding.descriptor_type) {
                    *used = used.saturating_sub(binding.count);
                }
            }
        }
        Ok(())
    }

    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, write: &DescriptorWrite) {
        let mut state = self.state();
        let layout = state.descriptor_sets.get(&set.as_raw()).map(|s| s.layout);
        let expected = layout
            .and_then(|layout| state.set_layouts.get(&layout))
            .and_then(|bindings| bindings.iter().find(|b| b.binding == binding))
            .map(|b| b.descriptor_type);
        if expected != Some(write.descriptor_type()) {
            state.validation_error(&format!(
                "write of {:?} to binding {binding} expecting {expected:?}",
                write.descriptor_type()
            ));
            return;
        }
        if let Some(object) = state.descriptor_sets.get_mut(&set.as_raw()) {
            object.writes.insert(binding, *write);
        }
    }

    fn create_pipeline_cache(&self) -> VulkanResult<vk::PipelineCache> {
        Ok(self.create_simple(SimpleKind::PipelineCache))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        self.destroy_simple(cache, SimpleKind::PipelineCache);
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], _push_constants: &[vk::PushConstantRange]) -> VulkanResult<vk::PipelineLayout> {
        let known = {
            let state = self.state();
            set_layouts.iter().all(|layout| state.set_layouts.contains_key(&layout.as_raw()))
        };
        if !known {
            return Err(VulkanError::creation("pipeline layout")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        Ok(self.create_simple(SimpleKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy_simple(layout, SimpleKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        _cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        desc: &GraphicsPipelineDesc,
    ) -> VulkanResult<vk::Pipeline> {
        let valid = {
            let state = self.state();
            state.simple.get(&layout.as_raw()) == Some(&SimpleKind::PipelineLayout)
                && state.simple.get(&render_pass.as_raw()) == Some(&SimpleKind::RenderPass)
        };
        if !valid || desc.vertex_spirv.is_empty() || desc.fragment_spirv.is_empty() {
            return Err(VulkanError::creation("graphics pipeline")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let pipeline = self.create_simple(SimpleKind::Pipeline);
        self.state().counters.pipelines_created += 1;
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy_simple(pipeline, SimpleKind::Pipeline);
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass> {
        Ok(self.create_simple(SimpleKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy_simple(render_pass, SimpleKind::RenderPass);
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], _extent: vk::Extent2D) -> VulkanResult<vk::Framebuffer> {
        let valid = {
            let state = self.state();
            state.simple.get(&render_pass.as_raw()) == Some(&SimpleKind::RenderPass)
                && attachments.iter().all(|view| state.image_views.contains_key(&view.as_raw()))
        };
        if !valid {
            return Err(VulkanError::creation("framebuffer")(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        Ok(self.create_simple(SimpleKind::Framebuffer))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy_simple(framebuffer, SimpleKind::Framebuffer);
    }

    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool> {
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.command_pools.insert(handle, HashSet::new());
        Ok(vk::CommandPool::from_raw(handle))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state();
        let Some(buffers) = state.command_pools.remove(&pool.as_raw()) else {
            state.validation_error("destroying unknown command pool");
            return;
        };
        for buffer in buffers {
            if state.command_buffers.get(&buffer).is_some_and(|cb| cb.state == CommandBufferState::Pending) {
                state.validation_error("command pool destroyed with a pending command buffer");
            }
            state.command_buffers.remove(&buffer);
        }
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer> {
        let mut state = self.state();
        if !state.command_pools.contains_key(&pool.as_raw()) {
            return Err(VulkanError::invalid("allocating from unknown command pool"));
        }
        let handle = state.allocate_handle();
        if let Some(buffers) = state.command_pools.get_mut(&pool.as_raw()) {
            buffers.insert(handle);
        }
        state.command_buffers.insert(
            handle,
            CommandBufferObject { pool: pool.as_raw(), state: CommandBufferState::Initial, commands: Vec::new() },
        );
        state.counters.command_buffers_allocated += 1;
        Ok(vk::CommandBuffer::from_raw(handle))
    }

    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let mut state = self.state();
        match state.command_buffers.remove(&command_buffer.as_raw()) {
            Some(object) => {
                if object.state == CommandBufferState::Pending {
                    state.validation_error("command buffer freed while pending");
                }
                if object.pool != pool.as_raw() {
                    state.validation_error("command buffer freed to a different pool");
                }
                if let Some(buffers) = state.command_pools.get_mut(&object.pool) {
                    buffers.remove(&command_buffer.as_raw());
                }
            }
            None => state.validation_error("freeing unknown command buffer"),
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        let object = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| VulkanError::invalid("beginning unknown command buffer"))?;
        match object.state {
            CommandBufferState::Pending => Err(VulkanError::invalid("beginning a pending command buffer")),
            _ => {
                object.commands.clear();
                object.state = CommandBufferState::Recording;
                Ok(())
            }
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        let object = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| VulkanError::invalid("ending unknown command buffer"))?;
        if object.state != CommandBufferState::Recording {
            return Err(VulkanError::invalid("ending a command buffer that is not recording"));
        }
        object.state = CommandBufferState::Executable;
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let mut state = self.state();
        let object = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| VulkanError::invalid("resetting unknown command buffer"))?;
        if object.state == CommandBufferState::Pending {
            state.validation_error("command buffer reset while pending");
            return Err(VulkanError::invalid("command buffer reset while pending"));
        }
        object.commands.clear();
        object.state = CommandBufferState::Initial;
        Ok(())
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: GpuCommand) {
        let mut state = self.state();
        match state.command_buffers.get_mut(&command_buffer.as_raw()) {
            Some(object) if object.state == CommandBufferState::Recording => object.commands.push(command),
            _ => state.validation_error("recording into a command buffer that is not recording"),
        }
    }

    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        if state.fences.get(&fence.as_raw()) != Some(&false) {
            return Err(VulkanError::invalid("submission fence must exist and be unsignaled"));
        }
        if state.pending.iter().any(|submission| submission.fence == fence.as_raw()) {
            return Err(VulkanError::invalid("fence already used by a queued submission"));
        }
        let object = state
            .command_buffers
            .get_mut(&command_buffer.as_raw())
            .ok_or_else(|| VulkanError::invalid("submitting unknown command buffer"))?;
        if object.state != CommandBufferState::Executable {
            return Err(VulkanError::invalid("submitting a command buffer that is not executable"));
        }
        object.state = CommandBufferState::Pending;
        state.pending.push_back(Submission { command_buffer: command_buffer.as_raw(), fence: fence.as_raw() });
        state.counters.submissions += 1;
        Ok(())
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let mut state = self.state();
        let handle = state.allocate_handle();
        state.fences.insert(handle, signaled);
        Ok(vk::Fence::from_raw(handle))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state();
        if state.pending.iter().any(|submission| submission.fence == fence.as_raw()) {
            state.validation_error("fence destroyed while its submission is queued");
        }
        if state.fences.remove(&fence.as_raw()).is_none() {
            state.validation_error("destroying unknown fence");
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool> {
        self.state()
            .fences
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| VulkanError::invalid("polling unknown fence"))
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Option<Duration>) -> VulkanResult<bool> {
        let mut state = self.state();
        match state.fences.get(&fence.as_raw()) {
            None => return Err(VulkanError::invalid("waiting on unknown fence")),
            Some(true) => return Ok(true),
            Some(false) => {}
        }
        if state.failing_fence_waits > 0 {
            state.failing_fence_waits -= 1;
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        if Self::run_until(&mut state, fence.as_raw()) {
            return Ok(true);
        }
        // Nothing will ever signal this fence
        match timeout {
            Some(_) => Ok(false),
            None => Err(VulkanError::invalid("infinite wait on a fence with no queued submission")),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()> {
        let mut state = self.state();
        if state.pending.iter().any(|submission| submission.fence == fence.as_raw()) {
            state.validation_error("fence reset while its submission is queued");
            return Err(VulkanError::invalid("fence reset while its submission is queued"));
        }
        if state.failing_fence_resets > 0 {
            state.failing_fence_resets -= 1;
            return Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST));
        }
        let signaled = state.fences.get_mut(&fence.as_raw()).ok_or_else(|| VulkanError::invalid("resetting unknown fence"))?;
        *signaled = false;
        Ok(())
    }

    fn wait_idle(&self) -> VulkanResult<()> {
        self.complete_all();
        Ok(())
    }

    fn set_debug_name(&self, _object_type: vk::ObjectType, handle: u64, name: &str) {
        self.state().debug_names.insert(handle, name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HeadlessBackend {
        HeadlessBackend::new(HeadlessConfig::default())
    }

    fn host_buffer(backend: &HeadlessBackend, size: u64) -> (vk::Buffer, vk::DeviceMemory, NonNull<u8>) {
        let buffer = backend
            .create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST)
            .unwrap();
        let memory = backend.allocate_memory(1, size).unwrap();
        backend.bind_buffer_memory(buffer, memory, 0).unwrap();
        let ptr = backend.map_memory(memory).unwrap();
        (buffer, memory, ptr)
    }

    fn recorded(backend: &HeadlessBackend, commands: Vec<GpuCommand>) -> (vk::CommandBuffer, vk::Fence) {
        let pool = backend.create_command_pool().unwrap();
        let cb = backend.allocate_command_buffer(pool).unwrap();
        backend.begin_command_buffer(cb).unwrap();
        for command in commands {
            backend.record(cb, command);
        }
        backend.end_command_buffer(cb).unwrap();
        (cb, backend.create_fence(false).unwrap())
    }

    #[test]
    fn test_copy_runs_only_when_fence_is_waited() {
        let backend = backend();
        let (src, _, src_ptr) = host_buffer(&backend, 16);
        let (dst, _, dst_ptr) = host_buffer(&backend, 16);
        unsafe { std::ptr::write_bytes(src_ptr.as_ptr(), 0x5A, 16) };

        let copy = GpuCommand::CopyBuffer { src, dst, regions: vec![vk::BufferCopy { src_offset: 0, dst_offset: 0, size: 16 }] };
        let (cb, fence) = recorded(&backend, vec![copy]);
        backend.submit(cb, fence).unwrap();

        assert!(!backend.fence_status(fence).unwrap());
        assert_eq!(unsafe { *dst_ptr.as_ptr() }, 0);

        assert!(backend.wait_for_fence(fence, None).unwrap());
        assert!(backend.fence_status(fence).unwrap());
        let copied = unsafe { std::slice::from_raw_parts(dst_ptr.as_ptr(), 16) };
        assert!(copied.iter().all(|&b| b == 0x5A));
        assert_eq!(backend.stats().validation_errors, 0);
    }

    #[test]
    fn test_waiting_runs_earlier_submissions_in_order() {
        let backend = backend();
        let (first_cb, first) = recorded(&backend, vec![GpuCommand::Draw { vertex_count: 3, instance_count: 1, first_vertex: 0, first_instance: 0 }]);
        let (second_cb, second) = recorded(&backend, Vec::new());
        backend.submit(first_cb, first).unwrap();
        backend.submit(second_cb, second).unwrap();

        backend.wait_for_fence(second, None).unwrap();
        assert!(backend.fence_status(first).unwrap());
        assert_eq!(backend.stats().draws, 1);
        assert_eq!(backend.pending_submissions(), 0);
    }

    #[test]
    fn test_unsubmitted_fence_wait() {
        let backend = backend();
        let fence = backend.create_fence(false).unwrap();
        assert!(!backend.wait_for_fence(fence, Some(Duration::from_millis(1))).unwrap());
        assert!(backend.wait_for_fence(fence, None).is_err());
    }

    #[test]
    fn test_reset_pending_command_buffer_is_rejected() {
        let backend = backend();
        let (cb, fence) = recorded(&backend, Vec::new());
        backend.submit(cb, fence).unwrap();
        assert!(backend.reset_command_buffer(cb).is_err());
        assert_eq!(backend.stats().validation_errors, 1);

        backend.complete_all();
        assert!(backend.reset_command_buffer(cb).is_ok());
    }

    #[test]
    fn test_heap_budget_is_enforced() {
        let backend = HeadlessBackend::new(HeadlessConfig::with_heap_sizes(1024, 1024, 1024));
        let first = backend.allocate_memory(0, 1024).unwrap();
        let err = backend.allocate_memory(0, 1).unwrap_err();
        assert!(err.is_out_of_memory());

        backend.free_memory(first);
        assert!(backend.allocate_memory(0, 512).is_ok());
    }

    #[test]
    fn test_device_local_memory_cannot_be_mapped() {
        let backend = backend();
        let memory = backend.allocate_memory(0, 64).unwrap();
        assert!(backend.map_memory(memory).is_err());
    }

    #[test]
    fn test_descriptor_pool_limits() {
        let backend = backend();
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX,
            }])
            .unwrap();
        let pool = backend
            .create_descriptor_pool(2, &[vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 8 }])
            .unwrap();

        let a = backend.allocate_descriptor_set(pool, layout).unwrap();
        backend.allocate_descriptor_set(pool, layout).unwrap();
        assert!(matches!(
            backend.allocate_descriptor_set(pool, layout),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        ));
        backend.free_descriptor_set(pool, a).unwrap();
        assert!(backend.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_mismatched_descriptor_write_counts_as_validation_error() {
        let backend = backend();
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorBinding {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX,
            }])
            .unwrap();
        let pool = backend
            .create_descriptor_pool(1, &[vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 1 }])
            .unwrap();
        let set = backend.allocate_descriptor_set(pool, layout).unwrap();

        backend.write_descriptor(set, 0, &DescriptorWrite::Sampler { sampler: vk::Sampler::null() });
        assert_eq!(backend.stats().validation_errors, 1);
        assert!(backend.descriptor_write(set, 0).is_none());
    }
}
