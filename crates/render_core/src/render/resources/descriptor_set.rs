//! Descriptor set layouts, the shared descriptor pool and descriptor sets
//!
//! Every device owns one [`DescriptorPool`] with a hard cap on live sets.
//! The pool is pre-sized from the device limits for the descriptor kinds
//! renderers use; running out of sets or of descriptors of one kind is
//! [`VulkanError::DescriptorPoolExhausted`] and is never retried.
//!
//! A [`DescriptorSet`] is owned by exactly one holder (usually a frame slot
//! of a device data cache) and returns itself to the pool on drop. Writes
//! are applied immediately: commands recorded after a write see it.

use ash::vk;
use std::sync::Arc;

use crate::render::backend::{DescriptorBinding, DescriptorWrite, DeviceBackend, DeviceLimits};
use crate::render::device::Device;
use crate::render::resources::{Buffer, Sampler, Texture};
use crate::render::{VulkanError, VulkanResult};

/// Descriptors of each kind reserved per set when sizing the pool
const DESCRIPTORS_PER_SET: u32 = 8;

/// Descriptor set layout builder for creating reusable layouts
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding of any kind
    pub fn add_binding(mut self, binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(DescriptorBinding { binding, descriptor_type, count: 1, stage_flags });
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a storage buffer binding
    pub fn add_storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::STORAGE_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Add a sampled image binding
    pub fn add_sampled_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::SAMPLED_IMAGE, stage_flags)
    }

    /// Add a storage image binding
    pub fn add_storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::STORAGE_IMAGE, stage_flags)
    }

    /// Add a standalone sampler binding
    pub fn add_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add_binding(binding, vk::DescriptorType::SAMPLER, stage_flags)
    }

    /// Bindings added so far
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Arc<Device>) -> VulkanResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, self.bindings)
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorSetLayout {
    /// Create a layout from explicit bindings
    pub fn new(device: &Arc<Device>, bindings: Vec<DescriptorBinding>) -> VulkanResult<Self> {
        let layout = device.backend().create_descriptor_set_layout(&bindings)?;
        Ok(Self { device: device.clone(), layout, bindings })
    }

    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Get the bindings used in this layout
    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.device.backend().destroy_descriptor_set_layout(self.layout);
    }
}

impl std::fmt::Debug for DescriptorSetLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetLayout")
            .field("layout", &self.layout)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Per-device descriptor pool with a fixed set cap
pub struct DescriptorPool {
    backend: Arc<dyn DeviceBackend>,
    pool: vk::DescriptorPool,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
    max_sets: u32,
    allocated: u32,
}

impl DescriptorPool {
    /// Create a pool for `max_sets` sets, sized from the device limits
    pub fn new(backend: Arc<dyn DeviceBackend>, limits: &DeviceLimits, max_sets: u32) -> VulkanResult<Self> {
        let pool_sizes = Self::sizes_for(limits, max_sets);
        let pool = backend
            .create_descriptor_pool(max_sets, &pool_sizes)
            .map_err(|err| match err {
                VulkanError::Api(result) => VulkanError::ResourceCreation { resource: "descriptor pool", result },
                other => other,
            })?;
        log::debug!("[DESCRIPTOR] pool created for {} sets", max_sets);
        Ok(Self { backend, pool, pool_sizes, max_sets, allocated: 0 })
    }

    fn sizes_for(limits: &DeviceLimits, max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let per_kind = max_sets.saturating_mul(DESCRIPTORS_PER_SET);
        [
            (vk::DescriptorType::UNIFORM_BUFFER, limits.max_descriptor_set_uniform_buffers),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, limits.max_descriptor_set_sampled_images),
            (vk::DescriptorType::SAMPLED_IMAGE, limits.max_descriptor_set_sampled_images),
            (vk::DescriptorType::SAMPLER, limits.max_descriptor_set_samplers),
            (vk::DescriptorType::STORAGE_BUFFER, limits.max_descriptor_set_storage_buffers),
            (vk::DescriptorType::STORAGE_IMAGE, limits.max_descriptor_set_storage_images),
        ]
        .into_iter()
        .map(|(ty, limit)| vk::DescriptorPoolSize { ty, descriptor_count: limit.min(per_kind).max(1) })
        .collect()
    }

    /// Descriptor counts the pool was created with
    pub fn pool_sizes(&self) -> &[vk::DescriptorPoolSize] {
        &self.pool_sizes
    }

    /// Allocate one set with `layout`
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let exhausted = |allocated| VulkanError::DescriptorPoolExhausted { allocated, max_sets: self.max_sets };
        if self.allocated >= self.max_sets {
            log::error!("[DESCRIPTOR] pool exhausted ({}/{} sets)", self.allocated, self.max_sets);
            return Err(exhausted(self.allocated));
        }
        let set = match self.backend.allocate_descriptor_set(self.pool, layout) {
            Ok(set) => set,
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)) => {
                log::error!("[DESCRIPTOR] pool out of descriptors with {} sets live", self.allocated);
                return Err(exhausted(self.allocated));
            }
            Err(err) => return Err(err),
        };
        self.allocated += 1;
        Ok(set)
    }

    /// Return a set's capacity to the pool
    pub fn free(&mut self, set: vk::DescriptorSet) -> VulkanResult<()> {
        self.backend.free_descriptor_set(self.pool, set)?;
        self.allocated = self.allocated.saturating_sub(1);
        Ok(())
    }

    /// Sets currently allocated
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    /// Hard cap on live sets
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        if self.allocated > 0 {
            log::warn!("[DESCRIPTOR] pool destroyed with {} sets still allocated", self.allocated);
        }
        self.backend.destroy_descriptor_pool(self.pool);
    }
}

/// One allocated descriptor set, freed on drop
pub struct DescriptorSet {
    device: Arc<Device>,
    set: vk::DescriptorSet,
    layout: vk::DescriptorSetLayout,
    name: String,
}

impl DescriptorSet {
    pub(crate) fn from_raw(device: Arc<Device>, set: vk::DescriptorSet, layout: vk::DescriptorSetLayout, name: &str) -> Self {
        Self { device, set, layout, name: name.to_string() }
    }

    /// Get the descriptor set handle
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Layout the set was allocated with
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a raw write to `binding`
    pub fn write(&self, binding: u32, write: DescriptorWrite) {
        self.device.backend().write_descriptor(self.set, binding, &write);
    }

    /// Point `binding` at the whole of a uniform buffer
    pub fn write_uniform_buffer(&self, binding: u32, buffer: &Buffer) {
        self.write(binding, DescriptorWrite::UniformBuffer { buffer: buffer.handle(), offset: 0, range: buffer.size() });
    }

    /// Point `binding` at the whole of a storage buffer
    pub fn write_storage_buffer(&self, binding: u32, buffer: &Buffer) {
        self.write(binding, DescriptorWrite::StorageBuffer { buffer: buffer.handle(), offset: 0, range: buffer.size() });
    }

    /// Bind a texture for sampling; with a sampler the binding is a combined image sampler
    pub fn write_sampled_texture(&self, binding: u32, texture: &Texture, sampler: Option<&Sampler>) {
        let view = texture.view();
        let layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        let write = match sampler {
            Some(sampler) => DescriptorWrite::CombinedImageSampler { view, sampler: sampler.handle(), layout },
            None => DescriptorWrite::SampledImage { view, layout },
        };
        self.write(binding, write);
    }

    /// Bind a texture as a storage image
    pub fn write_storage_texture(&self, binding: u32, texture: &Texture) {
        self.write(binding, DescriptorWrite::StorageImage { view: texture.view() });
    }

    /// Bind a standalone sampler
    pub fn write_sampler(&self, binding: u32, sampler: &Sampler) {
        self.write(binding, DescriptorWrite::Sampler { sampler: sampler.handle() });
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.device.free_descriptor_set(self.set);
    }
}

impl std::fmt::Debug for DescriptorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSet")
            .field("name", &self.name)
            .field("set", &self.set)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;

    fn uniform_layout(device: &Arc<Device>) -> DescriptorSetLayout {
        DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)
            .unwrap()
    }

    #[test]
    fn test_pool_sizes_clamped_by_limits() {
        let limits = DeviceLimits::default();
        let sizes = DescriptorPool::sizes_for(&limits, 1024);
        assert_eq!(sizes.len(), 6);
        let uniform = sizes.iter().find(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER).unwrap();
        assert_eq!(uniform.descriptor_count, limits.max_descriptor_set_uniform_buffers);

        let small = DescriptorPool::sizes_for(&limits, 2);
        assert!(small.iter().all(|s| s.descriptor_count == 16));
    }

    #[test]
    fn test_builder_collects_bindings() {
        let builder = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_storage_buffer(2, vk::ShaderStageFlags::VERTEX);
        let types: Vec<_> = builder.bindings().iter().map(|b| b.descriptor_type).collect();
        assert_eq!(
            types,
            vec![
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::STORAGE_BUFFER
            ]
        );
    }

    #[test]
    fn test_dropping_set_returns_capacity() {
        let (backend, device) = headless_device(DeviceConfig::default().with_max_descriptor_sets(4));
        let layout = uniform_layout(&device);

        let set = device.allocate_descriptor_set(&layout, "object").unwrap();
        assert_eq!(device.descriptor_pool_usage(), (1, 4));
        assert_eq!(backend.stats().descriptor_sets, 1);
        assert_eq!(backend.debug_name(ash::vk::Handle::as_raw(set.handle())).as_deref(), Some("object"));

        drop(set);
        assert_eq!(device.descriptor_pool_usage(), (0, 4));
        assert_eq!(backend.stats().descriptor_sets, 0);
    }

    #[test]
    fn test_uniform_write_is_immediate() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let layout = uniform_layout(&device);
        let buffer = Buffer::new(
            &device,
            128,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "uniforms",
        )
        .unwrap();
        let set = device.allocate_descriptor_set(&layout, "object").unwrap();

        set.write_uniform_buffer(0, &buffer);
        assert_eq!(
            backend.descriptor_write(set.handle(), 0),
            Some(DescriptorWrite::UniformBuffer { buffer: buffer.handle(), offset: 0, range: 128 })
        );
        assert_eq!(backend.stats().validation_errors, 0);
    }
}
