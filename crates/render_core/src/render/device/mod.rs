//! Logical device
//!
//! A [`Device`] wraps one backend (one physical GPU with its logical
//! device and graphics queue) together with everything the core shares
//! per GPU: the memory allocator, the descriptor pool, the pipeline cache
//! and the per-thread command pools. Devices are created through a
//! [`DeviceRegistry`], which assigns the stable [`DeviceId`] that
//! per-device caches are keyed by.
//!
//! Devices are shared as `Arc<Device>`; every resource keeps its device
//! alive. Dropping the last reference drains outstanding submissions before
//! anything is destroyed.

pub mod registry;

pub use registry::{DeviceId, DeviceRegistry};

use ash::vk::{self, Handle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::config::DeviceConfig;
use crate::render::backend::{DeviceBackend, DeviceLimits};
use crate::render::commands::{CommandBuffer, CommandPoolRegistry, CommandPoolStats, Fence};
use crate::render::memory::{MemoryAllocator, MemoryStats};
use crate::render::resources::{DescriptorPool, DescriptorSet, DescriptorSetLayout};
use crate::render::{VulkanError, VulkanResult};

/// One GPU context and its shared per-device state
pub struct Device {
    id: DeviceId,
    config: DeviceConfig,
    backend: Arc<dyn DeviceBackend>,
    limits: DeviceLimits,
    allocator: MemoryAllocator,
    descriptor_pool: Mutex<DescriptorPool>,
    pipeline_cache: vk::PipelineCache,
    command_pools: CommandPoolRegistry,
}

impl Device {
    pub(crate) fn new(id: DeviceId, backend: Arc<dyn DeviceBackend>, config: DeviceConfig) -> VulkanResult<Self> {
        config
            .validate()
            .map_err(|e| VulkanError::InitializationFailed(format!("device '{}': {e}", config.name)))?;

        let limits = backend.limits();
        let allocator = MemoryAllocator::new(backend.clone(), config.memory_block_size, config.debug_names);
        let descriptor_pool = DescriptorPool::new(backend.clone(), &limits, config.max_descriptor_sets)?;
        let pipeline_cache = backend.create_pipeline_cache()?;
        let command_pools = CommandPoolRegistry::new(backend.clone());

        log::info!(
            "[DEVICE] '{}' ready on {} ({} frames in flight, {} descriptor sets)",
            config.name,
            backend.name(),
            config.max_frames_in_flight,
            config.max_descriptor_sets
        );

        Ok(Self {
            id,
            config,
            backend,
            limits,
            allocator,
            descriptor_pool: Mutex::new(descriptor_pool),
            pipeline_cache,
            command_pools,
        })
    }

    /// Stable identifier within the registry
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Configured device name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Settings the device was created with
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Number of in-flight frames, and so of per-frame resource slots
    pub fn max_frames_in_flight(&self) -> usize {
        self.config.max_frames_in_flight
    }

    /// Backend entry points
    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    /// Device limits
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Memory sub-allocator
    pub fn allocator(&self) -> &MemoryAllocator {
        &self.allocator
    }

    /// Pipeline cache shared by every pipeline of this device
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    /// Attach a debug name, when enabled in the config
    pub fn set_debug_name<H: Handle>(&self, handle: H, name: &str) {
        if self.config.debug_names {
            self.backend.set_debug_name(H::TYPE, handle.as_raw(), name);
        }
    }

    /// Begin recording a command buffer from the calling thread's pool
    pub fn get_command_buffer(self: &Arc<Self>, name: &str) -> VulkanResult<CommandBuffer> {
        let pool = self.command_pools.pool_for_current_thread()?;
        CommandBuffer::begin(self, pool, name)
    }

    /// End recording, submit to the graphics queue and return the buffer's fence
    pub fn execute(&self, command_buffer: CommandBuffer) -> VulkanResult<Arc<Fence>> {
        if command_buffer.device().id() != self.id {
            return Err(VulkanError::invalid(format!(
                "command buffer '{}' belongs to another device",
                command_buffer.name()
            )));
        }
        command_buffer.submit()
    }

    /// Execute and block until the submission completed
    pub fn execute_and_wait(&self, command_buffer: CommandBuffer) -> VulkanResult<()> {
        self.execute(command_buffer)?.wait()
    }

    /// Wait on every outstanding command buffer of every thread.
    ///
    /// Used at shutdown and around swapchain or render target recreation.
    pub fn flush_command_buffers(&self) -> VulkanResult<()> {
        self.command_pools.flush()
    }

    /// Command pool usage across threads
    pub fn command_pool_stats(&self) -> CommandPoolStats {
        self.command_pools.stats()
    }

    fn descriptor_pool(&self) -> MutexGuard<'_, DescriptorPool> {
        self.descriptor_pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a descriptor set from the shared pool
    pub fn allocate_descriptor_set(self: &Arc<Self>, layout: &DescriptorSetLayout, name: &str) -> VulkanResult<DescriptorSet> {
        let handle = self.descriptor_pool().allocate(layout.handle())?;
        self.set_debug_name(handle, name);
        Ok(DescriptorSet::from_raw(self.clone(), handle, layout.handle(), name))
    }

    pub(crate) fn free_descriptor_set(&self, set: vk::DescriptorSet) {
        if let Err(err) = self.descriptor_pool().free(set) {
            log::error!("[DESCRIPTOR] failed to free descriptor set: {}", err);
        }
    }

    /// `(allocated, max_sets)` of the shared descriptor pool
    pub fn descriptor_pool_usage(&self) -> (u32, u32) {
        let pool = self.descriptor_pool();
        (pool.allocated(), pool.max_sets())
    }

    /// Allocator counters
    pub fn memory_stats(&self) -> MemoryStats {
        self.allocator.stats()
    }

    /// Block until the device finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.backend.wait_idle()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.flush_command_buffers() {
            log::error!("[DEVICE] flush during shutdown of '{}' failed: {}", self.config.name, err);
        }
        self.command_pools.destroy_all();
        self.backend.destroy_pipeline_cache(self.pipeline_cache);
        log::info!("[DEVICE] '{}' destroyed", self.config.name);
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::headless_device;

    #[test]
    fn test_invalid_config_fails_initialization() {
        let backend = Arc::new(crate::render::backends::headless::HeadlessBackend::new(Default::default()));
        let mut registry = DeviceRegistry::new();
        let result = registry.create_device(backend, DeviceConfig::default().with_frames_in_flight(0));
        assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_execute_returns_the_buffer_fence() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("empty").unwrap();
        let expected = cmd.fence().handle();

        let fence = device.execute(cmd).unwrap();
        assert_eq!(fence.handle(), expected);
        assert!(fence.is_submitted());
        assert!(!fence.is_signaled().unwrap());
        assert_eq!(backend.stats().submissions, 1);

        device.flush_command_buffers().unwrap();
        assert!(fence.is_signaled().unwrap());
    }

    #[test]
    fn test_debug_names_follow_config() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("named").unwrap();
        assert_eq!(backend.debug_name(cmd.handle().as_raw()).as_deref(), Some("named"));
        assert_eq!(backend.debug_name(cmd.fence().handle().as_raw()).as_deref(), Some("named fence"));

        let quiet = DeviceConfig { debug_names: false, ..DeviceConfig::default() };
        let (backend, device) = headless_device(quiet);
        let cmd = device.get_command_buffer("unnamed").unwrap();
        assert!(backend.debug_name(cmd.handle().as_raw()).is_none());
    }

    #[test]
    fn test_dropping_device_drains_submissions() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let cmd = device.get_command_buffer("pending").unwrap();
        let fence = device.execute(cmd).unwrap();
        assert_eq!(backend.pending_submissions(), 1);

        drop(device);
        assert_eq!(backend.pending_submissions(), 0);
        assert!(fence.is_signaled().unwrap());
        let stats = backend.stats();
        assert_eq!(stats.command_buffers, 0);
        assert_eq!(stats.validation_errors, 0);
    }
}
