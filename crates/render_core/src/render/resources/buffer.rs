//! Buffer management for vertex, index, uniform and storage data
//!
//! A [`Buffer`] owns its `VkBuffer`, an optional typed view and a
//! sub-allocation from the device's [`MemoryAllocator`](crate::render::memory::MemoryAllocator).
//!
//! Host-visible buffers are written straight into their persistent
//! mapping. Device-local buffers are written through a short-lived staging
//! buffer and a GPU copy, and [`Buffer::upload`] blocks the calling thread
//! until that copy's fence signals. Uploads are meant to be infrequent;
//! callers that need to overlap many of them use [`Buffer::upload_async`]
//! and wait the returned [`PendingUpload`] when convenient.
//!
//! Destroying or reallocating a buffer while the GPU still reads it is the
//! caller's responsibility to avoid; the per-frame slots of
//! [`DeviceDataCache`](crate::render::cache::DeviceDataCache) are the usual
//! way to guarantee it.

use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

use crate::render::commands::{Fence, MemoryBarrierBuilder};
use crate::render::device::Device;
use crate::render::memory::MemoryAllocation;
use crate::render::{VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<MemoryAllocation>,
    view: Option<vk::BufferView>,
    view_format: Option<vk::Format>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    generation: u64,
    name: String,
}

impl Buffer {
    /// Create a buffer and bind freshly allocated memory to it
    pub fn new(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> VulkanResult<Self> {
        let (buffer, allocation) = Self::create_bound(device, size, usage, properties, name)?;
        log::trace!("[BUFFER] created '{}' ({} bytes, {:?})", name, size, usage);
        Ok(Self {
            device: device.clone(),
            buffer,
            allocation: Some(allocation),
            view: None,
            view_format: None,
            size,
            usage,
            properties,
            generation: 0,
            name: name.to_string(),
        })
    }

    /// Host-visible, coherent transfer buffer
    pub fn staging(device: &Arc<Device>, size: vk::DeviceSize, usage: vk::BufferUsageFlags, name: &str) -> VulkanResult<Self> {
        Self::new(
            device,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            name,
        )
    }

    /// Attach a typed texel view covering the whole buffer
    pub fn with_view(mut self, format: vk::Format) -> VulkanResult<Self> {
        let view = self.device.backend().create_buffer_view(self.buffer, format, 0, self.size)?;
        self.device.set_debug_name(view, &format!("{} view", self.name));
        self.view = Some(view);
        self.view_format = Some(format);
        Ok(self)
    }

    fn create_bound(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> VulkanResult<(vk::Buffer, MemoryAllocation)> {
        if size == 0 {
            return Err(VulkanError::invalid(format!("buffer '{name}' created with zero size")));
        }
        let backend = device.backend();
        let buffer = backend.create_buffer(size, usage)?;
        let requirements = backend.buffer_memory_requirements(buffer);

        let allocation = match device.allocator().allocate(requirements, properties, name) {
            Ok(allocation) => allocation,
            Err(err) => {
                backend.destroy_buffer(buffer);
                return Err(err);
            }
        };
        if let Err(err) = backend.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) {
            backend.destroy_buffer(buffer);
            device.allocator().free(allocation);
            return Err(err);
        }
        device.set_debug_name(buffer, name);
        Ok((buffer, allocation))
    }

    /// Replace the buffer and its memory with a new one of `size` bytes.
    ///
    /// Contents are discarded. The old objects are only destroyed once the
    /// new ones exist, so a failed reallocation leaves the buffer intact.
    fn reallocate(&mut self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<()> {
        let (buffer, allocation) = Self::create_bound(&self.device, size, usage, self.properties, &self.name)?;
        let view = match self.view_format {
            Some(format) => match self.device.backend().create_buffer_view(buffer, format, 0, size) {
                Ok(view) => Some(view),
                Err(err) => {
                    self.device.backend().destroy_buffer(buffer);
                    self.device.allocator().free(allocation);
                    return Err(err);
                }
            },
            None => None,
        };

        self.destroy_objects();
        log::debug!("[BUFFER] '{}' reallocated: {} -> {} bytes", self.name, self.size, size);
        self.buffer = buffer;
        self.allocation = Some(allocation);
        self.view = view;
        self.size = size;
        self.usage = usage;
        self.generation += 1;
        Ok(())
    }

    fn destroy_objects(&mut self) {
        let backend = self.device.backend();
        if let Some(view) = self.view.take() {
            backend.destroy_buffer_view(view);
        }
        backend.destroy_buffer(self.buffer);
        if let Some(allocation) = self.allocation.take() {
            self.device.allocator().free(allocation);
        }
    }

    fn allocation(&self) -> VulkanResult<&MemoryAllocation> {
        self.allocation
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("buffer '{}' has no memory", self.name)))
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Texel view, when created with [`Buffer::with_view`]
    pub fn view(&self) -> Option<vk::BufferView> {
        self.view
    }

    /// Get size
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags, including any added by uploads
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory properties requested at creation
    pub fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Bumped every time the underlying `VkBuffer` is replaced.
    ///
    /// Descriptor sets written with an older generation point at a
    /// destroyed buffer and must be rewritten.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device the buffer lives on
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Whether the memory is mapped for direct CPU access
    pub fn is_host_visible(&self) -> bool {
        self.allocation.as_ref().is_some_and(MemoryAllocation::is_host_visible)
    }

    /// Write `data` at the start of the buffer.
    ///
    /// Fails with [`VulkanError::SizeMismatch`] when `data` does not fit.
    /// Device-local buffers without `TRANSFER_DST` usage are reallocated
    /// with it first, which discards their previous contents.
    pub fn upload(&mut self, data: &[u8]) -> VulkanResult<()> {
        let len = data.len() as vk::DeviceSize;
        if len > self.size {
            log::error!("[BUFFER] upload of {} bytes into '{}' ({} bytes)", len, self.name, self.size);
            return Err(VulkanError::SizeMismatch { requested: len, capacity: self.size });
        }
        if data.is_empty() {
            return Ok(());
        }
        if self.is_host_visible() {
            return self.device.allocator().write(self.allocation()?, 0, data);
        }

        self.ensure_transfer_dst()?;
        let staging = self.fill_staging(data)?;
        let mut cmd = self.device.get_command_buffer(&format!("{} upload", self.name))?;
        cmd.copy_buffer_raw(staging.handle(), self.buffer, len);
        self.device.execute_and_wait(cmd)
    }

    /// Like [`Buffer::upload`], but grows the buffer to exactly `data.len()`
    /// bytes first when it is too small.
    pub fn upload_growing(&mut self, data: &[u8]) -> VulkanResult<()> {
        let len = data.len() as vk::DeviceSize;
        if len > self.size {
            let usage = if self.is_host_visible() { self.usage } else { self.usage | vk::BufferUsageFlags::TRANSFER_DST };
            self.reallocate(len, usage)?;
        }
        self.upload(data)
    }

    /// Upload one plain-data value
    pub fn upload_pod<T: Pod>(&mut self, value: &T) -> VulkanResult<()> {
        self.upload(bytemuck::bytes_of(value))
    }

    /// Upload a slice of plain-data values
    pub fn upload_slice<T: Pod>(&mut self, values: &[T]) -> VulkanResult<()> {
        self.upload(bytemuck::cast_slice(values))
    }

    /// Start a device-local upload without waiting for it.
    ///
    /// Host-visible buffers are written immediately and the returned
    /// upload is already complete. Otherwise the staging buffer lives in
    /// the [`PendingUpload`] until its fence signaled.
    pub fn upload_async(&mut self, data: &[u8]) -> VulkanResult<PendingUpload> {
        let len = data.len() as vk::DeviceSize;
        if len > self.size {
            return Err(VulkanError::SizeMismatch { requested: len, capacity: self.size });
        }
        if data.is_empty() || self.is_host_visible() {
            self.upload(data)?;
            return Ok(PendingUpload { fence: None, staging: None });
        }

        self.ensure_transfer_dst()?;
        let staging = self.fill_staging(data)?;
        let mut cmd = self.device.get_command_buffer(&format!("{} async upload", self.name))?;
        cmd.copy_buffer_raw(staging.handle(), self.buffer, len);
        let fence = self.device.execute(cmd)?;
        Ok(PendingUpload { fence: Some(fence), staging: Some(staging) })
    }

    fn ensure_transfer_dst(&mut self) -> VulkanResult<()> {
        if !self.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
            log::debug!("[BUFFER] '{}' lacks TRANSFER_DST usage, reallocating", self.name);
            self.reallocate(self.size, self.usage | vk::BufferUsageFlags::TRANSFER_DST)?;
        }
        Ok(())
    }

    fn fill_staging(&self, data: &[u8]) -> VulkanResult<Buffer> {
        let mut staging = Buffer::staging(
            &self.device,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{} staging", self.name),
        )?;
        staging.upload(data)?;
        Ok(staging)
    }

    /// Make this buffer a copy of `other`, resizing to match it.
    ///
    /// Records a host-write to transfer-read barrier ahead of the copy so
    /// CPU writes to `other` are visible, then blocks until the copy ran.
    pub fn copy_from(&mut self, other: &Buffer) -> VulkanResult<()> {
        if !Arc::ptr_eq(&self.device, &other.device) {
            return Err(VulkanError::invalid(format!("'{}' and '{}' live on different devices", self.name, other.name)));
        }
        if !other.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            return Err(VulkanError::invalid(format!("'{}' lacks TRANSFER_SRC usage", other.name)));
        }
        let usage = self.usage | vk::BufferUsageFlags::TRANSFER_DST;
        if other.size != self.size || usage != self.usage {
            self.reallocate(other.size, usage)?;
        }

        let mut cmd = self.device.get_command_buffer(&format!("{} copy", self.name))?;
        cmd.memory_barrier(MemoryBarrierBuilder::buffer_host_write_to_transfer_read());
        cmd.copy_buffer_raw(other.buffer, self.buffer, self.size);
        if self.is_host_visible() {
            cmd.memory_barrier(MemoryBarrierBuilder::buffer_transfer_to_host_read());
        }
        self.device.execute_and_wait(cmd)
    }

    /// Read the whole buffer back to the CPU.
    ///
    /// Device-local buffers are copied into a staging buffer first, which
    /// needs `TRANSFER_SRC` usage and blocks until the copy ran.
    pub fn read_back(&self) -> VulkanResult<Vec<u8>> {
        if self.is_host_visible() {
            return self.device.allocator().read(self.allocation()?, 0, self.size);
        }
        let mut staging = Buffer::staging(
            &self.device,
            self.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            &format!("{} readback", self.name),
        )?;
        staging.copy_from(self)?;
        staging.read_back()
    }

    /// Reallocate to `size` bytes, discarding contents; no-op when unchanged
    pub fn resize(&mut self, size: vk::DeviceSize) -> VulkanResult<()> {
        if size == self.size {
            return Ok(());
        }
        self.reallocate(size, self.usage)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy_objects();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A device-local upload in flight, holding its staging buffer
#[must_use = "dropping a pending upload blocks until it completes"]
pub struct PendingUpload {
    fence: Option<Arc<Fence>>,
    staging: Option<Buffer>,
}

impl PendingUpload {
    /// Non-blocking completion check
    pub fn is_complete(&self) -> VulkanResult<bool> {
        match &self.fence {
            Some(fence) => fence.is_signaled(),
            None => Ok(true),
        }
    }

    /// Fence of the copy, `None` when the upload finished synchronously
    pub fn fence(&self) -> Option<&Arc<Fence>> {
        self.fence.as_ref()
    }

    /// Block until the copy finished and release the staging buffer
    pub fn wait(mut self) -> VulkanResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> VulkanResult<()> {
        if let Some(fence) = self.fence.take() {
            fence.wait()?;
        }
        self.staging = None;
        Ok(())
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            log::error!("[BUFFER] pending upload failed while dropped: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;

    fn host_visible() -> vk::MemoryPropertyFlags {
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let result = Buffer::new(&device, 0, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), "empty");
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_oversized_upload_is_size_mismatch() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let mut buffer = Buffer::new(&device, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), "small").unwrap();
        let result = buffer.upload(&[0u8; 32]);
        assert!(matches!(result, Err(VulkanError::SizeMismatch { requested: 32, capacity: 16 })));
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.generation(), 0);
    }

    #[test]
    fn test_upload_growing_reallocates_once() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let mut buffer = Buffer::new(&device, 16, vk::BufferUsageFlags::STORAGE_BUFFER, host_visible(), "glyphs").unwrap();

        buffer.upload_growing(&[1u8; 8]).unwrap();
        assert_eq!(buffer.generation(), 0);

        let old_handle = buffer.handle();
        buffer.upload_growing(&[2u8; 100]).unwrap();
        assert_eq!(buffer.generation(), 1);
        assert_eq!(buffer.size(), 100);
        assert_ne!(buffer.handle(), old_handle);
        assert_eq!(buffer.read_back().unwrap(), vec![2u8; 100]);
    }

    #[test]
    fn test_device_local_upload_gains_transfer_dst() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let mut buffer = Buffer::new(
            &device,
            64,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "vertices",
        )
        .unwrap();
        assert!(!buffer.is_host_visible());

        buffer.upload(&[7u8; 64]).unwrap();
        assert!(buffer.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(buffer.generation(), 1);
        assert_eq!(buffer.read_back().unwrap(), vec![7u8; 64]);
        assert_eq!(backend.pending_submissions(), 0);
        assert_eq!(backend.stats().validation_errors, 0);
    }

    #[test]
    fn test_async_upload_completes_on_wait() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let mut buffer = Buffer::new(
            &device,
            32,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "async",
        )
        .unwrap();

        let pending = buffer.upload_async(&[9u8; 32]).unwrap();
        assert!(!pending.is_complete().unwrap());
        assert_eq!(backend.pending_submissions(), 1);
        assert_eq!(backend.stats().buffers, 2);

        pending.wait().unwrap();
        assert_eq!(backend.stats().buffers, 1);
        assert_eq!(buffer.read_back().unwrap(), vec![9u8; 32]);
    }

    #[test]
    fn test_copy_from_resizes_to_source() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let mut source = Buffer::new(&device, 48, vk::BufferUsageFlags::TRANSFER_SRC, host_visible(), "source").unwrap();
        source.upload(&[5u8; 48]).unwrap();
        let mut target = Buffer::new(&device, 16, vk::BufferUsageFlags::TRANSFER_DST, host_visible(), "target").unwrap();

        target.copy_from(&source).unwrap();
        assert_eq!(target.size(), 48);
        assert_eq!(target.read_back().unwrap(), vec![5u8; 48]);
    }

    #[test]
    fn test_drop_returns_memory() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let buffer = Buffer::new(&device, 256, vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER, host_visible(), "frame")
            .unwrap()
            .with_view(vk::Format::R32_SFLOAT)
            .unwrap();
        assert!(buffer.view().is_some());
        assert_eq!(device.memory_stats().allocations, 1);

        drop(buffer);
        assert_eq!(device.memory_stats().allocations, 0);
        assert_eq!(backend.stats().buffers, 0);
    }
}
