//! Per-renderable, per-device, per-frame GPU state
//!
//! Every drawable keeps one [`DeviceDataCache`]. For each device it draws
//! on, the cache holds `max_frames_in_flight` [`FrameSlot`]s, each with a
//! uniform buffer, a descriptor set, renderer-specific auxiliary state and
//! a dirty flag. The protocol:
//!
//! 1. The first [`prepare`](DeviceDataCache::prepare) for a device creates
//!    all of its slots, dirty.
//! 2. `prepare` on a dirty slot runs the rebuild callback and clears that
//!    slot's dirty flag only when the rebuild succeeded.
//! 3. Uniform buffers and descriptor sets are created once per slot
//!    ([`FrameSlot::ensure_resources`]) and reused; only their contents
//!    change.
//! 4. [`mark_dirty`](DeviceDataCache::mark_dirty) flags every slot of every
//!    device, since any slot may be the next one drawn.
//! 5. [`clear`](DeviceDataCache::clear), also run on drop, releases every
//!    slot's resources on every device.
//!
//! Slot `i` must not be rebuilt while frame `i` is still executing on the
//! GPU. [`FrameScheduler`](crate::render::frame::FrameScheduler) waits a
//! slot's previous fences before handing out its index again.

use slotmap::SecondaryMap;
use std::sync::Arc;

use crate::render::device::{Device, DeviceId};
use crate::render::resources::{Buffer, DescriptorSet, DescriptorSetLayout};
use crate::render::{VulkanError, VulkanResult};

/// GPU state of one renderable for one in-flight frame
#[derive(Debug)]
pub struct FrameSlot<A> {
    /// Per-object uniform buffer, created on first rebuild
    pub uniform_buffer: Option<Buffer>,
    /// Descriptor set pointing at the slot's resources
    pub descriptor_set: Option<DescriptorSet>,
    /// Renderer-specific buffers and bookkeeping
    pub aux: A,
    dirty: bool,
}

impl<A: Default> FrameSlot<A> {
    fn new() -> Self {
        Self { uniform_buffer: None, descriptor_set: None, aux: A::default(), dirty: true }
    }
}

impl<A> FrameSlot<A> {
    /// Whether the slot must be rebuilt before its next draw
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Create the uniform buffer and descriptor set on first use and return both.
    ///
    /// The uniform buffer is host visible so per-frame updates are plain
    /// writes into its mapping.
    pub fn ensure_resources(
        &mut self,
        device: &Arc<Device>,
        uniform_size: u64,
        layout: &DescriptorSetLayout,
        name: &str,
    ) -> VulkanResult<(&mut Buffer, &DescriptorSet)> {
        if self.uniform_buffer.is_none() {
            self.uniform_buffer = Some(Buffer::new(
                device,
                uniform_size,
                ash::vk::BufferUsageFlags::UNIFORM_BUFFER,
                ash::vk::MemoryPropertyFlags::HOST_VISIBLE | ash::vk::MemoryPropertyFlags::HOST_COHERENT,
                &format!("{name} uniforms"),
            )?);
        }
        if self.descriptor_set.is_none() {
            self.descriptor_set = Some(device.allocate_descriptor_set(layout, name)?);
        }
        match (self.uniform_buffer.as_mut(), self.descriptor_set.as_ref()) {
            (Some(buffer), Some(set)) => Ok((buffer, set)),
            _ => Err(VulkanError::invalid(format!("frame slot '{name}' lost its resources"))),
        }
    }
}

/// Slots of one renderable on one device
#[derive(Debug)]
pub struct DeviceData<A> {
    device: Arc<Device>,
    slots: Vec<FrameSlot<A>>,
}

impl<A> DeviceData<A> {
    /// Device the slots live on
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// All slots, indexed by frame index
    pub fn slots(&self) -> &[FrameSlot<A>] {
        &self.slots
    }
}

/// Device-scoped, frame-sliced cache of a renderable's GPU state
#[derive(Debug)]
pub struct DeviceDataCache<A> {
    owner: String,
    entries: SecondaryMap<DeviceId, DeviceData<A>>,
}

impl<A: Default> DeviceDataCache<A> {
    /// Empty cache; `owner` names the renderable in logs
    pub fn new(owner: impl Into<String>) -> Self {
        Self { owner: owner.into(), entries: SecondaryMap::new() }
    }

    /// Make slot `frame_index` of `device` current and return it.
    ///
    /// Dirty slots are rebuilt through `rebuild` first. When `rebuild`
    /// fails the error is returned and the slot stays dirty, so the next
    /// frame retries.
    pub fn prepare<F>(&mut self, device: &Arc<Device>, frame_index: usize, rebuild: F) -> VulkanResult<&mut FrameSlot<A>>
    where
        F: FnOnce(&Arc<Device>, &mut FrameSlot<A>) -> VulkanResult<()>,
    {
        let frames = device.max_frames_in_flight();
        if frame_index >= frames {
            return Err(VulkanError::invalid(format!(
                "'{}': frame index {frame_index} outside {frames} frames in flight",
                self.owner
            )));
        }

        if !self.entries.contains_key(device.id()) {
            log::debug!("[DEVICE_DATA] '{}' allocating {} slots on '{}'", self.owner, frames, device.name());
            let slots = (0..frames).map(|_| FrameSlot::new()).collect();
            self.entries.insert(device.id(), DeviceData { device: device.clone(), slots });
        }
        let data = self
            .entries
            .get_mut(device.id())
            .ok_or_else(|| VulkanError::invalid(format!("'{}' has no data for '{}'", self.owner, device.name())))?;

        let slot = &mut data.slots[frame_index];
        if slot.dirty {
            rebuild(&data.device, slot)?;
            slot.dirty = false;
            log::trace!("[DEVICE_DATA] '{}' rebuilt slot {} on '{}'", self.owner, frame_index, device.name());
        }
        Ok(slot)
    }
}

impl<A> DeviceDataCache<A> {
    /// Flag every slot of every device for rebuild
    pub fn mark_dirty(&mut self) {
        for (_, data) in self.entries.iter_mut() {
            for slot in &mut data.slots {
                slot.dirty = true;
            }
        }
    }

    /// Whether slot `frame_index` of `device` needs a rebuild; slots not created yet do
    pub fn is_dirty(&self, device: DeviceId, frame_index: usize) -> bool {
        self.slot(device, frame_index).map_or(true, FrameSlot::is_dirty)
    }

    /// Existing slot, if the renderable has drawn on `device`
    pub fn slot(&self, device: DeviceId, frame_index: usize) -> Option<&FrameSlot<A>> {
        self.entries.get(device).and_then(|data| data.slots.get(frame_index))
    }

    /// Data held for `device`
    pub fn device_data(&self, device: DeviceId) -> Option<&DeviceData<A>> {
        self.entries.get(device)
    }

    /// Number of devices with data
    pub fn device_count(&self) -> usize {
        self.entries.len()
    }

    /// Release every slot held for `device`
    pub fn release_device(&mut self, device: DeviceId) {
        if let Some(data) = self.entries.remove(device) {
            log::debug!("[DEVICE_DATA] '{}' released {} slots on '{}'", self.owner, data.slots.len(), data.device.name());
            Self::release_slots(data);
        }
    }

    /// Release every slot on every device
    pub fn clear(&mut self) {
        for (_, data) in self.entries.drain() {
            Self::release_slots(data);
        }
    }

    fn release_slots(data: DeviceData<A>) {
        for mut slot in data.slots {
            // Free the set before the buffer it points at
            drop(slot.descriptor_set.take());
            drop(slot.uniform_buffer.take());
        }
    }
}

impl<A> Drop for DeviceDataCache<A> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;
    use ash::vk;

    #[test]
    fn test_prepare_clears_only_the_prepared_slot() {
        let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(3));
        let mut cache: DeviceDataCache<u32> = DeviceDataCache::new("label");
        assert!(cache.is_dirty(device.id(), 0));

        cache
            .prepare(&device, 1, |_, slot| {
                slot.aux += 1;
                Ok(())
            })
            .unwrap();
        assert!(cache.is_dirty(device.id(), 0));
        assert!(!cache.is_dirty(device.id(), 1));
        assert!(cache.is_dirty(device.id(), 2));

        cache.mark_dirty();
        assert!((0..3).all(|i| cache.is_dirty(device.id(), i)));
    }

    #[test]
    fn test_failed_rebuild_keeps_slot_dirty() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let mut cache: DeviceDataCache<()> = DeviceDataCache::new("broken");

        let result = cache.prepare(&device, 0, |_, _| Err(VulkanError::invalid("staging busy")));
        assert!(result.is_err());
        assert!(cache.is_dirty(device.id(), 0));

        cache.prepare(&device, 0, |_, _| Ok(())).unwrap();
        assert!(!cache.is_dirty(device.id(), 0));
    }

    #[test]
    fn test_frame_index_out_of_range() {
        let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
        let mut cache: DeviceDataCache<()> = DeviceDataCache::new("overflow");
        assert!(cache.prepare(&device, 2, |_, _| Ok(())).is_err());
        assert_eq!(cache.device_count(), 0);
    }

    #[test]
    fn test_resources_created_once_and_released() {
        let (backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
        let layout = crate::render::resources::DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&device)
            .unwrap();
        let mut cache: DeviceDataCache<()> = DeviceDataCache::new("panel");

        for _ in 0..2 {
            cache.mark_dirty();
            for frame in 0..2 {
                cache
                    .prepare(&device, frame, |device, slot| {
                        let (buffer, set) = slot.ensure_resources(device, 64, &layout, "panel")?;
                        buffer.upload(&[1u8; 64])?;
                        set.write_uniform_buffer(0, buffer);
                        Ok(())
                    })
                    .unwrap();
            }
        }
        assert_eq!(backend.stats().buffers, 2);
        assert_eq!(device.descriptor_pool_usage().0, 2);

        cache.release_device(device.id());
        assert_eq!(backend.stats().buffers, 0);
        assert_eq!(device.descriptor_pool_usage().0, 0);
        assert!(cache.is_dirty(device.id(), 0));
    }
}
