//! Arena of devices addressed by stable ids

use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

use super::Device;
use crate::core::config::DeviceConfig;
use crate::render::backend::DeviceBackend;
use crate::render::VulkanResult;

new_key_type! {
    /// Stable device identifier, used as the key of every per-device cache
    pub struct DeviceId;
}

/// Owns the devices of an application
#[derive(Default)]
pub struct DeviceRegistry {
    devices: SlotMap<DeviceId, Arc<Device>>,
}

impl DeviceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device on `backend` and register it
    pub fn create_device(&mut self, backend: Arc<dyn DeviceBackend>, config: DeviceConfig) -> VulkanResult<Arc<Device>> {
        let id = self
            .devices
            .try_insert_with_key(|id| Device::new(id, backend, config).map(Arc::new))?;
        Ok(self.devices[id].clone())
    }

    /// Look up a device
    pub fn get(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.devices.get(id)
    }

    /// All registered devices
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    /// Number of registered devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no device is registered
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Wait for outstanding work on every device
    pub fn flush_all(&self) -> VulkanResult<()> {
        self.devices.values().try_for_each(|device| device.flush_command_buffers())
    }

    /// Unregister a device after draining its work.
    ///
    /// The device itself is destroyed once the last resource referencing it is gone.
    pub fn remove_device(&mut self, id: DeviceId) -> VulkanResult<Option<Arc<Device>>> {
        if let Some(device) = self.devices.get(id) {
            device.flush_command_buffers()?;
        }
        Ok(self.devices.remove(id))
    }

    /// Drain and unregister every device
    pub fn shutdown(&mut self) -> VulkanResult<()> {
        self.flush_all()?;
        for (_, device) in self.devices.drain() {
            if Arc::strong_count(&device) > 1 {
                log::warn!(
                    "[DEVICE] '{}' still referenced by {} holders at shutdown",
                    device.name(),
                    Arc::strong_count(&device) - 1
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};

    #[test]
    fn test_devices_get_distinct_stable_ids() {
        let mut registry = DeviceRegistry::new();
        let a = registry
            .create_device(Arc::new(HeadlessBackend::new(HeadlessConfig::default().named("gpu0"))), DeviceConfig::default())
            .unwrap();
        let b = registry
            .create_device(Arc::new(HeadlessBackend::new(HeadlessConfig::default().named("gpu1"))), DeviceConfig::default())
            .unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(registry.get(a.id()).unwrap(), &a));

        let removed = registry.remove_device(a.id()).unwrap().unwrap();
        assert!(Arc::ptr_eq(&removed, &a));
        assert!(registry.get(a.id()).is_none());
        assert!(registry.get(b.id()).is_some());
    }

    #[test]
    fn test_shutdown_empties_registry() {
        let mut registry = DeviceRegistry::new();
        registry
            .create_device(Arc::new(HeadlessBackend::new(HeadlessConfig::default())), DeviceConfig::default())
            .unwrap();
        registry.shutdown().unwrap();
        assert!(registry.is_empty());
    }
}
