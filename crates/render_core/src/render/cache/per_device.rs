//! Lazily created per-device objects
//!
//! CPU-side assets (meshes, images, fonts, materials) are shared by every
//! device; their GPU counterparts are created on first use for a device
//! and kept in a [`PerDevice`] table keyed by [`DeviceId`].

use slotmap::SecondaryMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::render::device::DeviceId;

/// Table of one `Arc<T>` per device
pub struct PerDevice<T> {
    entries: Mutex<SecondaryMap<DeviceId, Arc<T>>>,
}

impl<T> PerDevice<T> {
    /// Empty table
    pub fn new() -> Self {
        Self { entries: Mutex::new(SecondaryMap::new()) }
    }

    fn entries(&self) -> MutexGuard<'_, SecondaryMap<DeviceId, Arc<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing entry for `device`
    pub fn get(&self, device: DeviceId) -> Option<Arc<T>> {
        self.entries().get(device).cloned()
    }

    /// Entry for `device`, created by `init` on first use.
    ///
    /// `init` runs with the table locked and must not touch this table.
    /// A failed `init` stores nothing, so the next call tries again.
    pub fn get_or_try_init<E>(&self, device: DeviceId, init: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
        let mut entries = self.entries();
        if let Some(existing) = entries.get(device) {
            return Ok(existing.clone());
        }
        let value = Arc::new(init()?);
        entries.insert(device, value.clone());
        Ok(value)
    }

    /// Remove and return the entry for `device`
    pub fn remove(&self, device: DeviceId) -> Option<Arc<T>> {
        self.entries().remove(device)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of devices with an entry
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no device has an entry yet
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl<T> Default for PerDevice<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PerDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerDevice").field("devices", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_init_runs_once_per_device() {
        let mut ids: SlotMap<DeviceId, ()> = SlotMap::with_key();
        let first = ids.insert(());
        let second = ids.insert(());
        let table = PerDevice::new();

        let mut calls = 0;
        for _ in 0..3 {
            let value = table
                .get_or_try_init(first, || {
                    calls += 1;
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls, 1);
        assert!(table.get(second).is_none());

        table.get_or_try_init(second, || Ok::<_, ()>(9)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.remove(first).as_deref(), Some(&7));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_failed_init_is_retried() {
        let mut ids: SlotMap<DeviceId, ()> = SlotMap::with_key();
        let id = ids.insert(());
        let table: PerDevice<u32> = PerDevice::new();

        assert_eq!(table.get_or_try_init(id, || Err("busy")).unwrap_err(), "busy");
        assert!(table.is_empty());
        assert_eq!(*table.get_or_try_init(id, || Ok::<_, &str>(3)).unwrap(), 3);
    }
}
