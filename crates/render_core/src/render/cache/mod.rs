//! Device-scoped caches of GPU state derived from CPU-side objects

pub mod asset_ref;
pub mod device_data;
pub mod per_device;

pub use asset_ref::AssetRef;
pub use device_data::{DeviceData, DeviceDataCache, FrameSlot};
pub use per_device::PerDevice;
