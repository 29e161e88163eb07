//! # Rendering Core
//!
//! Per-device GPU resource lifecycle and command submission.
//!
//! ## Layers
//!
//! - **Backend**: [`DeviceBackend`] is the raw device API; the Vulkan and
//!   headless backends implement it
//! - **Device**: [`Device`] owns the allocator, the descriptor pool and the
//!   per-thread command pools of one logical device
//! - **Resources**: RAII [`Buffer`], [`Texture`], [`DescriptorSet`] and
//!   friends, each holding its device alive
//! - **Commands**: [`CommandBuffer`] recording with redundant-bind
//!   elimination, [`Fence`] tracking of submitted work
//! - **Cache**: [`DeviceDataCache`] keeps each renderable's per-device,
//!   per-frame state and rebuilds only dirty slots
//! - **Frames**: [`FrameScheduler`] hands out frame indices once the slot's
//!   previous work has finished

pub mod assets;
pub mod backend;
pub mod backends;
pub mod cache;
pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod material;
pub mod memory;
pub mod renderers;
pub mod resources;

#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod testing;

pub use backend::{DeviceBackend, GpuCommand};
pub use backends::headless::{HeadlessBackend, HeadlessConfig, HeadlessStats};
pub use backends::vulkan::{VulkanBackend, VulkanContext};
pub use cache::{AssetRef, DeviceDataCache, FrameSlot, PerDevice};
pub use commands::{CommandBuffer, Fence};
pub use device::{Device, DeviceId, DeviceRegistry};
pub use error::{VulkanError, VulkanResult};
pub use frame::{Frame, FrameScheduler};
pub use material::{Material, MaterialDesc};
pub use memory::{MemoryAllocation, MemoryAllocator};
pub use renderers::Renderable;
pub use resources::{Buffer, DescriptorPool, DescriptorSet, Texture};
