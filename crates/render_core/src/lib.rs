//! # Render Core
//!
//! The GPU-facing core of a multi-device renderer: memory suballocation,
//! RAII buffers and textures, descriptor management, command recording and
//! submission with fence tracking, and a per-renderable dirty cache that
//! keeps one copy of every GPU resource per device and frame in flight.
//!
//! Two backends ship with the crate. The Vulkan backend drives real
//! adapters through `ash`; the headless backend runs the same lifecycle on
//! the CPU, which is what the test suite uses.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), VulkanError> {
//!     let config = DeviceConfig::default();
//!     let mut registry = DeviceRegistry::new();
//!     let device = registry.create_device(Arc::new(HeadlessBackend::new(HeadlessConfig::default())), config)?;
//!
//!     let mut buffer = Buffer::new(
//!         &device,
//!         256,
//!         ash::vk::BufferUsageFlags::VERTEX_BUFFER,
//!         ash::vk::MemoryPropertyFlags::HOST_VISIBLE | ash::vk::MemoryPropertyFlags::HOST_COHERENT,
//!         "vertices",
//!     )?;
//!     buffer.upload(&[0u8; 256])?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for users of the crate
pub mod prelude {
    pub use crate::{
        core::config::{DeviceConfig, RenderCoreConfig},
        foundation::math::{Mat4, Vec2, Vec3, Vec4},
        render::{
            assets::{Font, ImageAsset, Mesh, Vertex},
            renderers::{MeshRenderer, Renderable, TextRenderer, UiImage},
            AssetRef, Buffer, CommandBuffer, Device, DeviceDataCache, DeviceId, DeviceRegistry, Fence, Frame,
            FrameScheduler, HeadlessBackend, HeadlessConfig, Material, MaterialDesc, Texture, VulkanError,
            VulkanResult,
        },
    };
}
