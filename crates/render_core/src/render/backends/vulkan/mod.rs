//! Vulkan backend built on `ash`

mod backend;
pub mod context;
mod pipeline;
mod recording;

pub use backend::VulkanBackend;
pub use context::{PhysicalDeviceInfo, VulkanContext};
