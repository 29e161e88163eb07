//! GPU resources owned by one device
//!
//! Every resource holds an `Arc<Device>`, so a device outlives everything
//! created on it, and releases its objects on drop.

pub mod buffer;
pub mod descriptor_set;
pub mod render_pass;
pub mod sampler;
pub mod texture;

pub use buffer::{Buffer, PendingUpload};
pub use descriptor_set::{DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder};
pub use render_pass::{Framebuffer, RenderPass};
pub use sampler::Sampler;
pub use texture::Texture;
