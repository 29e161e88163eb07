//! Drawable components
//!
//! Each renderer keeps its per-device, per-frame GPU state in a
//! [`DeviceDataCache`](crate::render::cache::DeviceDataCache) and records
//! its draw into a caller-supplied command buffer inside an active render
//! pass.

pub mod mesh_renderer;
pub mod text_renderer;
pub mod ui_image;

pub use mesh_renderer::{MeshRenderer, ObjectUniform};
pub use text_renderer::{layout_glyphs, GlyphInstance, GlyphSlot, TextRenderer, TextUniform};
pub use ui_image::{UiImage, UiImageUniform};

use crate::render::commands::CommandBuffer;
use crate::render::device::DeviceId;
use crate::render::VulkanResult;

/// Something that records draws for one in-flight frame
pub trait Renderable {
    /// Name used in logs and debug names
    fn name(&self) -> &str;

    /// Record the draw for slot `frame_index` into `cmd`.
    ///
    /// Slot `frame_index` must not be in use by the GPU; the frame
    /// scheduler guarantees this for the indices it hands out.
    fn draw(&mut self, cmd: &mut CommandBuffer, frame_index: usize) -> VulkanResult<()>;

    /// Release every GPU object held for `device`
    fn release_device(&mut self, device: DeviceId);
}
