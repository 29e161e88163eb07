//! Render passes and framebuffers
//!
//! Pipelines are compiled per render pass, so materials key their pipeline
//! variants by the [`RenderPass`] handle the command buffer has open.

use ash::vk;
use std::sync::Arc;

use super::Texture;
use crate::render::backend::{ClearValue, RenderPassDesc};
use crate::render::device::Device;
use crate::render::{VulkanError, VulkanResult};

/// Single-subpass render pass with automatic cleanup
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    desc: RenderPassDesc,
}

impl RenderPass {
    /// Create a render pass from `desc`
    pub fn new(device: &Arc<Device>, desc: RenderPassDesc, name: &str) -> VulkanResult<Self> {
        let render_pass = device.backend().create_render_pass(&desc)?;
        device.set_debug_name(render_pass, name);
        Ok(Self { device: device.clone(), render_pass, desc })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Attachment formats and final layout
    pub fn desc(&self) -> &RenderPassDesc {
        &self.desc
    }

    /// Colour plus depth clear values in attachment order
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<ClearValue> {
        let mut values = vec![ClearValue::Color(color)];
        if self.desc.depth_format.is_some() {
            values.push(ClearValue::DepthStencil { depth: 1.0, stencil: 0 });
        }
        values
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.device.backend().destroy_render_pass(self.render_pass);
    }
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass").field("render_pass", &self.render_pass).field("desc", &self.desc).finish()
    }
}

/// Framebuffer over a colour and optional depth texture
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer for `render_pass`; attachment extents must match
    pub fn new(device: &Arc<Device>, render_pass: &RenderPass, color: &Texture, depth: Option<&Texture>, name: &str) -> VulkanResult<Self> {
        let extent = color.extent();
        let mut attachments = vec![color.view()];
        if let Some(depth) = depth {
            if depth.extent() != extent {
                return Err(VulkanError::invalid(format!(
                    "framebuffer '{name}': depth {:?} does not match colour {:?}",
                    depth.extent(),
                    extent
                )));
            }
            attachments.push(depth.view());
        }
        if render_pass.desc().depth_format.is_some() != depth.is_some() {
            return Err(VulkanError::invalid(format!("framebuffer '{name}' does not match the render pass attachments")));
        }

        let framebuffer = device.backend().create_framebuffer(render_pass.handle(), &attachments, extent)?;
        device.set_debug_name(framebuffer, name);
        Ok(Self { device: device.clone(), framebuffer, extent })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Size of the attachments
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.device.backend().destroy_framebuffer(self.framebuffer);
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer").field("framebuffer", &self.framebuffer).field("extent", &self.extent).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::backend::ImageDesc;
    use crate::render::testing::headless_device;

    #[test]
    fn test_framebuffer_checks_attachments() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let pass = RenderPass::new(&device, RenderPassDesc::forward(vk::Format::R8G8B8A8_UNORM), "forward").unwrap();
        let color = Texture::new(&device, ImageDesc::color_target(16, 16, vk::Format::R8G8B8A8_UNORM), "color").unwrap();
        let depth = Texture::new(&device, ImageDesc::depth_target(16, 16), "depth").unwrap();
        let small_depth = Texture::new(&device, ImageDesc::depth_target(8, 8), "small depth").unwrap();

        assert!(Framebuffer::new(&device, &pass, &color, None, "no depth").is_err());
        assert!(Framebuffer::new(&device, &pass, &color, Some(&small_depth), "mismatch").is_err());

        let framebuffer = Framebuffer::new(&device, &pass, &color, Some(&depth), "main").unwrap();
        assert_eq!(framebuffer.extent(), vk::Extent2D { width: 16, height: 16 });
        assert_eq!(pass.clear_values([0.0; 4]).len(), 2);
    }
}
