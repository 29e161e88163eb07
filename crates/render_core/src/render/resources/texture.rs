//! Device-local 2D textures and render targets
//!
//! A [`Texture`] owns an image, its default view and its memory, and
//! remembers the layout the last recorded transition left it in. Uploads
//! and readbacks go through staging buffers and block until the copy ran,
//! like [`Buffer::upload`].

use ash::vk;
use std::sync::Arc;

use super::Buffer;
use crate::render::backend::{GpuCommand, ImageDesc};
use crate::render::commands::MemoryBarrierBuilder;
use crate::render::device::Device;
use crate::render::memory::MemoryAllocation;
use crate::render::{VulkanError, VulkanResult};

/// Image, view and memory with automatic cleanup
pub struct Texture {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<MemoryAllocation>,
    desc: ImageDesc,
    layout: vk::ImageLayout,
    name: String,
}

impl Texture {
    /// Create an image in device-local memory with a view over `desc.aspect`
    pub fn new(device: &Arc<Device>, desc: ImageDesc, name: &str) -> VulkanResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(VulkanError::invalid(format!("texture '{name}' has an empty extent")));
        }
        let backend = device.backend();
        let image = backend.create_image(&desc)?;
        let requirements = backend.image_memory_requirements(image);
        let allocation = match device.allocator().allocate(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL, name) {
            Ok(allocation) => allocation,
            Err(err) => {
                backend.destroy_image(image);
                return Err(err);
            }
        };

        let view = backend
            .bind_image_memory(image, allocation.memory(), allocation.offset())
            .and_then(|()| backend.create_image_view(image, &desc));
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                backend.destroy_image(image);
                device.allocator().free(allocation);
                return Err(err);
            }
        };

        device.set_debug_name(image, name);
        device.set_debug_name(view, &format!("{name} view"));
        log::debug!(
            "[TEXTURE] created '{}' {}x{} {:?}",
            name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        Ok(Self {
            device: device.clone(),
            image,
            view,
            allocation: Some(allocation),
            desc,
            layout: vk::ImageLayout::UNDEFINED,
            name: name.to_string(),
        })
    }

    /// Get the image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get the default image view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Width and height
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    /// Aspect covered by the view
    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.desc.aspect
    }

    /// Creation parameters
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Layout after the last transition recorded through this texture
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Record that external commands (e.g. a render pass) left the image in `layout`
    pub fn assume_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn region(&self) -> vk::BufferImageCopy {
        vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: self.desc.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width: self.desc.extent.width, height: self.desc.extent.height, depth: 1 },
        }
    }

    fn byte_size(&self) -> VulkanResult<u64> {
        self.desc
            .byte_size()
            .ok_or_else(|| VulkanError::invalid(format!("texture '{}' has unstageable format {:?}", self.name, self.desc.format)))
    }

    /// Replace the whole image with tightly packed `pixels` and leave it shader-readable
    pub fn upload(&mut self, pixels: &[u8]) -> VulkanResult<()> {
        let expected = self.byte_size()?;
        if pixels.len() as u64 != expected {
            return Err(VulkanError::SizeMismatch { requested: pixels.len() as u64, capacity: expected });
        }
        if !self.desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            return Err(VulkanError::invalid(format!("texture '{}' lacks TRANSFER_DST usage", self.name)));
        }

        let mut staging = Buffer::staging(&self.device, expected, vk::BufferUsageFlags::TRANSFER_SRC, &format!("{} staging", self.name))?;
        staging.upload(pixels)?;

        let mut cmd = self.device.get_command_buffer(&format!("{} upload", self.name))?;
        cmd.transition_image(MemoryBarrierBuilder::image_to_transfer_dst(self.image, self.desc.aspect, self.layout));
        cmd.record(GpuCommand::CopyBufferToImage { src: staging.handle(), dst: self.image, regions: vec![self.region()] });
        cmd.transition_image(MemoryBarrierBuilder::image_transfer_dst_to_shader_read(self.image, self.desc.aspect));
        self.device.execute_and_wait(cmd)?;

        self.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        Ok(())
    }

    /// Copy the whole image back to the CPU, tightly packed.
    ///
    /// The image returns to its previous layout afterwards, or stays a
    /// transfer source when it had no defined contents.
    pub fn read_back(&mut self) -> VulkanResult<Vec<u8>> {
        let size = self.byte_size()?;
        if !self.desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC) {
            return Err(VulkanError::invalid(format!("texture '{}' lacks TRANSFER_SRC usage", self.name)));
        }
        let staging = Buffer::staging(&self.device, size, vk::BufferUsageFlags::TRANSFER_DST, &format!("{} readback", self.name))?;

        let restore = match self.layout {
            vk::ImageLayout::UNDEFINED => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            layout => layout,
        };
        let mut cmd = self.device.get_command_buffer(&format!("{} readback", self.name))?;
        cmd.transition_image(MemoryBarrierBuilder::image_to_transfer_src(self.image, self.desc.aspect, self.layout));
        cmd.record(GpuCommand::CopyImageToBuffer { src: self.image, dst: staging.handle(), regions: vec![self.region()] });
        if restore != vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
            cmd.transition_image(MemoryBarrierBuilder::image_transfer_src_to(self.image, self.desc.aspect, restore));
        }
        cmd.memory_barrier(MemoryBarrierBuilder::buffer_transfer_to_host_read());
        self.device.execute_and_wait(cmd)?;

        self.layout = restore;
        staging.read_back()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        let backend = self.device.backend();
        backend.destroy_image_view(self.view);
        backend.destroy_image(self.image);
        if let Some(allocation) = self.allocation.take() {
            self.device.allocator().free(allocation);
        }
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("desc", &self.desc)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;

    #[test]
    fn test_upload_then_read_back() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let mut texture = Texture::new(&device, ImageDesc::texture(4, 2, vk::Format::R8G8B8A8_UNORM), "checker").unwrap();
        assert_eq!(texture.layout(), vk::ImageLayout::UNDEFINED);

        let pixels: Vec<u8> = (0..32).collect();
        texture.upload(&pixels).unwrap();
        assert_eq!(texture.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(backend.image_layout(texture.image()), Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));

        assert_eq!(texture.read_back().unwrap(), pixels);
        assert_eq!(texture.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(backend.stats().validation_errors, 0);
    }

    #[test]
    fn test_upload_requires_exact_size() {
        let (_backend, device) = headless_device(DeviceConfig::default());
        let mut texture = Texture::new(&device, ImageDesc::texture(2, 2, vk::Format::R8G8B8A8_UNORM), "tiny").unwrap();
        let result = texture.upload(&[0u8; 15]);
        assert!(matches!(result, Err(VulkanError::SizeMismatch { requested: 15, capacity: 16 })));
    }

    #[test]
    fn test_drop_releases_image_and_memory() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let texture = Texture::new(&device, ImageDesc::color_target(8, 8, vk::Format::B8G8R8A8_UNORM), "target").unwrap();
        assert_eq!(backend.stats().images, 1);
        drop(texture);
        assert_eq!(backend.stats().images, 0);
        assert_eq!(device.memory_stats().allocations, 0);
    }
}
