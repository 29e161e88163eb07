//! RGBA8 images sampled by renderers

use ash::vk;
use std::sync::Arc;

use crate::render::backend::{ImageDesc, SamplerDesc};
use crate::render::cache::PerDevice;
use crate::render::device::{Device, DeviceId};
use crate::render::resources::{Sampler, Texture};
use crate::render::{VulkanError, VulkanResult};

/// Texture and sampler of an image on one device
#[derive(Debug)]
pub struct GpuImage {
    /// Shader-readable texture
    pub texture: Texture,
    /// Sampler created from the asset's sampler description
    pub sampler: Sampler,
}

/// CPU-side RGBA8 image
pub struct ImageAsset {
    name: String,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    sampler: SamplerDesc,
    gpu: PerDevice<GpuImage>,
}

impl ImageAsset {
    /// Wrap tightly packed RGBA8 pixels
    pub fn new(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> VulkanResult<Arc<Self>> {
        Self::with_sampler(name, width, height, pixels, SamplerDesc::default())
    }

    /// Like [`ImageAsset::new`] with explicit sampling parameters
    pub fn with_sampler(
        name: impl Into<String>,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        sampler: SamplerDesc,
    ) -> VulkanResult<Arc<Self>> {
        let name = name.into();
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 {
            return Err(VulkanError::invalid(format!("image '{name}' is empty")));
        }
        if pixels.len() as u64 != expected {
            return Err(VulkanError::SizeMismatch { requested: pixels.len() as u64, capacity: expected });
        }
        Ok(Arc::new(Self { name, width, height, pixels, sampler, gpu: PerDevice::new() }))
    }

    /// 1x1 image of one colour
    pub fn solid_color(name: impl Into<String>, rgba: [u8; 4]) -> VulkanResult<Arc<Self>> {
        Self::with_sampler(name, 1, 1, rgba.to_vec(), SamplerDesc::nearest_clamped())
    }

    /// Image name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width and height in pixels
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }

    /// Pixel data, row major RGBA8
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Texture and sampler on `device`, uploaded on first request
    pub fn device_image(&self, device: &Arc<Device>) -> VulkanResult<Arc<GpuImage>> {
        self.gpu.get_or_try_init(device.id(), || {
            let desc = ImageDesc::texture(self.width, self.height, vk::Format::R8G8B8A8_UNORM);
            let mut texture = Texture::new(device, desc, &self.name)?;
            texture.upload(&self.pixels)?;
            let sampler = Sampler::new(device, self.sampler, &format!("{} sampler", self.name))?;
            Ok(GpuImage { texture, sampler })
        })
    }

    /// Drop the texture held for a device
    pub fn release_device(&self, device: DeviceId) {
        self.gpu.remove(device);
    }
}

impl std::fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAsset")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::headless_device;

    #[test]
    fn test_pixel_count_must_match_extent() {
        let result = ImageAsset::new("short", 2, 2, vec![0; 12]);
        assert!(matches!(result, Err(VulkanError::SizeMismatch { requested: 12, capacity: 16 })));
    }

    #[test]
    fn test_device_image_holds_uploaded_pixels() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let image = ImageAsset::solid_color("white", [255, 255, 255, 255]).unwrap();
        let gpu = image.device_image(&device).unwrap();
        assert_eq!(gpu.texture.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(backend.stats().images, 1);
        assert!(Arc::ptr_eq(&gpu, &image.device_image(&device).unwrap()));
    }
}
