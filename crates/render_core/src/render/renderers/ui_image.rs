//! Tinted screen-space image quads

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::Renderable;
use crate::render::assets::ImageAsset;
use crate::render::backend::{DescriptorBinding, GraphicsPipelineDesc};
use crate::render::cache::{AssetRef, DeviceDataCache};
use crate::render::commands::CommandBuffer;
use crate::render::device::DeviceId;
use crate::render::material::{Material, MaterialDesc};
use crate::render::{VulkanError, VulkanResult};

/// Rectangle and tint of a UI image
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UiImageUniform {
    /// x, y, width, height in normalised device coordinates
    pub rect: [f32; 4],
    /// Colour multiplied with the image
    pub tint: [f32; 4],
}

/// An image drawn as one quad
pub struct UiImage {
    name: String,
    image: AssetRef<ImageAsset>,
    material: Arc<Material>,
    uniform: UiImageUniform,
    cache: DeviceDataCache<()>,
}

impl UiImage {
    /// Untinted image covering `rect`
    pub fn new(name: impl Into<String>, image: AssetRef<ImageAsset>, material: Arc<Material>, rect: [f32; 4]) -> Self {
        let name = name.into();
        Self {
            cache: DeviceDataCache::new(name.clone()),
            name,
            image,
            material,
            uniform: UiImageUniform { rect, tint: [1.0; 4] },
        }
    }

    /// Material description with the uniform and image bindings
    pub fn material_desc(name: &str, vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> MaterialDesc {
        MaterialDesc {
            name: name.to_string(),
            bindings: vec![
                DescriptorBinding {
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                },
                DescriptorBinding {
                    binding: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::FRAGMENT,
                },
            ],
            push_constants: Vec::new(),
            pipeline: GraphicsPipelineDesc::overlay(vertex_spirv, fragment_spirv),
        }
    }

    /// Current rectangle and tint
    pub fn uniform(&self) -> &UiImageUniform {
        &self.uniform
    }

    /// Move or resize the quad
    pub fn set_rect(&mut self, rect: [f32; 4]) {
        self.uniform.rect = rect;
        self.cache.mark_dirty();
    }

    /// Change the tint
    pub fn set_tint(&mut self, tint: [f32; 4]) {
        self.uniform.tint = tint;
        self.cache.mark_dirty();
    }

    /// Show a different image
    pub fn set_image(&mut self, image: AssetRef<ImageAsset>) {
        self.image = image;
        self.cache.mark_dirty();
    }

    /// Per-frame GPU state
    pub fn cache(&self) -> &DeviceDataCache<()> {
        &self.cache
    }
}

impl Renderable for UiImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame_index: usize) -> VulkanResult<()> {
        let device = cmd.device().clone();
        let image = self
            .image
            .get()
            .ok_or_else(|| VulkanError::invalid(format!("image of '{}' was dropped", self.name)))?;
        let state = self.material.device_state(&device)?;
        let uniform = self.uniform;

        let slot = self.cache.prepare(&device, frame_index, |device, slot| {
            let gpu = image.device_image(device)?;
            let (buffer, set) = slot.ensure_resources(device, std::mem::size_of::<UiImageUniform>() as u64, state.set_layout(), &self.name)?;
            buffer.upload_pod(&uniform)?;
            set.write_uniform_buffer(0, buffer);
            set.write_sampled_texture(1, &gpu.texture, Some(&gpu.sampler));
            Ok(())
        })?;
        let set = slot
            .descriptor_set
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("'{}' slot {frame_index} has no descriptor set", self.name)))?;

        let layout = cmd.bind_material(&self.material)?;
        cmd.bind_descriptor_set(layout, 0, set);
        cmd.draw(6, 1)
    }

    fn release_device(&mut self, device: DeviceId) {
        self.cache.release_device(device);
    }
}

impl std::fmt::Debug for UiImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiImage")
            .field("name", &self.name)
            .field("uniform", &self.uniform)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::testing::{color_target, headless_device, FAKE_SPIRV};

    #[test]
    fn test_draw_binds_image_and_uniform() {
        let (backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(1));
        let target = color_target(&device);
        let image = ImageAsset::solid_color("red", [255, 0, 0, 255]).unwrap();
        let material = Material::new(UiImage::material_desc("ui", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        let mut panel = UiImage::new("panel", AssetRef::external(&image), material, [-1.0, -1.0, 0.5, 0.5]);
        panel.set_tint([0.5, 0.5, 0.5, 1.0]);

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        panel.draw(&mut cmd, 0).unwrap();
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();

        let slot = panel.cache().slot(device.id(), 0).unwrap();
        let set = slot.descriptor_set.as_ref().unwrap().handle();
        assert!(backend.descriptor_write(set, 0).is_some());
        assert!(backend.descriptor_write(set, 1).is_some());

        let bytes = slot.uniform_buffer.as_ref().unwrap().read_back().unwrap();
        let stored: UiImageUniform = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(stored.tint, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(backend.stats().draws, 1);
    }

    #[test]
    fn test_release_device_frees_slots() {
        let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
        let target = color_target(&device);
        let image = ImageAsset::solid_color("white", [255; 4]).unwrap();
        let material = Material::new(UiImage::material_desc("ui", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        let mut panel = UiImage::new("panel", AssetRef::shared(image), material, [0.0, 0.0, 1.0, 1.0]);

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        panel.draw(&mut cmd, 0).unwrap();
        panel.draw(&mut cmd, 1).unwrap();
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();
        assert_eq!(device.descriptor_pool_usage().0, 2);

        panel.release_device(device.id());
        assert_eq!(device.descriptor_pool_usage().0, 0);
        assert_eq!(panel.cache().device_count(), 0);
    }
}
