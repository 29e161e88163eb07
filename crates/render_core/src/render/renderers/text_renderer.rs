//! Screen-space text
//!
//! Text is laid out into one [`GlyphInstance`] per visible character and
//! drawn as instanced quads: six vertices per instance, positions and UVs
//! read from a storage buffer. Each frame slot owns its own glyph buffer,
//! so changing the text rebuilds every slot once as it comes round.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::Renderable;
use crate::render::assets::Font;
use crate::render::backend::{DescriptorBinding, GraphicsPipelineDesc};
use crate::render::cache::{AssetRef, DeviceDataCache};
use crate::render::commands::CommandBuffer;
use crate::render::device::DeviceId;
use crate::render::material::{Material, MaterialDesc};
use crate::render::resources::Buffer;
use crate::render::{VulkanError, VulkanResult};

/// One glyph quad
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GlyphInstance {
    /// x, y, width, height in text space
    pub rect: [f32; 4],
    /// u0, v0, u1, v1 in the font atlas
    pub uv: [f32; 4],
}

/// Placement and colour of a text block
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TextUniform {
    /// Top-left corner in normalised device coordinates, then unused padding
    pub origin: [f32; 4],
    /// Text colour
    pub color: [f32; 4],
}

/// Lay `text` out left to right, one line per `\n`, glyphs `scale` units tall
pub fn layout_glyphs(font: &Font, text: &str, scale: f32) -> Vec<GlyphInstance> {
    let mut glyphs = Vec::with_capacity(text.len());
    let (mut x, mut y) = (0.0f32, 0.0f32);
    for ch in text.chars() {
        if ch == '\n' {
            x = 0.0;
            y += scale;
            continue;
        }
        let metrics = font.glyph(ch);
        let width = metrics.advance * scale;
        if metrics.visible {
            glyphs.push(GlyphInstance {
                rect: [x, y, width, scale],
                uv: [metrics.uv_min[0], metrics.uv_min[1], metrics.uv_max[0], metrics.uv_max[1]],
            });
        }
        x += width;
    }
    glyphs
}

/// Per-slot glyph storage
#[derive(Debug, Default)]
pub struct GlyphSlot {
    buffer: Option<Buffer>,
    count: u32,
}

/// Draws a string with a bitmap font
pub struct TextRenderer {
    name: String,
    font: AssetRef<Font>,
    material: Arc<Material>,
    text: String,
    scale: f32,
    origin: [f32; 2],
    color: [f32; 4],
    cache: DeviceDataCache<GlyphSlot>,
    rebuilds: u64,
}

impl TextRenderer {
    /// White text at the top-left corner
    pub fn new(name: impl Into<String>, font: AssetRef<Font>, material: Arc<Material>) -> Self {
        let name = name.into();
        Self {
            cache: DeviceDataCache::new(name.clone()),
            name,
            font,
            material,
            text: String::new(),
            scale: 0.05,
            origin: [-1.0, -1.0],
            color: [1.0; 4],
            rebuilds: 0,
        }
    }

    /// Material description with the uniform, glyph storage buffer and atlas bindings
    pub fn material_desc(name: &str, vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> MaterialDesc {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        MaterialDesc {
            name: name.to_string(),
            bindings: vec![
                DescriptorBinding { binding: 0, descriptor_type: vk::DescriptorType::UNIFORM_BUFFER, count: 1, stage_flags: stages },
                DescriptorBinding {
                    binding: 1,
                    descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::VERTEX,
                },
                DescriptorBinding {
                    binding: 2,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    count: 1,
                    stage_flags: vk::ShaderStageFlags::FRAGMENT,
                },
            ],
            push_constants: Vec::new(),
            pipeline: GraphicsPipelineDesc::overlay(vertex_spirv, fragment_spirv),
        }
    }

    /// Current text
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the text; every slot rebuilds its glyphs on its next draw
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.cache.mark_dirty();
        }
    }

    /// Glyph height in normalised device units
    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.cache.mark_dirty();
    }

    /// Top-left corner in normalised device coordinates
    pub fn set_origin(&mut self, origin: [f32; 2]) {
        self.origin = origin;
        self.cache.mark_dirty();
    }

    /// Text colour
    pub fn set_color(&mut self, color: [f32; 4]) {
        self.color = color;
        self.cache.mark_dirty();
    }

    /// Replace the font
    pub fn set_font(&mut self, font: AssetRef<Font>) {
        self.font = font;
        self.cache.mark_dirty();
    }

    /// Number of glyph rebuilds so far, one per slot per change
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    /// Per-frame GPU state
    pub fn cache(&self) -> &DeviceDataCache<GlyphSlot> {
        &self.cache
    }
}

impl Renderable for TextRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn draw(&mut self, cmd: &mut CommandBuffer, frame_index: usize) -> VulkanResult<()> {
        let device = cmd.device().clone();
        let font = self
            .font
            .get()
            .ok_or_else(|| VulkanError::invalid(format!("font of '{}' was dropped", self.name)))?;
        let state = self.material.device_state(&device)?;
        let uniform = TextUniform { origin: [self.origin[0], self.origin[1], 0.0, 0.0], color: self.color };

        let slot = self.cache.prepare(&device, frame_index, |device, slot| {
            let glyphs = layout_glyphs(&font, &self.text, self.scale);
            self.rebuilds += 1;
            slot.aux.count = glyphs.len() as u32;
            if glyphs.is_empty() {
                return Ok(());
            }

            let atlas = font.atlas().device_image(device)?;
            let glyph_bytes: &[u8] = bytemuck::cast_slice(&glyphs);
            let glyph_buffer = match slot.aux.buffer.as_mut() {
                Some(buffer) => buffer,
                None => slot.aux.buffer.insert(Buffer::new(
                    device,
                    glyph_bytes.len() as u64,
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                    &format!("{} glyphs", self.name),
                )?),
            };
            glyph_buffer.upload_growing(glyph_bytes)?;

            {
                let (uniform_buffer, _) = slot.ensure_resources(device, std::mem::size_of::<TextUniform>() as u64, state.set_layout(), &self.name)?;
                uniform_buffer.upload_pod(&uniform)?;
            }
            if let (Some(set), Some(uniform_buffer), Some(glyph_buffer)) =
                (slot.descriptor_set.as_ref(), slot.uniform_buffer.as_ref(), slot.aux.buffer.as_ref())
            {
                set.write_uniform_buffer(0, uniform_buffer);
                set.write_storage_buffer(1, glyph_buffer);
                set.write_sampled_texture(2, &atlas.texture, Some(&atlas.sampler));
            }
            log::trace!("[DEVICE_DATA] '{}' laid out {} glyphs for slot {}", self.name, glyphs.len(), frame_index);
            Ok(())
        })?;

        if slot.aux.count == 0 {
            return Ok(());
        }
        let set = slot
            .descriptor_set
            .as_ref()
            .ok_or_else(|| VulkanError::invalid(format!("'{}' slot {frame_index} has no descriptor set", self.name)))?;
        let layout = cmd.bind_material(&self.material)?;
        cmd.bind_descriptor_set(layout, 0, set);
        cmd.draw(6, slot.aux.count)
    }

    fn release_device(&mut self, device: DeviceId) {
        if let Some(data) = self.cache.device_data(device) {
            log::debug!("[DEVICE_DATA] '{}' dropping glyphs on '{}'", self.name, data.device().name());
        }
        self.cache.release_device(device);
    }
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer")
            .field("name", &self.name)
            .field("text", &self.text)
            .field("rebuilds", &self.rebuilds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DeviceConfig;
    use crate::render::backend::DescriptorWrite;
    use crate::render::testing::{color_target, headless_device, FAKE_SPIRV};
    use approx::assert_relative_eq;

    fn renderer() -> TextRenderer {
        let font = Arc::new(Font::builtin("mono").unwrap());
        let material = Material::new(TextRenderer::material_desc("text", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
        TextRenderer::new("label", AssetRef::shared(font), material)
    }

    #[test]
    fn test_layout_skips_spaces_and_wraps_lines() {
        let font = Font::builtin("mono").unwrap();
        let glyphs = layout_glyphs(&font, "a b\ncd", 2.0);
        assert_eq!(glyphs.len(), 4);
        assert_relative_eq!(glyphs[1].rect[0], 4.0);
        assert_relative_eq!(glyphs[2].rect[0], 0.0);
        assert_relative_eq!(glyphs[2].rect[1], 2.0);
        assert_relative_eq!(glyphs[3].rect[0], 2.0);
    }

    #[test]
    fn test_set_text_only_dirties_on_change() {
        let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
        let target = color_target(&device);
        let mut text = renderer();
        text.set_text("hi");

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        text.draw(&mut cmd, 0).unwrap();
        text.draw(&mut cmd, 1).unwrap();
        text.set_text("hi");
        assert!(!text.cache().is_dirty(device.id(), 0));
        text.set_text("bye");
        assert!(text.cache().is_dirty(device.id(), 0));
        assert!(text.cache().is_dirty(device.id(), 1));
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();
    }

    #[test]
    fn test_draw_binds_uniforms_glyphs_and_atlas() {
        let (backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(1));
        let target = color_target(&device);
        let mut text = renderer();
        text.set_text("ok");

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        text.draw(&mut cmd, 0).unwrap();
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();

        let slot = text.cache().slot(device.id(), 0).unwrap();
        let set = slot.descriptor_set.as_ref().unwrap().handle();
        let glyphs = slot.aux.buffer.as_ref().unwrap().handle();
        assert!(matches!(
            backend.descriptor_write(set, 0),
            Some(DescriptorWrite::UniformBuffer { .. })
        ));
        assert!(matches!(
            backend.descriptor_write(set, 1),
            Some(DescriptorWrite::StorageBuffer { buffer, .. }) if buffer == glyphs
        ));
        assert!(matches!(
            backend.descriptor_write(set, 2),
            Some(DescriptorWrite::CombinedImageSampler { .. })
        ));
        assert_eq!(backend.stats().validation_errors, 0);
    }

    #[test]
    fn test_empty_text_draws_nothing() {
        let (backend, device) = headless_device(DeviceConfig::default());
        let target = color_target(&device);
        let mut text = renderer();

        let mut cmd = device.get_command_buffer("frame").unwrap();
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
        text.draw(&mut cmd, 0).unwrap();
        assert!(cmd.current_material().is_none());
        cmd.end_render_pass().unwrap();
        device.execute_and_wait(cmd).unwrap();

        assert_eq!(backend.stats().draws, 0);
        assert_eq!(backend.stats().buffers, 0);
        assert!(!text.cache().is_dirty(device.id(), 0));
    }

    #[test]
    fn test_longer_text_grows_glyph_buffer() {
        let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(1));
        let target = color_target(&device);
        let mut text = renderer();
        text.set_text("ab");

        let glyph_buffer_size = |text: &mut TextRenderer| {
            let mut cmd = device.get_command_buffer("frame").unwrap();
            cmd.begin_render_pass(&target.pass, &target.framebuffer, &[]).unwrap();
            text.draw(&mut cmd, 0).unwrap();
            cmd.end_render_pass().unwrap();
            device.execute_and_wait(cmd).unwrap();
            text.cache().slot(device.id(), 0).and_then(|slot| slot.aux.buffer.as_ref()).map(Buffer::size)
        };

        let small = glyph_buffer_size(&mut text);
        text.set_text("abcdef");
        let large = glyph_buffer_size(&mut text);

        let glyph = std::mem::size_of::<GlyphInstance>() as u64;
        assert_eq!(small, Some(2 * glyph));
        assert_eq!(large, Some(6 * glyph));
    }
}
