//! Helpers shared by unit tests

use ash::vk;
use std::sync::Arc;

use crate::core::config::DeviceConfig;
use crate::render::backend::{DescriptorBinding, GraphicsPipelineDesc, ImageDesc, RenderPassDesc};
use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};
use crate::render::device::{Device, DeviceRegistry};
use crate::render::material::{Material, MaterialDesc};
use crate::render::resources::{Framebuffer, RenderPass, Texture};

/// SPIR-V magic number, enough for the headless backend to accept a module
pub const FAKE_SPIRV: [u32; 1] = [0x0723_0203];

/// A device on a fresh headless backend, plus the backend for inspection
pub fn headless_device(config: DeviceConfig) -> (Arc<HeadlessBackend>, Arc<Device>) {
    let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
    let mut registry = DeviceRegistry::new();
    let device = registry
        .create_device(backend.clone(), config)
        .expect("headless device creation");
    (backend, device)
}

/// Material with one uniform buffer at binding 0
pub fn test_material(name: &str) -> Arc<Material> {
    Material::new(MaterialDesc {
        name: name.to_string(),
        bindings: vec![DescriptorBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        }],
        push_constants: Vec::new(),
        pipeline: GraphicsPipelineDesc::opaque(FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()),
    })
}

/// Colour-only render pass with a 4x4 framebuffer
pub struct ColorTarget {
    pub pass: RenderPass,
    pub framebuffer: Framebuffer,
    pub color: Texture,
}

pub fn color_target(device: &Arc<Device>) -> ColorTarget {
    let mut desc = RenderPassDesc::forward(vk::Format::R8G8B8A8_UNORM);
    desc.depth_format = None;
    let pass = RenderPass::new(device, desc, "test pass").expect("render pass");
    let color = Texture::new(device, ImageDesc::color_target(4, 4, vk::Format::R8G8B8A8_UNORM), "test color").expect("color target");
    let framebuffer = Framebuffer::new(device, &pass, &color, None, "test framebuffer").expect("framebuffer");
    ColorTarget { pass, framebuffer, color }
}
