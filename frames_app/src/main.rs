//! Frames demo application
//!
//! Drives render_core end to end. By default it runs a headless scene of
//! meshes, text and UI images for a number of frames and reports what the
//! device did. With `--vulkan` it instead brings up every suitable Vulkan
//! adapter and round-trips a buffer through device-local memory.
//!
//! Usage: `frames_app [--vulkan] [--frames N] [config.toml|config.ron]`

use ash::vk;
use clap::Parser;
use render_core::config::{Config, ConfigError};
use render_core::core::config::RenderCoreConfig;
use render_core::foundation::math::{Mat4, Vec3, Vec4};
use render_core::render::assets::{Font, ImageAsset, Mesh, Vertex};
use render_core::render::backend::{ImageDesc, RenderPassDesc};
use render_core::render::renderers::{MeshRenderer, Renderable, TextRenderer, UiImage};
use render_core::render::resources::{Framebuffer, RenderPass, Texture};
use render_core::render::{
    AssetRef, Buffer, Device, DeviceRegistry, FrameScheduler, HeadlessBackend, HeadlessConfig, Material,
    VulkanBackend, VulkanContext, VulkanError,
};
use std::path::PathBuf;
use std::sync::Arc;

/// SPIR-V header word; the headless backend only checks the magic number
const PLACEHOLDER_SPIRV: [u32; 1] = [0x0723_0203];

const TARGET_WIDTH: u32 = 320;
const TARGET_HEIGHT: u32 = 180;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("render error: {0}")]
    Render(#[from] VulkanError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("readback mismatch on '{device}' at byte {offset}")]
    Mismatch { device: String, offset: usize },
}

/// Drives render_core through a headless scene or a Vulkan round trip
#[derive(Debug, Parser)]
#[command(name = "frames_app", version)]
struct Options {
    /// Round-trip a buffer on every suitable Vulkan adapter instead of the headless scene
    #[arg(long)]
    vulkan: bool,

    /// Number of headless frames to render
    #[arg(long, value_name = "N", default_value_t = 8)]
    frames: u64,

    /// Configuration file (.toml or .ron)
    #[arg(value_name = "CONFIG")]
    config_path: Option<PathBuf>,
}

/// Offscreen colour target the scene renders into
struct SceneTarget {
    pass: RenderPass,
    framebuffer: Framebuffer,
    _color: Texture,
    _depth: Texture,
}

impl SceneTarget {
    fn new(device: &Arc<Device>) -> Result<Self, VulkanError> {
        let desc = RenderPassDesc::forward(vk::Format::R8G8B8A8_UNORM);
        let pass = RenderPass::new(device, desc, "scene pass")?;
        let color = Texture::new(device, ImageDesc::color_target(TARGET_WIDTH, TARGET_HEIGHT, desc.color_format), "scene color")?;
        let depth = Texture::new(device, ImageDesc::depth_target(TARGET_WIDTH, TARGET_HEIGHT), "scene depth")?;
        let framebuffer = Framebuffer::new(device, &pass, &color, Some(&depth), "scene framebuffer")?;
        Ok(Self { pass, framebuffer, _color: color, _depth: depth })
    }
}

fn cube_mesh() -> Result<Arc<Mesh>, VulkanError> {
    let corners = [
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let vertices = corners
        .iter()
        .map(|&p: &[f32; 3]| {
            let n = Vec3::new(p[0], p[1], p[2]).normalize();
            Vertex::new(p, [n.x, n.y, n.z], [0.0, 0.0])
        })
        .collect();
    let indices = vec![
        0, 2, 1, 0, 3, 2, // back
        4, 5, 6, 4, 6, 7, // front
        0, 1, 5, 0, 5, 4, // bottom
        3, 7, 6, 3, 6, 2, // top
        0, 4, 7, 0, 7, 3, // left
        1, 2, 6, 1, 6, 5, // right
    ];
    Mesh::new("cube", vertices, indices)
}

fn run_headless(config: &RenderCoreConfig, frames: u64) -> Result<(), AppError> {
    let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default()));
    let mut registry = DeviceRegistry::new();
    let device = registry.create_device(backend.clone(), config.device.clone())?;
    let target = SceneTarget::new(&device)?;

    let mesh_material = Material::new(MeshRenderer::material_desc("lit", PLACEHOLDER_SPIRV.to_vec(), PLACEHOLDER_SPIRV.to_vec()));
    let text_material = Material::new(TextRenderer::material_desc("text", PLACEHOLDER_SPIRV.to_vec(), PLACEHOLDER_SPIRV.to_vec()));
    let ui_material = Material::new(UiImage::material_desc("ui", PLACEHOLDER_SPIRV.to_vec(), PLACEHOLDER_SPIRV.to_vec()));

    let cube = cube_mesh()?;
    let mut spinner = MeshRenderer::new("spinner", AssetRef::shared(cube.clone()), mesh_material.clone());
    let mut orbiter = MeshRenderer::new("orbiter", AssetRef::shared(cube), mesh_material);
    orbiter.set_color(Vec4::new(0.2, 0.6, 1.0, 1.0));

    let font = Arc::new(Font::builtin("mono")?);
    let mut counter = TextRenderer::new("frame counter", AssetRef::shared(font), text_material);
    counter.set_origin([-0.95, -0.9]);
    counter.set_scale(0.05);

    let panel_image = ImageAsset::solid_color("panel", [32, 32, 48, 200])?;
    let mut panel = UiImage::new("panel", AssetRef::shared(panel_image), ui_material, [-1.0, -1.0, 0.6, 0.2]);

    let mut scheduler = FrameScheduler::new(device.clone());
    for number in 0..frames {
        let angle = number as f32 * 0.1;
        spinner.set_transform(Mat4::new_rotation(Vec3::new(0.0, angle, 0.0)));
        orbiter.set_transform(Mat4::new_translation(&Vec3::new(angle.cos() * 2.0, 0.0, angle.sin() * 2.0)));
        counter.set_text(format!("frame {number}"));
        if number == frames / 2 {
            panel.set_tint([1.0, 0.5, 0.5, 1.0]);
        }

        let mut frame = scheduler.begin_frame()?;
        let mut cmd = frame.command_buffer("scene")?;
        cmd.begin_render_pass(&target.pass, &target.framebuffer, &target.pass.clear_values([0.05, 0.05, 0.1, 1.0]))?;
        let renderables: [&mut dyn Renderable; 4] = [&mut spinner, &mut orbiter, &mut counter, &mut panel];
        for renderable in renderables {
            renderable.draw(&mut cmd, frame.index())?;
        }
        cmd.end_render_pass()?;
        frame.submit(cmd);
        scheduler.end_frame(frame)?;
    }
    scheduler.flush()?;

    let stats = backend.stats();
    log::info!(
        "[APP] {} frames: {} submissions, {} draws, {} pipelines, {} descriptor sets live",
        frames,
        stats.submissions,
        stats.draws,
        stats.pipelines_created,
        stats.descriptor_sets
    );
    log::info!(
        "[APP] rebuilds: spinner {}, orbiter {}, counter {}",
        spinner.rebuild_count(),
        orbiter.rebuild_count(),
        counter.rebuild_count()
    );
    let memory = device.memory_stats();
    log::info!("[APP] memory: {} allocations, {} of {} bytes in use", memory.allocations, memory.bytes_in_use, memory.bytes_reserved);
    if stats.validation_errors > 0 {
        log::warn!("[APP] headless backend reported {} validation errors", stats.validation_errors);
    }

    let renderables: [&mut dyn Renderable; 4] = [&mut spinner, &mut orbiter, &mut counter, &mut panel];
    for renderable in renderables {
        renderable.release_device(device.id());
    }
    drop((spinner, orbiter, counter, panel));
    drop(scheduler);
    drop(target);
    drop(device);
    registry.shutdown()?;
    Ok(())
}

fn round_trip(device: &Arc<Device>) -> Result<(), AppError> {
    let pattern: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    let size = pattern.len() as vk::DeviceSize;
    let mut gpu = Buffer::new(
        device,
        size,
        vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        "round trip",
    )?;
    gpu.upload(&pattern)?;
    let back = gpu.read_back()?;

    if let Some(offset) = back.iter().zip(&pattern).position(|(a, b)| a != b) {
        return Err(AppError::Mismatch { device: device.name().to_string(), offset });
    }
    log::info!("[APP] '{}': {} bytes round-tripped through device-local memory", device.name(), size);
    Ok(())
}

fn run_vulkan(config: &RenderCoreConfig) -> Result<(), AppError> {
    let context = VulkanContext::new(config)?;
    let backends = match config.physical_device_index {
        Some(index) => {
            let physical = context.select_physical_device(Some(index))?;
            vec![VulkanBackend::new(context.clone(), physical)?]
        }
        None => VulkanBackend::create_all(&context),
    };
    if backends.is_empty() {
        return Err(VulkanError::InitializationFailed("no suitable Vulkan adapter".to_string()).into());
    }

    let mut registry = DeviceRegistry::new();
    for backend in backends {
        let name = backend.physical_device().name.clone();
        registry.create_device(Arc::new(backend), config.device.clone().with_name(name))?;
    }
    let devices: Vec<Arc<Device>> = registry.iter().cloned().collect();
    let result = devices.iter().try_for_each(round_trip);
    drop(devices);
    registry.shutdown()?;
    result
}

fn run(options: &Options) -> Result<(), AppError> {
    let config = match &options.config_path {
        Some(path) => {
            log::info!("[APP] loading configuration from {}", path.display());
            RenderCoreConfig::load_from_file(path)?
        }
        None => RenderCoreConfig::default(),
    };
    config.validate()?;

    if options.vulkan {
        run_vulkan(&config)
    } else {
        run_headless(&config, options.frames)
    }
}

fn main() {
    render_core::foundation::logging::init();
    let options = Options::parse();

    if let Err(err) = run(&options) {
        log::error!("[APP] {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_headless_scene() {
        let options = Options::try_parse_from(["frames_app"]).unwrap();
        assert!(!options.vulkan);
        assert_eq!(options.frames, 8);
        assert!(options.config_path.is_none());
    }

    #[test]
    fn test_parses_flags_and_config_path() {
        let options = Options::try_parse_from(["frames_app", "--vulkan", "--frames", "3", "render.ron"]).unwrap();
        assert!(options.vulkan);
        assert_eq!(options.frames, 3);
        assert_eq!(options.config_path, Some(PathBuf::from("render.ron")));
    }

    #[test]
    fn test_rejects_bad_frame_count_and_unknown_flags() {
        assert!(Options::try_parse_from(["frames_app", "--frames", "many"]).is_err());
        assert!(Options::try_parse_from(["frames_app", "--frames"]).is_err());
        assert!(Options::try_parse_from(["frames_app", "--fast"]).is_err());
    }
}
