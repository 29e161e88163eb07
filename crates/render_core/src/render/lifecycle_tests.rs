//! End-to-end lifecycle tests across resources, commands, caches and renderers

use ash::vk;
use std::sync::{Arc, Barrier};
use std::thread;

use crate::core::config::DeviceConfig;
use crate::render::assets::{Font, ImageAsset, Mesh};
use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};
use crate::render::cache::AssetRef;
use crate::render::device::{Device, DeviceRegistry};
use crate::render::frame::FrameScheduler;
use crate::render::material::Material;
use crate::render::renderers::{MeshRenderer, Renderable, TextRenderer, UiImage};
use crate::render::resources::{Buffer, DescriptorSetLayoutBuilder};
use crate::render::testing::{color_target, headless_device, ColorTarget, FAKE_SPIRV};
use crate::render::VulkanError;

fn host_visible() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
}

fn text_renderer(name: &str) -> TextRenderer {
    let font = Arc::new(Font::builtin("mono").unwrap());
    let material = Material::new(TextRenderer::material_desc("text", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
    TextRenderer::new(name, AssetRef::shared(font), material)
}

/// Record one frame drawing `renderables` into `target`
fn draw_frame(scheduler: &mut FrameScheduler, target: &ColorTarget, renderables: &mut [&mut dyn Renderable]) -> usize {
    let mut frame = scheduler.begin_frame().unwrap();
    let mut cmd = frame.command_buffer("scene").unwrap();
    cmd.begin_render_pass(&target.pass, &target.framebuffer, &target.pass.clear_values([0.0, 0.0, 0.0, 1.0])).unwrap();
    for renderable in renderables.iter_mut() {
        renderable.draw(&mut cmd, frame.index()).unwrap();
    }
    cmd.end_render_pass().unwrap();
    frame.submit(cmd);
    let index = frame.index();
    scheduler.end_frame(frame).unwrap();
    index
}

#[test]
fn test_mutation_dirties_every_slot_and_draw_cleans_one() {
    let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(3));
    let target = color_target(&device);
    let mut scheduler = FrameScheduler::new(device.clone());
    let mut text = text_renderer("score");
    text.set_text("0");

    for _ in 0..3 {
        draw_frame(&mut scheduler, &target, &mut [&mut text]);
    }
    assert!((0..3).all(|slot| !text.cache().is_dirty(device.id(), slot)));

    text.set_text("100");
    assert!((0..3).all(|slot| text.cache().is_dirty(device.id(), slot)));

    let drawn = draw_frame(&mut scheduler, &target, &mut [&mut text]);
    assert_eq!(drawn, 0);
    assert!(!text.cache().is_dirty(device.id(), 0));
    assert!(text.cache().is_dirty(device.id(), 1));
    assert!(text.cache().is_dirty(device.id(), 2));
}

#[test]
fn test_upload_reallocates_only_when_payload_exceeds_capacity() {
    let (backend, device) = headless_device(DeviceConfig::default());
    let mut buffer = Buffer::new(&device, 128, vk::BufferUsageFlags::STORAGE_BUFFER, host_visible(), "instances").unwrap();

    for len in [1usize, 64, 128] {
        buffer.upload_growing(&vec![3u8; len]).unwrap();
    }
    assert_eq!(buffer.generation(), 0);
    assert_eq!(buffer.size(), 128);

    buffer.upload_growing(&[4u8; 300]).unwrap();
    assert_eq!(buffer.generation(), 1);
    assert_eq!(buffer.size(), 300);
    assert_eq!(backend.stats().buffers, 1);
}

#[test]
fn test_fence_follows_submission_lifecycle() {
    let (backend, device) = headless_device(DeviceConfig::default());
    let cmd = device.get_command_buffer("probe").unwrap();
    let fence = cmd.fence().clone();
    assert!(!fence.is_signaled().unwrap());

    let returned = device.execute(cmd).unwrap();
    assert!(Arc::ptr_eq(&fence, &returned));
    assert!(!fence.is_signaled().unwrap());

    backend.complete_all();
    assert!(fence.is_signaled().unwrap());
    fence.wait().unwrap();

    // Once the pool is the only holder, reuse resets the same fence
    let handle = fence.handle();
    drop((fence, returned));
    let cmd = device.get_command_buffer("reused").unwrap();
    assert_eq!(cmd.fence().handle(), handle);
    assert!(!cmd.fence().is_signaled().unwrap());
}

#[test]
fn test_descriptor_pool_cap_and_release() {
    let (_backend, device) = headless_device(DeviceConfig::default().with_max_descriptor_sets(2));
    let layout = DescriptorSetLayoutBuilder::new()
        .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
        .build(&device)
        .unwrap();

    let first = device.allocate_descriptor_set(&layout, "first").unwrap();
    let _second = device.allocate_descriptor_set(&layout, "second").unwrap();
    let third = device.allocate_descriptor_set(&layout, "third");
    assert!(matches!(third, Err(VulkanError::DescriptorPoolExhausted { allocated: 2, max_sets: 2 })));

    drop(first);
    assert!(device.allocate_descriptor_set(&layout, "replacement").is_ok());
}

#[test]
fn test_command_buffers_reused_only_after_completion() {
    let (backend, device) = headless_device(DeviceConfig::default());

    let cmd = device.get_command_buffer("first").unwrap();
    let first_handle = cmd.handle();
    device.execute_and_wait(cmd).unwrap();

    let cmd = device.get_command_buffer("second").unwrap();
    assert_eq!(cmd.handle(), first_handle);
    assert!(!cmd.fence().is_signaled().unwrap());
    device.execute(cmd).unwrap();
    assert_eq!(device.command_pool_stats().allocated, 1);

    let cmd = device.get_command_buffer("third").unwrap();
    assert_ne!(cmd.handle(), first_handle);
    assert_eq!(device.command_pool_stats().allocated, 2);
    drop(cmd);

    backend.complete_all();
    assert_eq!(device.command_pool_stats().in_flight, 0);
}

#[test]
fn test_host_visible_upload_lands_in_mapping() {
    let (backend, device) = headless_device(DeviceConfig::default());
    let mut buffer = Buffer::new(&device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER, host_visible(), "constants").unwrap();
    buffer.upload(&[0xAB; 64]).unwrap();

    let bytes = buffer.read_back().unwrap();
    assert_eq!(bytes.len(), 256);
    assert!(bytes[..64].iter().all(|&b| b == 0xAB));
    assert_eq!(backend.stats().submissions, 0);
}

#[test]
fn test_device_local_upload_blocks_until_copied() {
    let (backend, device) = headless_device(DeviceConfig::default());
    let mut buffer = Buffer::new(
        &device,
        1024,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        "particles",
    )
    .unwrap();
    let data: Vec<u8> = (0..512u32).map(|i| (i % 251) as u8).collect();

    buffer.upload(&data).unwrap();
    assert_eq!(backend.stats().submissions, 1);
    assert_eq!(backend.pending_submissions(), 0);
    assert_eq!(backend.stats().buffers, 1);
    assert_eq!(buffer.generation(), 0);

    let contents = buffer.read_back().unwrap();
    assert_eq!(&contents[..512], data.as_slice());
    assert_eq!(backend.stats().validation_errors, 0);
}

#[test]
fn test_text_change_rebuilds_each_slot_once() {
    let (_backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(3));
    let target = color_target(&device);
    let mut scheduler = FrameScheduler::new(device.clone());
    let mut text = text_renderer("status");
    text.set_text("ready");

    for _ in 0..3 {
        draw_frame(&mut scheduler, &target, &mut [&mut text]);
    }
    let before = text.rebuild_count();

    text.set_text("running");
    let slots: Vec<usize> = (0..3).map(|_| draw_frame(&mut scheduler, &target, &mut [&mut text])).collect();
    assert_eq!(slots, vec![0, 1, 2]);
    assert_eq!(text.rebuild_count() - before, 3);

    draw_frame(&mut scheduler, &target, &mut [&mut text]);
    assert_eq!(text.rebuild_count() - before, 3);
}

#[test]
fn test_scene_frames_reuse_slot_resources() {
    let (backend, device) = headless_device(DeviceConfig::default().with_frames_in_flight(2));
    let target = color_target(&device);
    let mut scheduler = FrameScheduler::new(device.clone());

    let mesh_material = Material::new(MeshRenderer::material_desc("lit", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
    let ui_material = Material::new(UiImage::material_desc("ui", FAKE_SPIRV.to_vec(), FAKE_SPIRV.to_vec()));
    let quad = Mesh::quad("quad").unwrap();
    let image = ImageAsset::solid_color("white", [255; 4]).unwrap();

    let mut left = MeshRenderer::new("left", AssetRef::external(&quad), mesh_material.clone());
    let mut right = MeshRenderer::new("right", AssetRef::shared(quad.clone()), mesh_material.clone());
    let mut panel = UiImage::new("panel", AssetRef::external(&image), ui_material, [0.0, 0.0, 0.5, 0.5]);
    let mut label = text_renderer("label");
    label.set_text("fps 60");

    for _ in 0..6 {
        draw_frame(&mut scheduler, &target, &mut [&mut left, &mut right, &mut panel, &mut label]);
    }
    scheduler.flush().unwrap();

    assert_eq!(backend.stats().draws, 24);
    assert_eq!(backend.stats().validation_errors, 0);
    // Four renderables, two slots each
    assert_eq!(device.descriptor_pool_usage().0, 8);
    assert_eq!(mesh_material.device_state(&device).unwrap().variant_count(), 1);
    assert_eq!(mesh_material.bound_count(), 0);
    assert_eq!(left.rebuild_count(), 2);
    assert_eq!(target.color.extent(), target.framebuffer.extent());

    drop((left, right, panel, label));
    assert_eq!(device.descriptor_pool_usage().0, 0);
}

#[test]
fn test_renderable_state_is_kept_per_device() {
    let mut registry = DeviceRegistry::new();
    let config = DeviceConfig::default().with_frames_in_flight(2);
    let devices: Vec<(Arc<HeadlessBackend>, Arc<Device>)> = ["gpu0", "gpu1"]
        .iter()
        .map(|name| {
            let backend = Arc::new(HeadlessBackend::new(HeadlessConfig::default().named(*name)));
            let device = registry.create_device(backend.clone(), config.clone().with_name(*name)).unwrap();
            (backend, device)
        })
        .collect();

    let mut text = text_renderer("shared label");
    text.set_text("hello");
    for (_, device) in &devices {
        let target = color_target(device);
        let mut scheduler = FrameScheduler::new(device.clone());
        draw_frame(&mut scheduler, &target, &mut [&mut text]);
    }
    assert_eq!(text.cache().device_count(), 2);
    assert_eq!(text.rebuild_count(), 2);

    let (first_backend, first_device) = &devices[0];
    text.release_device(first_device.id());
    assert_eq!(text.cache().device_count(), 1);
    assert_eq!(first_device.descriptor_pool_usage().0, 0);
    assert_eq!(devices[1].1.descriptor_pool_usage().0, 1);
    assert_eq!(first_backend.stats().draws, 1);

    drop(text);
    registry.shutdown().unwrap();
}

#[test]
fn test_each_recording_thread_gets_its_own_pool() {
    const THREADS: usize = 4;
    const BUFFERS_PER_THREAD: usize = 3;

    let (backend, device) = headless_device(DeviceConfig::default());
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let device = device.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for n in 0..BUFFERS_PER_THREAD {
                    let cmd = device.get_command_buffer(&format!("worker {worker} #{n}")).unwrap();
                    device.execute(cmd).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = device.command_pool_stats();
    assert_eq!(stats.pools, THREADS);
    assert_eq!(stats.allocated, THREADS * BUFFERS_PER_THREAD);
    assert_eq!(stats.in_flight, THREADS * BUFFERS_PER_THREAD);
    assert_eq!(backend.pending_submissions(), THREADS * BUFFERS_PER_THREAD);

    device.flush_command_buffers().unwrap();
    assert_eq!(device.command_pool_stats().in_flight, 0);
    assert_eq!(backend.pending_submissions(), 0);
    assert_eq!(backend.stats().validation_errors, 0);
}
