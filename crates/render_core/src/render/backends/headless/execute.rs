//! Replay of recorded commands against host memory

use ash::vk::{self, Handle};

use super::objects::{HeadlessState, Submission};
use crate::render::backend::GpuCommand;

/// True when `command` reads or writes the object `handle`
pub(super) fn references(command: &GpuCommand, handle: u64) -> bool {
    match command {
        GpuCommand::CopyBuffer { src, dst, .. } => src.as_raw() == handle || dst.as_raw() == handle,
        GpuCommand::CopyBufferToImage { src, dst, .. } => src.as_raw() == handle || dst.as_raw() == handle,
        GpuCommand::CopyImageToBuffer { src, dst, .. } => src.as_raw() == handle || dst.as_raw() == handle,
        GpuCommand::ImageBarrier(transition) => transition.image.as_raw() == handle,
        GpuCommand::BindPipeline(pipeline) => pipeline.as_raw() == handle,
        GpuCommand::BindDescriptorSets { sets, .. } => sets.iter().any(|set| set.as_raw() == handle),
        GpuCommand::BindVertexBuffers { buffers, .. } => buffers.iter().any(|(buffer, _)| buffer.as_raw() == handle),
        GpuCommand::BindIndexBuffer { buffer, .. } => buffer.as_raw() == handle,
        GpuCommand::BeginRenderPass { render_pass, framebuffer, .. } => {
            render_pass.as_raw() == handle || framebuffer.as_raw() == handle
        }
        _ => false,
    }
}

/// Run every command of a submission, then signal its fence
pub(super) fn execute_submission(state: &mut HeadlessState, submission: &Submission) {
    let commands = match state.command_buffers.get(&submission.command_buffer) {
        Some(cb) => cb.commands.clone(),
        None => {
            state.validation_error("submitted command buffer was freed before completion");
            Vec::new()
        }
    };

    for command in &commands {
        execute_command(state, command);
    }

    if let Some(cb) = state.command_buffers.get_mut(&submission.command_buffer) {
        cb.state = super::objects::CommandBufferState::Executable;
    }
    match state.fences.get_mut(&submission.fence) {
        Some(signaled) => *signaled = true,
        None => state.validation_error("submission fence destroyed while pending"),
    }
    state.counters.completed += 1;
}

fn execute_command(state: &mut HeadlessState, command: &GpuCommand) {
    match command {
        GpuCommand::CopyBuffer { src, dst, regions } => {
            state.counters.copies += 1;
            for region in regions {
                let src_ptr = buffer_range(state, *src, region.src_offset, region.size);
                let dst_ptr = buffer_range(state, *dst, region.dst_offset, region.size);
                match (src_ptr, dst_ptr) {
                    // SAFETY: both ranges were bounds checked against their buffers and memory blocks
                    (Some(s), Some(d)) => unsafe { std::ptr::copy(s, d, region.size as usize) },
                    _ => state.validation_error("buffer copy out of bounds or on unbound buffer"),
                }
            }
        }
        GpuCommand::CopyBufferToImage { src, dst, regions } => {
            state.counters.copies += 1;
            check_layout(state, *dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            for region in regions {
                copy_rows(state, *src, *dst, region, true);
            }
        }
        GpuCommand::CopyImageToBuffer { src, dst, regions } => {
            state.counters.copies += 1;
            check_layout(state, *src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
            for region in regions {
                copy_rows(state, *dst, *src, region, false);
            }
        }
        GpuCommand::ImageBarrier(transition) => {
            let current = state.images.get(&transition.image.as_raw()).map(|image| image.layout);
            match current {
                Some(layout) => {
                    if transition.old_layout != vk::ImageLayout::UNDEFINED && transition.old_layout != layout {
                        state.validation_error(&format!(
                            "image transition expects {:?} but image is in {:?}",
                            transition.old_layout, layout
                        ));
                    }
                    if let Some(image) = state.images.get_mut(&transition.image.as_raw()) {
                        image.layout = transition.new_layout;
                    }
                }
                None => state.validation_error("barrier on unknown image"),
            }
        }
        GpuCommand::BeginRenderPass { .. } => state.counters.render_passes += 1,
        GpuCommand::Draw { .. } | GpuCommand::DrawIndexed { .. } => state.counters.draws += 1,
        _ => {}
    }
}

fn check_layout(state: &mut HeadlessState, image: vk::Image, expected: vk::ImageLayout) {
    let layout = state.images.get(&image.as_raw()).map(|image| image.layout);
    if layout != Some(expected) {
        state.validation_error(&format!("image copy expects {expected:?}, image is in {layout:?}"));
    }
}

fn buffer_range(state: &HeadlessState, buffer: vk::Buffer, offset: u64, size: u64) -> Option<*mut u8> {
    let object = state.buffers.get(&buffer.as_raw())?;
    if offset.checked_add(size)? > object.size {
        return None;
    }
    let binding = object.binding?;
    let memory = state.memory.get(&binding.memory)?;
    let start = binding.offset + offset;
    if start + size > memory.block.len() as u64 {
        return None;
    }
    // SAFETY: start + size is within the block
    Some(unsafe { memory.block.ptr().as_ptr().add(start as usize) })
}

/// Copy rows between a tightly packed buffer and an image, in either direction
fn copy_rows(state: &mut HeadlessState, buffer: vk::Buffer, image: vk::Image, region: &vk::BufferImageCopy, to_image: bool) {
    let Some((image_ptr, image_len, width, texel)) = image_memory(state, image) else {
        state.validation_error("image copy on unknown or unbound image");
        return;
    };

    let row_length = if region.buffer_row_length == 0 { region.image_extent.width } else { region.buffer_row_length };
    let row_bytes = u64::from(region.image_extent.width) * texel;
    let x = u64::try_from(region.image_offset.x).unwrap_or(0);
    let y = u64::try_from(region.image_offset.y).unwrap_or(0);

    for row in 0..u64::from(region.image_extent.height) {
        let buffer_offset = region.buffer_offset + row * u64::from(row_length) * texel;
        let image_offset = ((y + row) * u64::from(width) + x) * texel;
        let Some(buffer_ptr) = buffer_range(state, buffer, buffer_offset, row_bytes) else {
            state.validation_error("image copy exceeds buffer");
            return;
        };
        if image_offset + row_bytes > image_len {
            state.validation_error("image copy exceeds image");
            return;
        }
        // SAFETY: both ranges were bounds checked above
        unsafe {
            let image_row = image_ptr.add(image_offset as usize);
            if to_image {
                std::ptr::copy(buffer_ptr, image_row, row_bytes as usize);
            } else {
                std::ptr::copy(image_row, buffer_ptr, row_bytes as usize);
            }
        }
    }
}

fn image_memory(state: &HeadlessState, image: vk::Image) -> Option<(*mut u8, u64, u32, u64)> {
    let object = state.images.get(&image.as_raw())?;
    let binding = object.binding?;
    let memory = state.memory.get(&binding.memory)?;
    let texel = object.desc.texel_size().unwrap_or(4);
    let len = object.desc.byte_size().unwrap_or(0);
    if binding.offset + len > memory.block.len() as u64 {
        return None;
    }
    // SAFETY: offset + len is within the block
    let ptr = unsafe { memory.block.ptr().as_ptr().add(binding.offset as usize) };
    Some((ptr, len, object.desc.extent.width, texel))
}
