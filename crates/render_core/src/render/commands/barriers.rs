//! Pre-configured barriers for common synchronization patterns
//!
//! ```rust,ignore
//! // CPU filled a staging buffer, the GPU copies from it next
//! cmd.memory_barrier(MemoryBarrierBuilder::buffer_host_write_to_transfer_read());
//!
//! // Texture upload: make the image a copy destination, then sampleable
//! cmd.transition_image(MemoryBarrierBuilder::image_undefined_to_transfer_dst(image, aspect));
//! cmd.transition_image(MemoryBarrierBuilder::image_transfer_dst_to_shader_read(image, aspect));
//! ```

use ash::vk;

use crate::render::backend::{ImageTransition, MemoryDependency};

/// Memory barrier builder for common synchronization patterns
pub struct MemoryBarrierBuilder;

impl MemoryBarrierBuilder {
    /// Host write → transfer read (staging buffer before a copy)
    pub fn buffer_host_write_to_transfer_read() -> MemoryDependency {
        MemoryDependency {
            src_stage: vk::PipelineStageFlags::HOST,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::HOST_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        }
    }

    /// Host write → shader read (uniform buffer updates)
    pub fn buffer_host_write_to_shader_read() -> MemoryDependency {
        MemoryDependency {
            src_stage: vk::PipelineStageFlags::HOST,
            dst_stage: vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::HOST_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ | vk::AccessFlags::UNIFORM_READ,
        }
    }

    /// Transfer write → vertex/index read (mesh uploads)
    pub fn buffer_transfer_to_vertex_read() -> MemoryDependency {
        MemoryDependency {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::VERTEX_INPUT,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::INDEX_READ,
        }
    }

    /// Transfer write → host read (readbacks)
    pub fn buffer_transfer_to_host_read() -> MemoryDependency {
        MemoryDependency {
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::HOST,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::HOST_READ,
        }
    }

    /// Any layout → transfer destination, discarding contents
    pub fn image_undefined_to_transfer_dst(image: vk::Image, aspect: vk::ImageAspectFlags) -> ImageTransition {
        Self::image_to_transfer_dst(image, aspect, vk::ImageLayout::UNDEFINED)
    }

    /// `old_layout` → transfer destination
    pub fn image_to_transfer_dst(image: vk::Image, aspect: vk::ImageAspectFlags, old_layout: vk::ImageLayout) -> ImageTransition {
        ImageTransition {
            image,
            aspect,
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        }
    }

    /// Transfer destination → shader read
    pub fn image_transfer_dst_to_shader_read(image: vk::Image, aspect: vk::ImageAspectFlags) -> ImageTransition {
        ImageTransition {
            image,
            aspect,
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
        }
    }

    /// `old_layout` → transfer source, for readbacks
    pub fn image_to_transfer_src(image: vk::Image, aspect: vk::ImageAspectFlags, old_layout: vk::ImageLayout) -> ImageTransition {
        ImageTransition {
            image,
            aspect,
            old_layout,
            new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access: vk::AccessFlags::MEMORY_WRITE,
            dst_access: vk::AccessFlags::TRANSFER_READ,
        }
    }

    /// Transfer source → `new_layout`, after a readback
    pub fn image_transfer_src_to(image: vk::Image, aspect: vk::ImageAspectFlags, new_layout: vk::ImageLayout) -> ImageTransition {
        ImageTransition {
            image,
            aspect,
            old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_layout,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            src_access: vk::AccessFlags::TRANSFER_READ,
            dst_access: vk::AccessFlags::MEMORY_READ,
        }
    }
}
