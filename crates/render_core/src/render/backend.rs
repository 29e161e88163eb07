//! Device backend abstraction
//!
//! Everything above this module talks to a GPU through [`DeviceBackend`]:
//! memory, resources, descriptors, pipelines, command recording, queue
//! submission and fences. Two implementations ship with the crate:
//!
//! - [`VulkanBackend`](crate::render::backends::vulkan::VulkanBackend):
//!   direct `ash` calls on a real logical device.
//! - [`HeadlessBackend`](crate::render::backends::headless::HeadlessBackend):
//!   a deterministic CPU device where submissions stay pending until a
//!   fence is waited, used for tests and tooling without a GPU.
//!
//! Handles are plain `ash::vk` handles so the higher layers read like
//! ordinary Vulkan code. Recording goes through [`GpuCommand`] values
//! rather than one method per `vkCmd*` entry point.

use ash::vk;
use std::ptr::NonNull;
use std::time::Duration;

use crate::render::VulkanResult;

/// One memory type as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryTypeInfo {
    /// Property flags of the type
    pub property_flags: vk::MemoryPropertyFlags,
    /// Heap the type allocates from
    pub heap_index: u32,
}

/// One memory heap as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHeapInfo {
    /// Total heap size in bytes
    pub size: vk::DeviceSize,
    /// Heap flags
    pub flags: vk::MemoryHeapFlags,
}

/// Memory types and heaps of a device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProperties {
    /// Memory types, indexed by memory type index
    pub types: Vec<MemoryTypeInfo>,
    /// Memory heaps, indexed by heap index
    pub heaps: Vec<MemoryHeapInfo>,
}

impl MemoryProperties {
    /// Indices of the types allowed by `type_bits` that carry all of `required`
    pub fn candidate_types(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Vec<u32> {
        self.types
            .iter()
            .enumerate()
            .filter(|(i, ty)| *i < 32 && type_bits & (1 << i) != 0 && ty.property_flags.contains(required))
            .map(|(i, _)| i as u32)
            .collect()
    }
}

/// Device limits the core depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// `maxDescriptorSetUniformBuffers`
    pub max_descriptor_set_uniform_buffers: u32,
    /// `maxDescriptorSetStorageBuffers`
    pub max_descriptor_set_storage_buffers: u32,
    /// `maxDescriptorSetSampledImages`
    pub max_descriptor_set_sampled_images: u32,
    /// `maxDescriptorSetStorageImages`
    pub max_descriptor_set_storage_images: u32,
    /// `maxDescriptorSetSamplers`
    pub max_descriptor_set_samplers: u32,
    /// `minUniformBufferOffsetAlignment`
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
    /// `nonCoherentAtomSize`
    pub non_coherent_atom_size: vk::DeviceSize,
    /// `bufferImageGranularity`
    pub buffer_image_granularity: vk::DeviceSize,
    /// `maxMemoryAllocationCount`
    pub max_memory_allocation_count: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_descriptor_set_uniform_buffers: 72,
            max_descriptor_set_storage_buffers: 24,
            max_descriptor_set_sampled_images: 96,
            max_descriptor_set_storage_images: 24,
            max_descriptor_set_samplers: 96,
            min_uniform_buffer_offset_alignment: 256,
            non_coherent_atom_size: 64,
            buffer_image_granularity: 1,
            max_memory_allocation_count: 4096,
        }
    }
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding number
    pub binding: u32,
    /// Descriptor kind
    pub descriptor_type: vk::DescriptorType,
    /// Array size
    pub count: u32,
    /// Shader stages reading the binding
    pub stage_flags: vk::ShaderStageFlags,
}

/// A single descriptor write, applied immediately
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform buffer range
    UniformBuffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Storage buffer range
    StorageBuffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Byte range
        range: vk::DeviceSize,
    },
    /// Image view plus sampler
    CombinedImageSampler {
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
    /// Sampled image without sampler
    SampledImage {
        /// Image view
        view: vk::ImageView,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
    /// Storage image, always in `GENERAL` layout
    StorageImage {
        /// Image view
        view: vk::ImageView,
    },
    /// Standalone sampler
    Sampler {
        /// Sampler
        sampler: vk::Sampler,
    },
}

impl DescriptorWrite {
    /// Descriptor type the write targets
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer { .. } => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::SampledImage { .. } => vk::DescriptorType::SAMPLED_IMAGE,
            Self::StorageImage { .. } => vk::DescriptorType::STORAGE_IMAGE,
            Self::Sampler { .. } => vk::DescriptorType::SAMPLER,
        }
    }
}

/// 2D image description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width and height in texels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect the default view covers
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Sampled colour texture that can be uploaded to and read back
    pub fn texture(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Colour render target
    pub fn color_target(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Depth render target
    pub fn depth_target(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format: vk::Format::D32_SFLOAT,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Bytes per texel for the formats the core knows how to stage
    pub fn texel_size(&self) -> Option<u64> {
        texel_size(self.format)
    }

    /// Bytes needed to hold the whole image tightly packed
    pub fn byte_size(&self) -> Option<u64> {
        self.texel_size()
            .map(|texel| u64::from(self.extent.width) * u64::from(self.extent.height) * texel)
    }
}

/// Bytes per texel of common uncompressed formats
pub fn texel_size(format: vk::Format) -> Option<u64> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::D32_SFLOAT => Some(4),
        vk::Format::R16G16B16A16_SFLOAT => Some(8),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

/// Sampler description
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    /// Magnification filter
    pub mag_filter: vk::Filter,
    /// Minification filter
    pub min_filter: vk::Filter,
    /// Addressing mode on all axes
    pub address_mode: vk::SamplerAddressMode,
    /// Anisotropy, when enabled
    pub max_anisotropy: Option<f32>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
        }
    }
}

impl SamplerDesc {
    /// Nearest filtering with edge clamping, used for glyph atlases and UI
    pub fn nearest_clamped() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_anisotropy: None,
        }
    }
}

/// Single-subpass render pass description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Colour attachment format
    pub color_format: vk::Format,
    /// Depth attachment format, if any
    pub depth_format: Option<vk::Format>,
    /// Layout the colour attachment ends in
    pub color_final_layout: vk::ImageLayout,
}

impl RenderPassDesc {
    /// Forward pass with colour and D32 depth, colour kept readable for copies
    pub fn forward(color_format: vk::Format) -> Self {
        Self {
            color_format,
            depth_format: Some(vk::Format::D32_SFLOAT),
            color_final_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        }
    }
}

/// Fixed-function and shader state of a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    /// Vertex shader SPIR-V words
    pub vertex_spirv: Vec<u32>,
    /// Fragment shader SPIR-V words
    pub fragment_spirv: Vec<u32>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Face culling
    pub cull_mode: vk::CullModeFlags,
    /// Depth test and write
    pub depth_test: bool,
    /// Standard alpha blending on the colour attachment
    pub alpha_blend: bool,
}

impl GraphicsPipelineDesc {
    /// Opaque triangle-list pipeline with back-face culling and depth test
    pub fn opaque(vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> Self {
        Self {
            vertex_spirv,
            fragment_spirv,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            depth_test: true,
            alpha_blend: false,
        }
    }

    /// Blended overlay pipeline without culling or depth, for text and UI
    pub fn overlay(vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> Self {
        Self {
            cull_mode: vk::CullModeFlags::NONE,
            depth_test: false,
            alpha_blend: true,
            ..Self::opaque(vertex_spirv, fragment_spirv)
        }
    }
}

/// Clear value for one attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// Float colour
    Color([f32; 4]),
    /// Depth and stencil
    DepthStencil {
        /// Depth value
        depth: f32,
        /// Stencil value
        stencil: u32,
    },
}

impl ClearValue {
    /// Convert to the raw Vulkan union
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            Self::Color(float32) => vk::ClearValue { color: vk::ClearColorValue { float32 } },
            Self::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// Global memory dependency between two pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDependency {
    /// Stages that must finish
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that wait
    pub dst_stage: vk::PipelineStageFlags,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
}

/// Layout transition of every mip/layer of one image aspect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image handle
    pub image: vk::Image,
    /// Aspect transitioned
    pub aspect: vk::ImageAspectFlags,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// Target layout
    pub new_layout: vk::ImageLayout,
    /// Stages that must finish
    pub src_stage: vk::PipelineStageFlags,
    /// Stages that wait
    pub dst_stage: vk::PipelineStageFlags,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
}

/// A command recorded into a command buffer
#[derive(Debug, Clone)]
pub enum GpuCommand {
    /// `vkCmdCopyBuffer`
    CopyBuffer {
        /// Source buffer
        src: vk::Buffer,
        /// Destination buffer
        dst: vk::Buffer,
        /// Regions copied
        regions: Vec<vk::BufferCopy>,
    },
    /// `vkCmdCopyBufferToImage`, destination in `TRANSFER_DST_OPTIMAL`
    CopyBufferToImage {
        /// Source buffer
        src: vk::Buffer,
        /// Destination image
        dst: vk::Image,
        /// Regions copied
        regions: Vec<vk::BufferImageCopy>,
    },
    /// `vkCmdCopyImageToBuffer`, source in `TRANSFER_SRC_OPTIMAL`
    CopyImageToBuffer {
        /// Source image
        src: vk::Image,
        /// Destination buffer
        dst: vk::Buffer,
        /// Regions copied
        regions: Vec<vk::BufferImageCopy>,
    },
    /// `vkCmdPipelineBarrier` with one global memory barrier
    MemoryBarrier(MemoryDependency),
    /// `vkCmdPipelineBarrier` with one image memory barrier
    ImageBarrier(ImageTransition),
    /// `vkCmdBeginRenderPass` with inline contents
    BeginRenderPass {
        /// Render pass
        render_pass: vk::RenderPass,
        /// Framebuffer
        framebuffer: vk::Framebuffer,
        /// Render area
        render_area: vk::Rect2D,
        /// Clear values per attachment
        clear_values: Vec<ClearValue>,
    },
    /// `vkCmdEndRenderPass`
    EndRenderPass,
    /// `vkCmdBindPipeline` at the graphics bind point
    BindPipeline(vk::Pipeline),
    /// `vkCmdBindDescriptorSets` at the graphics bind point
    BindDescriptorSets {
        /// Pipeline layout
        layout: vk::PipelineLayout,
        /// First set number
        first_set: u32,
        /// Sets bound
        sets: Vec<vk::DescriptorSet>,
    },
    /// `vkCmdPushConstants`
    PushConstants {
        /// Pipeline layout
        layout: vk::PipelineLayout,
        /// Stages receiving the data
        stages: vk::ShaderStageFlags,
        /// Byte offset
        offset: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// `vkCmdBindVertexBuffers`
    BindVertexBuffers {
        /// First binding
        first_binding: u32,
        /// Buffers and their offsets
        buffers: Vec<(vk::Buffer, vk::DeviceSize)>,
    },
    /// `vkCmdBindIndexBuffer`
    BindIndexBuffer {
        /// Buffer
        buffer: vk::Buffer,
        /// Byte offset
        offset: vk::DeviceSize,
        /// Index width
        index_type: vk::IndexType,
    },
    /// `vkCmdSetViewport` for viewport 0
    SetViewport(vk::Viewport),
    /// `vkCmdSetScissor` for scissor 0
    SetScissor(vk::Rect2D),
    /// `vkCmdDraw`
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
        /// First vertex
        first_vertex: u32,
        /// First instance
        first_instance: u32,
    },
    /// `vkCmdDrawIndexed`
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
        /// First index
        first_index: u32,
        /// Added to each index
        vertex_offset: i32,
        /// First instance
        first_instance: u32,
    },
}

/// GPU entry points used by the render core.
///
/// Implementations must be usable from several threads at once. Queue
/// submission is internally serialised by the backend; everything else
/// follows the Vulkan external-synchronisation rules, which the layers
/// above uphold (one command pool per thread, one recorder per command
/// buffer).
pub trait DeviceBackend: Send + Sync {
    /// Human readable adapter name
    fn name(&self) -> &str;

    /// Limits relevant to pool sizing and alignment
    fn limits(&self) -> DeviceLimits;

    /// Memory types and heaps
    fn memory_properties(&self) -> MemoryProperties;

    // --- memory ---

    /// Allocate a block of device memory of one type
    fn allocate_memory(&self, memory_type_index: u32, size: vk::DeviceSize) -> VulkanResult<vk::DeviceMemory>;
    /// Free a memory block
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Map a whole host-visible block
    fn map_memory(&self, memory: vk::DeviceMemory) -> VulkanResult<NonNull<u8>>;
    /// Unmap a block
    fn unmap_memory(&self, memory: vk::DeviceMemory);
    /// Flush host writes of a non-coherent range
    fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()>;
    /// Invalidate a non-coherent range before host reads
    fn invalidate_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> VulkanResult<()>;

    // --- buffers ---

    /// Create an unbound buffer
    fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<vk::Buffer>;
    /// Memory requirements of a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Bind a buffer to memory
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()>;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Create a typed texel view of a buffer range
    fn create_buffer_view(&self, buffer: vk::Buffer, format: vk::Format, offset: vk::DeviceSize, range: vk::DeviceSize) -> VulkanResult<vk::BufferView>;
    /// Destroy a buffer view
    fn destroy_buffer_view(&self, view: vk::BufferView);

    // --- images ---

    /// Create an unbound optimal-tiling 2D image
    fn create_image(&self, desc: &ImageDesc) -> VulkanResult<vk::Image>;
    /// Memory requirements of an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Bind an image to memory
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory, offset: vk::DeviceSize) -> VulkanResult<()>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Create a 2D view of a whole image
    fn create_image_view(&self, image: vk::Image, desc: &ImageDesc) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDesc) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // --- descriptors ---

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[DescriptorBinding]) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a pool whose sets can be freed individually
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set in it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet>;
    /// Return one set to its pool
    fn free_descriptor_set(&self, pool: vk::DescriptorPool, set: vk::DescriptorSet) -> VulkanResult<()>;
    /// Write one binding of a set, visible to commands recorded afterwards
    fn write_descriptor(&self, set: vk::DescriptorSet, binding: u32, write: &DescriptorWrite);

    // --- pipelines ---

    /// Create an empty pipeline cache
    fn create_pipeline_cache(&self) -> VulkanResult<vk::PipelineCache>;
    /// Destroy a pipeline cache
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);
    /// Create a pipeline layout
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constants: &[vk::PushConstantRange]) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a graphics pipeline for subpass 0 of `render_pass`
    fn create_graphics_pipeline(
        &self,
        cache: vk::PipelineCache,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        desc: &GraphicsPipelineDesc,
    ) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    /// Create a render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a framebuffer
    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // --- commands ---

    /// Create a command pool on the graphics queue family whose buffers reset individually
    fn create_command_pool(&self) -> VulkanResult<vk::CommandPool>;
    /// Destroy a command pool and its buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate one primary command buffer
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VulkanResult<vk::CommandBuffer>;
    /// Free one command buffer
    fn free_command_buffer(&self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    /// Begin one-time-submit recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// End recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Discard recorded commands
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Record one command
    fn record(&self, command_buffer: vk::CommandBuffer, command: GpuCommand);
    /// Submit to the graphics queue; `fence` signals on completion
    fn submit(&self, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> VulkanResult<()>;

    // --- synchronisation ---

    /// Create a fence
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Non-blocking poll
    fn fence_status(&self, fence: vk::Fence) -> VulkanResult<bool>;
    /// Block until signaled; `Ok(false)` when `timeout` elapsed first, `None` waits forever
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Option<Duration>) -> VulkanResult<bool>;
    /// Return a fence to unsignaled
    fn reset_fence(&self, fence: vk::Fence) -> VulkanResult<()>;
    /// Block until every submission completed
    fn wait_idle(&self) -> VulkanResult<()>;

    /// Attach a debug name to an object
    fn set_debug_name(&self, object_type: vk::ObjectType, handle: u64, name: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_types_filter_bits_and_flags() {
        let props = MemoryProperties {
            types: vec![
                MemoryTypeInfo { property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL, heap_index: 0 },
                MemoryTypeInfo {
                    property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                    heap_index: 1,
                },
                MemoryTypeInfo {
                    property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
                    heap_index: 0,
                },
            ],
            heaps: Vec::new(),
        };

        assert_eq!(props.candidate_types(0b111, vk::MemoryPropertyFlags::HOST_VISIBLE), vec![1, 2]);
        assert_eq!(props.candidate_types(0b011, vk::MemoryPropertyFlags::HOST_VISIBLE), vec![1]);
        assert_eq!(props.candidate_types(0b111, vk::MemoryPropertyFlags::empty()), vec![0, 1, 2]);
        assert!(props.candidate_types(0b001, vk::MemoryPropertyFlags::HOST_COHERENT).is_empty());
    }

    #[test]
    fn test_image_byte_size() {
        assert_eq!(ImageDesc::texture(4, 2, vk::Format::R8G8B8A8_UNORM).byte_size(), Some(32));
        assert_eq!(ImageDesc::texture(4, 4, vk::Format::R8_UNORM).byte_size(), Some(16));
        assert_eq!(ImageDesc::texture(4, 4, vk::Format::BC1_RGB_UNORM_BLOCK).byte_size(), None);
    }
}
