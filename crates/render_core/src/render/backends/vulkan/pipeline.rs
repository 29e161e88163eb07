//! Graphics pipeline creation

use ash::vk;
use std::ffi::CStr;

use crate::render::backend::GraphicsPipelineDesc;
use crate::render::{VulkanError, VulkanResult};

const ENTRY_POINT: &[u8] = b"main\0";

struct ShaderModule<'a> {
    device: &'a ash::Device,
    handle: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn new(device: &'a ash::Device, spirv: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv);
        // SAFETY: `spirv` is borrowed for the duration of the call
        let handle = unsafe { device.create_shader_module(&create_info, None) }.map_err(VulkanError::creation("shader module"))?;
        Ok(Self { device, handle })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        // SAFETY: modules are only needed until the pipeline is created
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

/// Create a pipeline for subpass 0 of `render_pass` with dynamic viewport and scissor
pub(super) fn create_graphics_pipeline(
    device: &ash::Device,
    cache: vk::PipelineCache,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    desc: &GraphicsPipelineDesc,
) -> VulkanResult<vk::Pipeline> {
    let entry_point = CStr::from_bytes_with_nul(ENTRY_POINT).map_err(|e| VulkanError::invalid(format!("bad entry point: {e}")))?;
    let vertex = ShaderModule::new(device, &desc.vertex_spirv)?;
    let fragment = ShaderModule::new(device, &desc.fragment_spirv)?;

    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex.handle)
            .name(entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment.handle)
            .name(entry_point)
            .build(),
    ];

    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&desc.vertex_bindings)
        .vertex_attribute_descriptions(&desc.vertex_attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(desc.topology);
    let viewport = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(desc.cull_mode)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_test)
        .depth_write_enable(desc.depth_test)
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

    let blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(desc.alpha_blend)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build();
    let blend_attachments = [blend_attachment];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    // SAFETY: all state structs referenced by create_info live until the call returns
    let pipelines = unsafe { device.create_graphics_pipelines(cache, &[create_info], None) }
        .map_err(|(_, result)| VulkanError::ResourceCreation { resource: "graphics pipeline", result })?;
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| VulkanError::invalid("driver returned no pipeline"))
}
