//! Translation of recorded [`GpuCommand`]s into `vkCmd*` calls

use ash::vk;

use crate::render::backend::GpuCommand;

fn whole_image(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: vk::REMAINING_MIP_LEVELS,
        base_array_layer: 0,
        layer_count: vk::REMAINING_ARRAY_LAYERS,
    }
}

/// Record `command` into `command_buffer`, which must be in the recording state
pub(super) fn record(device: &ash::Device, command_buffer: vk::CommandBuffer, command: GpuCommand) {
    let cb = command_buffer;
    // SAFETY: the caller owns `command_buffer` exclusively while recording, and every
    // handle inside `command` was created on `device`
    unsafe {
        match command {
            GpuCommand::CopyBuffer { src, dst, regions } => device.cmd_copy_buffer(cb, src, dst, &regions),
            GpuCommand::CopyBufferToImage { src, dst, regions } => {
                device.cmd_copy_buffer_to_image(cb, src, dst, vk::ImageLayout::TRANSFER_DST_OPTIMAL, &regions);
            }
            GpuCommand::CopyImageToBuffer { src, dst, regions } => {
                device.cmd_copy_image_to_buffer(cb, src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, dst, &regions);
            }
            GpuCommand::MemoryBarrier(dependency) => {
                let barrier = vk::MemoryBarrier::builder()
                    .src_access_mask(dependency.src_access)
                    .dst_access_mask(dependency.dst_access)
                    .build();
                device.cmd_pipeline_barrier(
                    cb,
                    dependency.src_stage,
                    dependency.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }
            GpuCommand::ImageBarrier(transition) => {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .old_layout(transition.old_layout)
                    .new_layout(transition.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(transition.image)
                    .subresource_range(whole_image(transition.aspect))
                    .src_access_mask(transition.src_access)
                    .dst_access_mask(transition.dst_access)
                    .build();
                device.cmd_pipeline_barrier(
                    cb,
                    transition.src_stage,
                    transition.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );
            }
            GpuCommand::BeginRenderPass { render_pass, framebuffer, render_area, clear_values } => {
                let clear_values: Vec<vk::ClearValue> = clear_values.into_iter().map(|value| value.to_vk()).collect();
                let begin_info = vk::RenderPassBeginInfo::builder()
                    .render_pass(render_pass)
                    .framebuffer(framebuffer)
                    .render_area(render_area)
                    .clear_values(&clear_values);
                device.cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
            }
            GpuCommand::EndRenderPass => device.cmd_end_render_pass(cb),
            GpuCommand::BindPipeline(pipeline) => device.cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, pipeline),
            GpuCommand::BindDescriptorSets { layout, first_set, sets } => {
                device.cmd_bind_descriptor_sets(cb, vk::PipelineBindPoint::GRAPHICS, layout, first_set, &sets, &[]);
            }
            GpuCommand::PushConstants { layout, stages, offset, data } => {
                device.cmd_push_constants(cb, layout, stages, offset, &data);
            }
            GpuCommand::BindVertexBuffers { first_binding, buffers } => {
                let (handles, offsets): (Vec<vk::Buffer>, Vec<vk::DeviceSize>) = buffers.into_iter().unzip();
                device.cmd_bind_vertex_buffers(cb, first_binding, &handles, &offsets);
            }
            GpuCommand::BindIndexBuffer { buffer, offset, index_type } => {
                device.cmd_bind_index_buffer(cb, buffer, offset, index_type);
            }
            GpuCommand::SetViewport(viewport) => device.cmd_set_viewport(cb, 0, &[viewport]),
            GpuCommand::SetScissor(scissor) => device.cmd_set_scissor(cb, 0, &[scissor]),
            GpuCommand::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                device.cmd_draw(cb, vertex_count, instance_count, first_vertex, first_instance);
            }
            GpuCommand::DrawIndexed { index_count, instance_count, first_index, vertex_offset, first_instance } => {
                device.cmd_draw_indexed(cb, index_count, instance_count, first_index, vertex_offset, first_instance);
            }
        }
    }
}
