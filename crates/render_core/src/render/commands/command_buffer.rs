//! Command buffer recording
//!
//! A [`CommandBuffer`] is obtained from [`Device::get_command_buffer`],
//! recorded by one thread, and consumed by [`Device::execute`], which hands
//! back its [`Fence`]. Consuming the recorder on submission means a
//! submitted buffer can never be reset or re-recorded from user code; the
//! pool only hands it out again after the fence signaled.
//!
//! The recorder caches the active render pass and the bound material.
//! Binding the material that is already bound is skipped and only returns
//! the cached pipeline layout.

use ash::vk;
use bytemuck::Pod;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::fence::Fence;
use super::pool_registry::{lock_pool, PooledCommandBuffer, SharedCommandPool};
use crate::render::backend::{ClearValue, GpuCommand, ImageTransition, MemoryDependency};
use crate::render::device::Device;
use crate::render::material::Material;
use crate::render::resources::{Buffer, DescriptorSet, Framebuffer, RenderPass};
use crate::render::{VulkanError, VulkanResult};

static NEXT_COMMAND_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Records GPU commands for one submission
pub struct CommandBuffer {
    device: Arc<Device>,
    pool: SharedCommandPool,
    handle: vk::CommandBuffer,
    fence: Arc<Fence>,
    id: u64,
    name: String,
    current_render_pass: Option<vk::RenderPass>,
    current_material: Option<Arc<Material>>,
    current_pipeline_layout: Option<vk::PipelineLayout>,
    commands_recorded: usize,
    submitted: bool,
}

impl CommandBuffer {
    /// Take a buffer from `pool` and begin recording
    pub(crate) fn begin(device: &Arc<Device>, pool: SharedCommandPool, name: &str) -> VulkanResult<Self> {
        let (handle, fence) = lock_pool(&pool).acquire()?;
        if let Err(err) = device.backend().begin_command_buffer(handle) {
            lock_pool(&pool).recycle(PooledCommandBuffer { handle, fence, submitted: false });
            return Err(err);
        }

        let command_buffer = Self {
            device: device.clone(),
            pool,
            handle,
            fence,
            id: NEXT_COMMAND_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            current_render_pass: None,
            current_material: None,
            current_pipeline_layout: None,
            commands_recorded: 0,
            submitted: false,
        };
        command_buffer.apply_debug_names();
        log::trace!("[COMMANDS] begin '{}' (#{})", name, command_buffer.id);
        Ok(command_buffer)
    }

    fn apply_debug_names(&self) {
        self.device.set_debug_name(self.handle, &self.name);
        self.device.set_debug_name(self.fence.handle(), &format!("{} fence", self.name));
    }

    /// Discard everything recorded so far and start over under a new name.
    ///
    /// Clears the cached render pass and material so bind elimination
    /// cannot carry over from the discarded recording.
    pub fn reset(&mut self, name: &str) -> VulkanResult<()> {
        self.release_material();
        self.current_render_pass = None;
        self.commands_recorded = 0;

        let backend = self.device.backend();
        backend.reset_command_buffer(self.handle)?;
        self.fence.reset()?;
        backend.begin_command_buffer(self.handle)?;

        self.name = name.to_string();
        self.apply_debug_names();
        Ok(())
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    /// Fence signaled when this buffer's submission completes
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// Process-unique recorder id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device the buffer records for
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Render pass currently open, if any
    pub fn current_render_pass(&self) -> Option<vk::RenderPass> {
        self.current_render_pass
    }

    /// Material currently bound, if any
    pub fn current_material(&self) -> Option<&Arc<Material>> {
        self.current_material.as_ref()
    }

    /// Number of commands recorded since begin or reset
    pub fn commands_recorded(&self) -> usize {
        self.commands_recorded
    }

    /// Record a raw command
    pub fn record(&mut self, command: GpuCommand) {
        self.device.backend().record(self.handle, command);
        self.commands_recorded += 1;
    }

    /// Open a render pass over the whole framebuffer, with matching dynamic viewport and scissor
    pub fn begin_render_pass(&mut self, render_pass: &RenderPass, framebuffer: &Framebuffer, clear_values: &[ClearValue]) -> VulkanResult<()> {
        if let Some(active) = self.current_render_pass {
            return Err(VulkanError::invalid(format!("render pass {active:?} is still active on '{}'", self.name)));
        }
        let extent = framebuffer.extent();
        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        self.record(GpuCommand::BeginRenderPass {
            render_pass: render_pass.handle(),
            framebuffer: framebuffer.handle(),
            render_area,
            clear_values: clear_values.to_vec(),
        });
        self.record(GpuCommand::SetViewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }));
        self.record(GpuCommand::SetScissor(render_area));
        self.current_render_pass = Some(render_pass.handle());
        Ok(())
    }

    /// Close the active render pass. Pipelines are per pass, so the material binding is dropped too.
    pub fn end_render_pass(&mut self) -> VulkanResult<()> {
        if self.current_render_pass.take().is_none() {
            return Err(VulkanError::invalid(format!("no render pass active on '{}'", self.name)));
        }
        self.release_material();
        self.record(GpuCommand::EndRenderPass);
        Ok(())
    }

    /// Bind a material's pipeline variant for the active render pass.
    ///
    /// Rebinding the bound material records nothing. Binding a different
    /// one marks the previous material unbound from this buffer.
    pub fn bind_material(&mut self, material: &Arc<Material>) -> VulkanResult<vk::PipelineLayout> {
        if let (Some(current), Some(layout)) = (&self.current_material, self.current_pipeline_layout) {
            if Arc::ptr_eq(current, material) {
                return Ok(layout);
            }
        }
        let render_pass = self.current_render_pass.ok_or_else(|| {
            VulkanError::invalid(format!("material '{}' bound outside a render pass", material.name()))
        })?;

        let state = material.device_state(&self.device)?;
        let pipeline = state.pipeline_for(render_pass)?;
        self.release_material();
        self.record(GpuCommand::BindPipeline(pipeline));
        material.mark_bound(self.id);
        self.current_material = Some(material.clone());
        self.current_pipeline_layout = Some(state.pipeline_layout());
        Ok(state.pipeline_layout())
    }

    fn release_material(&mut self) {
        if let Some(previous) = self.current_material.take() {
            previous.mark_unbound(self.id);
        }
        self.current_pipeline_layout = None;
    }

    /// Bind one descriptor set at `set_index`
    pub fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set_index: u32, set: &DescriptorSet) {
        self.record(GpuCommand::BindDescriptorSets { layout, first_set: set_index, sets: vec![set.handle()] });
    }

    /// Push a plain-data value as push constants
    pub fn push_constants<T: Pod>(&mut self, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, value: &T) {
        self.record(GpuCommand::PushConstants { layout, stages, offset: 0, data: bytemuck::bytes_of(value).to_vec() });
    }

    /// Bind a vertex buffer at `binding`
    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: &Buffer) {
        self.record(GpuCommand::BindVertexBuffers { first_binding: binding, buffers: vec![(buffer.handle(), 0)] });
    }

    /// Bind an index buffer
    pub fn bind_index_buffer(&mut self, buffer: &Buffer, index_type: vk::IndexType) {
        self.record(GpuCommand::BindIndexBuffer { buffer: buffer.handle(), offset: 0, index_type });
    }

    /// Override the viewport
    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        self.record(GpuCommand::SetViewport(viewport));
    }

    /// Override the scissor
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        self.record(GpuCommand::SetScissor(scissor));
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> VulkanResult<()> {
        self.require_render_pass("draw")?;
        self.record(GpuCommand::Draw { vertex_count, instance_count, first_vertex: 0, first_instance: 0 });
        Ok(())
    }

    /// Indexed draw
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> VulkanResult<()> {
        self.require_render_pass("draw_indexed")?;
        self.record(GpuCommand::DrawIndexed { index_count, instance_count, first_index: 0, vertex_offset: 0, first_instance: 0 });
        Ok(())
    }

    fn require_render_pass(&self, what: &str) -> VulkanResult<()> {
        if self.current_render_pass.is_none() {
            return Err(VulkanError::invalid(format!("{what} recorded outside a render pass on '{}'", self.name)));
        }
        Ok(())
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`
    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        if size > src.size() || size > dst.size() {
            return Err(VulkanError::SizeMismatch { requested: size, capacity: src.size().min(dst.size()) });
        }
        self.copy_buffer_raw(src.handle(), dst.handle(), size);
        Ok(())
    }

    pub(crate) fn copy_buffer_raw(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        self.record(GpuCommand::CopyBuffer { src, dst, regions: vec![vk::BufferCopy { src_offset: 0, dst_offset: 0, size }] });
    }

    /// Record a global memory barrier
    pub fn memory_barrier(&mut self, dependency: MemoryDependency) {
        self.record(GpuCommand::MemoryBarrier(dependency));
    }

    /// Record an image layout transition
    pub fn transition_image(&mut self, transition: ImageTransition) {
        self.record(GpuCommand::ImageBarrier(transition));
    }

    /// End recording and submit with the buffer's fence
    pub(crate) fn submit(mut self) -> VulkanResult<Arc<Fence>> {
        if self.current_render_pass.is_some() {
            return Err(VulkanError::invalid(format!("'{}' submitted with an open render pass", self.name)));
        }
        self.release_material();

        let backend = self.device.backend().clone();
        backend.end_command_buffer(self.handle)?;
        backend.submit(self.handle, self.fence.handle())?;
        self.fence.mark_submitted();
        self.submitted = true;

        lock_pool(&self.pool).recycle(PooledCommandBuffer {
            handle: self.handle,
            fence: self.fence.clone(),
            submitted: true,
        });
        log::trace!("[COMMANDS] submitted '{}' ({} commands)", self.name, self.commands_recorded);
        Ok(self.fence.clone())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        if self.submitted {
            return;
        }
        self.release_material();
        log::trace!("[COMMANDS] '{}' dropped without submission, returning it to the pool", self.name);
        lock_pool(&self.pool).recycle(PooledCommandBuffer {
            handle: self.handle,
            fence: self.fence.clone(),
            submitted: false,
        });
    }
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("render_pass", &self.current_render_pass)
            .finish_non_exhaustive()
    }
}
