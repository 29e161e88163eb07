//! Frame pacing for frames in flight
//!
//! Handles the per-slot fences that make the per-frame dirty protocol of
//! [`DeviceDataCache`](crate::render::cache::DeviceDataCache) safe: a slot
//! index is only handed out again once every submission of its previous
//! use has completed.

use std::sync::Arc;

use crate::render::commands::{CommandBuffer, Fence};
use crate::render::device::Device;
use crate::render::VulkanResult;

/// Work run between frames once the GPU is idle, e.g. recreating render targets
pub type ResizeHandler = Box<dyn FnMut(&Arc<Device>) -> VulkanResult<()> + Send>;

/// One frame being recorded
pub struct Frame {
    device: Arc<Device>,
    index: usize,
    number: u64,
    command_buffers: Vec<CommandBuffer>,
}

impl Frame {
    /// Slot index in `0..max_frames_in_flight`, passed to renderables
    pub fn index(&self) -> usize {
        self.index
    }

    /// Monotonic frame counter
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Device the frame records for
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Start a command buffer for this frame; hand it back through [`Frame::submit`]
    pub fn command_buffer(&self, name: &str) -> VulkanResult<CommandBuffer> {
        self.device.get_command_buffer(&format!("frame {} {}", self.number, name))
    }

    /// Queue a recorded command buffer for execution at [`FrameScheduler::end_frame`]
    pub fn submit(&mut self, command_buffer: CommandBuffer) {
        self.command_buffers.push(command_buffer);
    }

    /// Command buffers queued so far
    pub fn queued(&self) -> usize {
        self.command_buffers.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("number", &self.number)
            .field("queued", &self.command_buffers.len())
            .finish_non_exhaustive()
    }
}

/// Hands out frame slots round-robin and waits a slot's fences before reuse
pub struct FrameScheduler {
    device: Arc<Device>,
    frame_number: u64,
    in_flight: Vec<Vec<Arc<Fence>>>,
    pending_resize: Option<ResizeHandler>,
    failed_resizes: u32,
}

impl FrameScheduler {
    /// Scheduler with one slot per frame in flight of `device`
    pub fn new(device: Arc<Device>) -> Self {
        let slots = device.max_frames_in_flight();
        Self { device, frame_number: 0, in_flight: vec![Vec::new(); slots], pending_resize: None, failed_resizes: 0 }
    }

    /// Number of the next frame
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Submissions still tracked for slot `index`
    pub fn in_flight(&self, index: usize) -> usize {
        self.in_flight.get(index).map_or(0, Vec::len)
    }

    /// Run `handler` at the start of the next frame, after all work has drained
    pub fn request_resize(&mut self, handler: ResizeHandler) {
        if self.pending_resize.replace(handler).is_some() {
            log::debug!("[FRAME] replacing pending resize on '{}'", self.device.name());
        }
    }

    /// Whether a resize is still waiting to run
    pub fn resize_pending(&self) -> bool {
        self.pending_resize.is_some()
    }

    /// Start the next frame.
    ///
    /// Blocks until the slot's previous submissions completed. A pending
    /// resize runs here; when it fails the error is logged and the resize
    /// is tried again at the next frame.
    pub fn begin_frame(&mut self) -> VulkanResult<Frame> {
        let index = (self.frame_number % self.in_flight.len() as u64) as usize;
        // Fences stay tracked until every wait succeeded
        for fence in &self.in_flight[index] {
            fence.wait()?;
        }
        self.in_flight[index].clear();

        if self.pending_resize.is_some() {
            self.flush()?;
            self.run_resize();
        }

        let frame = Frame { device: self.device.clone(), index, number: self.frame_number, command_buffers: Vec::new() };
        self.frame_number += 1;
        log::trace!("[FRAME] begin {} in slot {}", frame.number, frame.index);
        Ok(frame)
    }

    fn run_resize(&mut self) {
        let Some(mut handler) = self.pending_resize.take() else {
            return;
        };
        match handler(&self.device) {
            Ok(()) => {
                log::info!("[FRAME] resize applied on '{}'", self.device.name());
                self.failed_resizes = 0;
            }
            Err(err) => {
                self.failed_resizes += 1;
                log::warn!(
                    "[FRAME] resize on '{}' failed (attempt {}), retrying next frame: {}",
                    self.device.name(),
                    self.failed_resizes,
                    err
                );
                self.pending_resize = Some(handler);
            }
        }
    }

    /// Execute the frame's command buffers in queue order and track their fences under its slot
    pub fn end_frame(&mut self, frame: Frame) -> VulkanResult<()> {
        let Frame { index, number, command_buffers, .. } = frame;
        let count = command_buffers.len();
        for command_buffer in command_buffers {
            let fence = self.device.execute(command_buffer)?;
            self.in_flight[index].push(fence);
        }
        log::trace!("[FRAME] end {} in slot {} ({} submissions)", number, index, count);
        Ok(())
    }

    /// Wait for every slot and every outstanding command buffer on the device
    pub fn flush(&mut self) -> VulkanResult<()> {
        for slot in &mut self.in_flight {
            for fence in slot.iter() {
                fence.wait()?;
            }
            slot.clear();
        }
        self.device.flush_command_buffers()
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::error!("[FRAME] flush on shutdown failed: {err}");
        }
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("device", &self.device.name())
            .field("frame_number", &self.frame_number)
            .field("resize_pending", &self.pending_resize.is_some())
            .finish_non_exhaustive()
    }
}
