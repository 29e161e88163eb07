//! Object tables of the headless device

use ash::vk;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ptr::NonNull;

use crate::render::backend::{DescriptorBinding, DescriptorWrite, ImageDesc};

/// Host allocation standing in for one `VkDeviceMemory`.
///
/// Owned through a raw pointer so mapped pointers handed out to the
/// allocator stay valid while the replay code copies through the same
/// bytes.
pub(super) struct HostBlock {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the block is only reached through the backend mutex or through
// mapped pointers whose synchronisation is the caller's contract, exactly
// like real device memory.
unsafe impl Send for HostBlock {}

impl HostBlock {
    pub(super) fn zeroed(len: usize) -> Self {
        let boxed: Box<[u8]> = vec![0u8; len.max(1)].into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed).cast::<u8>();
        // SAFETY: Box::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, len }
    }

    pub(super) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for HostBlock {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw of a boxed slice of this length
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len)));
        }
    }
}

pub(super) struct MemoryObject {
    pub type_index: u32,
    pub heap_index: usize,
    pub size: u64,
    pub block: HostBlock,
    pub mapped: bool,
}

/// Memory binding of a buffer or image
#[derive(Debug, Clone, Copy)]
pub(super) struct Binding {
    pub memory: u64,
    pub offset: u64,
}

pub(super) struct BufferObject {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub binding: Option<Binding>,
}

pub(super) struct ImageObject {
    pub desc: ImageDesc,
    pub binding: Option<Binding>,
    pub layout: vk::ImageLayout,
}

pub(super) struct DescriptorPoolObject {
    pub max_sets: u32,
    pub capacity: HashMap<vk::DescriptorType, u32>,
    pub used: HashMap<vk::DescriptorType, u32>,
    pub sets: HashSet<u64>,
}

pub(super) struct DescriptorSetObject {
    pub pool: u64,
    pub layout: u64,
    pub writes: HashMap<u32, DescriptorWrite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

pub(super) struct CommandBufferObject {
    pub pool: u64,
    pub state: CommandBufferState,
    pub commands: Vec<crate::render::backend::GpuCommand>,
}

pub(super) struct Submission {
    pub command_buffer: u64,
    pub fence: u64,
}

/// Kinds of objects only tracked for liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum SimpleKind {
    BufferView,
    ImageView,
    Sampler,
    PipelineCache,
    PipelineLayout,
    Pipeline,
    RenderPass,
    Framebuffer,
}

#[derive(Default)]
pub(super) struct HeadlessState {
    pub next_handle: u64,
    pub memory: HashMap<u64, MemoryObject>,
    pub heap_usage: Vec<u64>,
    pub buffers: HashMap<u64, BufferObject>,
    pub images: HashMap<u64, ImageObject>,
    pub image_views: HashMap<u64, u64>,
    pub simple: HashMap<u64, SimpleKind>,
    pub set_layouts: HashMap<u64, Vec<DescriptorBinding>>,
    pub descriptor_pools: HashMap<u64, DescriptorPoolObject>,
    pub descriptor_sets: HashMap<u64, DescriptorSetObject>,
    pub command_pools: HashMap<u64, HashSet<u64>>,
    pub command_buffers: HashMap<u64, CommandBufferObject>,
    pub fences: HashMap<u64, bool>,
    pub pending: VecDeque<Submission>,
    pub debug_names: HashMap<u64, String>,
    pub counters: Counters,
    pub failing_fence_waits: u32,
    pub failing_fence_resets: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct Counters {
    pub command_buffers_allocated: u64,
    pub submissions: u64,
    pub completed: u64,
    pub draws: u64,
    pub copies: u64,
    pub render_passes: u64,
    pub pipelines_created: u64,
    pub validation_errors: u64,
}

impl HeadlessState {
    pub fn allocate_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn validation_error(&mut self, message: &str) {
        self.counters.validation_errors += 1;
        log::warn!("[HEADLESS] validation: {}", message);
    }

    /// True when a pending submission still references `handle`
    pub fn in_use_by_pending(&self, handle: u64) -> bool {
        self.pending.iter().any(|submission| {
            self.command_buffers
                .get(&submission.command_buffer)
                .is_some_and(|cb| cb.commands.iter().any(|cmd| super::execute::references(cmd, handle)))
        })
    }
}
