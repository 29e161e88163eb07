//! # Memory Allocator
//!
//! Sub-allocates `VkDeviceMemory` blocks for buffers and images.
//!
//! Each memory type owns a list of blocks of `memory_block_size` bytes.
//! Requests larger than half a block get a dedicated block of their own.
//! Inside a block, space is handed out first-fit from a coalescing
//! [`FreeList`], aligned to the larger of the resource's alignment and the
//! device's `bufferImageGranularity` so linear and optimal resources can
//! share a block.
//!
//! A block is returned to the device as soon as its last allocation is
//! freed. Host-visible blocks are mapped once, when created, and stay
//! mapped for their lifetime; every allocation in them exposes a
//! [`MappedPtr`] at its offset.
//!
//! Allocation failure is never retried: when no candidate memory type has
//! room, the caller gets [`VulkanError::OutOfDeviceMemory`].

use ash::vk::{self, Handle};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{align_down, align_up, FreeList};
use crate::render::backend::{DeviceBackend, DeviceLimits, MemoryProperties};
use crate::render::{VulkanError, VulkanResult};

/// Persistently mapped host pointer into a memory block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedPtr(NonNull<u8>);

// SAFETY: the pointer addresses device memory shared with the GPU; access
// ordering is governed by fences, not by Rust ownership.
unsafe impl Send for MappedPtr {}
// SAFETY: see above
unsafe impl Sync for MappedPtr {}

impl MappedPtr {
    /// Raw pointer to the first byte
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    fn offset(self, bytes: u64) -> Self {
        // SAFETY: callers only offset within the mapped block
        Self(unsafe { NonNull::new_unchecked(self.0.as_ptr().add(bytes as usize)) })
    }
}

/// A live sub-allocation. Hand it back with [`MemoryAllocator::free`].
#[derive(Debug)]
pub struct MemoryAllocation {
    memory: vk::DeviceMemory,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    block_id: u64,
    block_size: vk::DeviceSize,
    memory_type_index: u32,
    property_flags: vk::MemoryPropertyFlags,
    mapped: Option<MappedPtr>,
}

impl MemoryAllocation {
    /// Backing device memory
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Offset of the allocation in its block
    pub fn offset(&self) -> vk::DeviceSize {
        self.offset
    }

    /// Allocated bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Memory type the block was allocated from
    pub fn memory_type_index(&self) -> u32 {
        self.memory_type_index
    }

    /// Property flags of that memory type
    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        self.property_flags
    }

    /// Host pointer at the allocation's offset, for host-visible memory
    pub fn mapped_ptr(&self) -> Option<MappedPtr> {
        self.mapped
    }

    /// True when the CPU can write the memory directly
    pub fn is_host_visible(&self) -> bool {
        self.mapped.is_some()
    }
}

/// Allocator-wide counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Live device memory blocks
    pub blocks: usize,
    /// Of which dedicated to a single resource
    pub dedicated_blocks: usize,
    /// Live sub-allocations
    pub allocations: usize,
    /// Bytes held from the device
    pub bytes_reserved: u64,
    /// Bytes handed out to resources
    pub bytes_in_use: u64,
}

/// One live allocation, as listed by [`MemoryAllocator::report`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationReport {
    /// Debug name given at allocation
    pub name: String,
    /// Memory type index
    pub memory_type_index: u32,
    /// Block identifier
    pub block_id: u64,
    /// Offset in the block
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

struct LiveAllocation {
    size: u64,
    name: String,
}

struct MemoryBlock {
    memory: vk::DeviceMemory,
    memory_type_index: u32,
    heap_index: usize,
    size: u64,
    dedicated: bool,
    mapped: Option<MappedPtr>,
    free: FreeList,
    live: HashMap<u64, LiveAllocation>,
}

#[derive(Default)]
struct AllocatorState {
    blocks: HashMap<u64, MemoryBlock>,
    next_block_id: u64,
    heap_usage: Vec<u64>,
}

/// Per-device sub-allocator
pub struct MemoryAllocator {
    backend: Arc<dyn DeviceBackend>,
    properties: MemoryProperties,
    limits: DeviceLimits,
    block_size: u64,
    debug_names: bool,
    state: Mutex<AllocatorState>,
}

impl MemoryAllocator {
    /// Create an allocator carving blocks of `block_size` bytes
    pub fn new(backend: Arc<dyn DeviceBackend>, block_size: u64, debug_names: bool) -> Self {
        let properties = backend.memory_properties();
        let limits = backend.limits();
        let state = AllocatorState { heap_usage: vec![0; properties.heaps.len()], ..AllocatorState::default() };
        Self { backend, properties, limits, block_size, debug_names, state: Mutex::new(state) }
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate memory satisfying `requirements` with all of `properties`.
    ///
    /// Candidate types are tried in the driver's order, which lists the
    /// most preferred types first.
    pub fn allocate(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        debug_name: &str,
    ) -> VulkanResult<MemoryAllocation> {
        let candidates = self.properties.candidate_types(requirements.memory_type_bits, properties);
        let alignment = requirements.alignment.max(self.limits.buffer_image_granularity).max(1);
        let size = requirements.size.max(1);
        let out_of_memory = || VulkanError::OutOfDeviceMemory { requested: size, properties };

        if candidates.is_empty() {
            log::error!("[ALLOC] no memory type matches {:?} for '{}'", properties, debug_name);
            return Err(out_of_memory());
        }

        let mut state = self.state();

        // Existing shared blocks first
        for &type_index in &candidates {
            let hit = state
                .blocks
                .iter_mut()
                .filter(|(_, block)| block.memory_type_index == type_index && !block.dedicated)
                .find_map(|(&id, block)| block.free.allocate(size, alignment).map(|offset| (id, offset)));
            if let Some((block_id, offset)) = hit {
                return self.finish(&mut state, block_id, offset, size, debug_name);
            }
        }

        // Then a new block
        let dedicated = size > self.block_size / 2;
        let block_size = if dedicated { size } else { self.block_size };
        for &type_index in &candidates {
            let heap_index = self.properties.types[type_index as usize].heap_index as usize;
            let heap_size = self.properties.heaps.get(heap_index).map_or(0, |heap| heap.size);
            if state.heap_usage.get(heap_index).copied().unwrap_or(0) + block_size > heap_size {
                log::debug!("[ALLOC] heap {} cannot hold a {} byte block", heap_index, block_size);
                continue;
            }

            match self.create_block(&mut state, type_index, heap_index, block_size, dedicated) {
                Ok(block_id) => {
                    let offset = state
                        .blocks
                        .get_mut(&block_id)
                        .and_then(|block| block.free.allocate(size, alignment))
                        .ok_or_else(out_of_memory)?;
                    return self.finish(&mut state, block_id, offset, size, debug_name);
                }
                Err(err) if err.is_out_of_memory() => {
                    log::warn!("[ALLOC] memory type {} exhausted: {}", type_index, err);
                }
                Err(err) => return Err(err),
            }
        }

        log::error!("[ALLOC] out of device memory: {} bytes with {:?} for '{}'", size, properties, debug_name);
        Err(out_of_memory())
    }

    fn create_block(
        &self,
        state: &mut AllocatorState,
        type_index: u32,
        heap_index: usize,
        size: u64,
        dedicated: bool,
    ) -> VulkanResult<u64> {
        let memory = self.backend.allocate_memory(type_index, size)?;
        let property_flags = self.properties.types[type_index as usize].property_flags;

        let mapped = if property_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            match self.backend.map_memory(memory) {
                Ok(ptr) => Some(MappedPtr(ptr)),
                Err(err) => {
                    self.backend.free_memory(memory);
                    return Err(err);
                }
            }
        } else {
            None
        };

        state.next_block_id += 1;
        let block_id = state.next_block_id;
        if let Some(usage) = state.heap_usage.get_mut(heap_index) {
            *usage += size;
        }
        if self.debug_names {
            let kind = if dedicated { "dedicated" } else { "shared" };
            self.backend.set_debug_name(
                vk::ObjectType::DEVICE_MEMORY,
                memory.as_raw(),
                &format!("block {block_id} ({kind}, type {type_index})"),
            );
        }
        log::debug!(
            "[ALLOC] new {} block {} of {} bytes in memory type {}",
            if dedicated { "dedicated" } else { "shared" },
            block_id,
            size,
            type_index
        );

        state.blocks.insert(
            block_id,
            MemoryBlock {
                memory,
                memory_type_index: type_index,
                heap_index,
                size,
                dedicated,
                mapped,
                free: FreeList::new(size),
                live: HashMap::new(),
            },
        );
        Ok(block_id)
    }

    fn finish(
        &self,
        state: &mut AllocatorState,
        block_id: u64,
        offset: u64,
        size: u64,
        debug_name: &str,
    ) -> VulkanResult<MemoryAllocation> {
        let block = state
            .blocks
            .get_mut(&block_id)
            .ok_or_else(|| VulkanError::invalid(format!("memory block {block_id} vanished during allocation")))?;
        block.live.insert(offset, LiveAllocation { size, name: debug_name.to_string() });
        log::trace!("[ALLOC] '{}': {} bytes at block {} offset {}", debug_name, size, block_id, offset);
        Ok(MemoryAllocation {
            memory: block.memory,
            offset,
            size,
            block_id,
            block_size: block.size,
            memory_type_index: block.memory_type_index,
            property_flags: self.properties.types[block.memory_type_index as usize].property_flags,
            mapped: block.mapped.map(|ptr| ptr.offset(offset)),
        })
    }

    /// Return an allocation; its block is released when it was the last one
    pub fn free(&self, allocation: MemoryAllocation) {
        let mut state = self.state();
        let Some(block) = state.blocks.get_mut(&allocation.block_id) else {
            log::error!("[ALLOC] free of allocation in unknown block {}", allocation.block_id);
            return;
        };
        if block.live.remove(&allocation.offset).is_none() {
            log::error!("[ALLOC] double free at block {} offset {}", allocation.block_id, allocation.offset);
            return;
        }
        block.free.release(allocation.offset, allocation.size);

        if block.live.is_empty() {
            if let Some(block) = state.blocks.remove(&allocation.block_id) {
                self.release_block(&mut state, allocation.block_id, &block);
            }
        }
    }

    fn release_block(&self, state: &mut AllocatorState, block_id: u64, block: &MemoryBlock) {
        if block.mapped.is_some() {
            self.backend.unmap_memory(block.memory);
        }
        self.backend.free_memory(block.memory);
        if let Some(usage) = state.heap_usage.get_mut(block.heap_index) {
            *usage = usage.saturating_sub(block.size);
        }
        log::debug!("[ALLOC] released block {} ({} bytes)", block_id, block.size);
    }

    /// Copy `data` into a host-visible allocation at `offset`, flushing when non-coherent
    pub fn write(&self, allocation: &MemoryAllocation, offset: u64, data: &[u8]) -> VulkanResult<()> {
        let ptr = self.host_range(allocation, offset, data.len() as u64)?;
        // SAFETY: range checked by host_range; the caller guarantees the GPU is not using it
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) };
        if !allocation.property_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            let (start, len) = self.atom_range(allocation, offset, data.len() as u64);
            self.backend.flush_memory(allocation.memory, start, len)?;
        }
        Ok(())
    }

    /// Copy `len` bytes out of a host-visible allocation, invalidating first when non-coherent
    pub fn read(&self, allocation: &MemoryAllocation, offset: u64, len: u64) -> VulkanResult<Vec<u8>> {
        let ptr = self.host_range(allocation, offset, len)?;
        if !allocation.property_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            let (start, atom_len) = self.atom_range(allocation, offset, len);
            self.backend.invalidate_memory(allocation.memory, start, atom_len)?;
        }
        // SAFETY: range checked by host_range
        Ok(unsafe { std::slice::from_raw_parts(ptr, len as usize) }.to_vec())
    }

    fn host_range(&self, allocation: &MemoryAllocation, offset: u64, len: u64) -> VulkanResult<*mut u8> {
        let mapped = allocation
            .mapped
            .ok_or_else(|| VulkanError::invalid("allocation is not host visible"))?;
        if offset + len > allocation.size {
            return Err(VulkanError::SizeMismatch { requested: offset + len, capacity: allocation.size });
        }
        Ok(mapped.offset(offset).as_ptr())
    }

    /// Block-relative range covering `offset..offset+len`, widened to `nonCoherentAtomSize`
    fn atom_range(&self, allocation: &MemoryAllocation, offset: u64, len: u64) -> (u64, u64) {
        let atom = self.limits.non_coherent_atom_size;
        let start = align_down(allocation.offset + offset, atom);
        let end = align_up(allocation.offset + offset + len, atom).min(allocation.block_size);
        (start, end - start)
    }

    /// Allocator-wide counters
    pub fn stats(&self) -> MemoryStats {
        let state = self.state();
        let mut stats = MemoryStats::default();
        for block in state.blocks.values() {
            stats.blocks += 1;
            stats.dedicated_blocks += usize::from(block.dedicated);
            stats.allocations += block.live.len();
            stats.bytes_reserved += block.size;
            stats.bytes_in_use += block.live.values().map(|a| a.size).sum::<u64>();
        }
        stats
    }

    /// Every live allocation with its debug name, ordered by block and offset
    pub fn report(&self) -> Vec<AllocationReport> {
        let state = self.state();
        let mut report: Vec<AllocationReport> = state
            .blocks
            .iter()
            .flat_map(|(&block_id, block)| {
                block.live.iter().map(move |(&offset, live)| AllocationReport {
                    name: live.name.clone(),
                    memory_type_index: block.memory_type_index,
                    block_id,
                    offset,
                    size: live.size,
                })
            })
            .collect();
        report.sort_by_key(|entry| (entry.block_id, entry.offset));
        report
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        let leaked = self.report();
        for entry in &leaked {
            log::warn!("[ALLOC] leaked allocation '{}' ({} bytes)", entry.name, entry.size);
        }
        let mut state = self.state();
        let blocks: Vec<(u64, MemoryBlock)> = state.blocks.drain().collect();
        for (block_id, block) in &blocks {
            self.release_block(&mut state, *block_id, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::headless::{HeadlessBackend, HeadlessConfig};

    fn allocator(config: HeadlessConfig, block_size: u64) -> (Arc<HeadlessBackend>, MemoryAllocator) {
        let backend = Arc::new(HeadlessBackend::new(config));
        let allocator = MemoryAllocator::new(backend.clone(), block_size, true);
        (backend, allocator)
    }

    fn requirements(size: u64, alignment: u64) -> vk::MemoryRequirements {
        vk::MemoryRequirements { size, alignment, memory_type_bits: 0b111 }
    }

    #[test]
    fn test_small_allocations_share_a_block() {
        let (backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let a = allocator.allocate(requirements(100, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "a").unwrap();
        let b = allocator.allocate(requirements(100, 256), vk::MemoryPropertyFlags::DEVICE_LOCAL, "b").unwrap();

        assert_eq!(a.memory(), b.memory());
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset() % 256, 0);
        assert_eq!(backend.stats().memory_objects, 1);
        assert_eq!(allocator.stats().allocations, 2);

        allocator.free(a);
        assert_eq!(backend.stats().memory_objects, 1);
        allocator.free(b);
        assert_eq!(backend.stats().memory_objects, 0);
        assert_eq!(allocator.stats(), MemoryStats::default());
    }

    #[test]
    fn test_large_request_gets_dedicated_block() {
        let (_backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let big = allocator.allocate(requirements(3000, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "big").unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.dedicated_blocks, 1);
        assert_eq!(stats.bytes_reserved, 3000);
        allocator.free(big);
    }

    #[test]
    fn test_host_visible_allocation_is_mapped_and_writable() {
        let (_backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let alloc = allocator.allocate(requirements(64, 16), vk::MemoryPropertyFlags::HOST_VISIBLE, "staging").unwrap();
        assert!(alloc.is_host_visible());
        assert_eq!(alloc.memory_type_index(), 1);

        allocator.write(&alloc, 8, &[1, 2, 3, 4]).unwrap();
        assert_eq!(allocator.read(&alloc, 8, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(allocator.write(&alloc, 62, &[0; 4]), Err(VulkanError::SizeMismatch { .. })));
        allocator.free(alloc);
    }

    #[test]
    fn test_type_filter_is_respected() {
        let (_backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let reqs = vk::MemoryRequirements { size: 64, alignment: 4, memory_type_bits: 0b100 };
        let alloc = allocator.allocate(reqs, vk::MemoryPropertyFlags::DEVICE_LOCAL, "bar").unwrap();
        assert_eq!(alloc.memory_type_index(), 2);
        allocator.free(alloc);
    }

    #[test]
    fn test_out_of_device_memory_propagates() {
        let (_backend, allocator) = allocator(HeadlessConfig::with_heap_sizes(8192, 8192, 0), 4096);
        let first = allocator.allocate(requirements(8192, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "fill").unwrap();
        let err = allocator
            .allocate(requirements(16, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "overflow")
            .unwrap_err();
        assert!(matches!(err, VulkanError::OutOfDeviceMemory { requested: 16, .. }));

        allocator.free(first);
        assert!(allocator.allocate(requirements(16, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "after").is_ok());
    }

    #[test]
    fn test_no_matching_type_is_out_of_memory() {
        let (_backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let err = allocator
            .allocate(requirements(16, 16), vk::MemoryPropertyFlags::LAZILY_ALLOCATED, "lazy")
            .unwrap_err();
        assert!(matches!(err, VulkanError::OutOfDeviceMemory { .. }));
    }

    #[test]
    fn test_report_lists_debug_names() {
        let (backend, allocator) = allocator(HeadlessConfig::default(), 4096);
        let a = allocator.allocate(requirements(32, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "vertices").unwrap();
        let b = allocator.allocate(requirements(32, 16), vk::MemoryPropertyFlags::DEVICE_LOCAL, "indices").unwrap();

        let names: Vec<String> = allocator.report().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["vertices".to_string(), "indices".to_string()]);
        assert!(backend.debug_name(a.memory().as_raw()).is_some_and(|n| n.contains("shared")));

        allocator.free(a);
        allocator.free(b);
    }
}
