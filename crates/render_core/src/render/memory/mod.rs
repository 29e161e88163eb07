//! Device memory sub-allocation

pub mod allocator;
pub mod free_list;

pub use allocator::{AllocationReport, MappedPtr, MemoryAllocation, MemoryAllocator, MemoryStats};
pub use free_list::{FreeList, FreeRange};

/// Round `value` up to a multiple of `alignment` (0 and 1 leave it unchanged)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Round `value` down to a multiple of `alignment`
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value - value % alignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(13, 1), 13);
        assert_eq!(align_down(300, 64), 256);
        assert_eq!(align_down(7, 0), 7);
    }
}
