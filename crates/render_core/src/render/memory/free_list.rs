//! First-fit free list over one memory block

/// A free byte range inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    /// Start offset
    pub offset: u64,
    /// Length in bytes
    pub size: u64,
}

/// Sorted, coalesced list of free ranges
#[derive(Debug, Clone)]
pub struct FreeList {
    ranges: Vec<FreeRange>,
    capacity: u64,
}

impl FreeList {
    /// A list covering `capacity` free bytes
    pub fn new(capacity: u64) -> Self {
        Self { ranges: vec![FreeRange { offset: 0, size: capacity }], capacity }
    }

    /// Carve `size` bytes at `alignment` from the first range that fits.
    ///
    /// Alignment padding stays in the list as its own free range.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let size = size.max(1);
        for i in 0..self.ranges.len() {
            let range = self.ranges[i];
            let aligned = super::align_up(range.offset, alignment);
            let padding = aligned - range.offset;
            if range.size < padding || range.size - padding < size {
                continue;
            }

            let tail = FreeRange { offset: aligned + size, size: range.size - padding - size };
            match (padding > 0, tail.size > 0) {
                (false, false) => {
                    self.ranges.remove(i);
                }
                (true, false) => self.ranges[i].size = padding,
                (false, true) => self.ranges[i] = tail,
                (true, true) => {
                    self.ranges[i].size = padding;
                    self.ranges.insert(i + 1, tail);
                }
            }
            return Some(aligned);
        }
        None
    }

    /// Return a range, merging it with adjacent free neighbours
    pub fn release(&mut self, offset: u64, size: u64) {
        let size = size.max(1);
        let index = self.ranges.partition_point(|r| r.offset < offset);
        debug_assert!(
            index == self.ranges.len() || offset + size <= self.ranges[index].offset,
            "released range overlaps a free range"
        );
        self.ranges.insert(index, FreeRange { offset, size });

        if index + 1 < self.ranges.len() && offset + size == self.ranges[index + 1].offset {
            self.ranges[index].size += self.ranges[index + 1].size;
            self.ranges.remove(index + 1);
        }
        if index > 0 {
            let prev = self.ranges[index - 1];
            if prev.offset + prev.size == offset {
                self.ranges[index - 1].size += self.ranges[index].size;
                self.ranges.remove(index);
            }
        }
    }

    /// Total free bytes
    pub fn free_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).sum()
    }

    /// Size of the largest free range
    pub fn largest_free(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).max().unwrap_or(0)
    }

    /// True when nothing is allocated
    pub fn is_fully_free(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].size == self.capacity
    }

    /// Current free ranges, sorted by offset
    pub fn ranges(&self) -> &[FreeRange] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_allocation_keeps_padding_free() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate(10, 1), Some(0));
        assert_eq!(list.allocate(16, 256), Some(256));
        assert_eq!(list.ranges(), &[FreeRange { offset: 10, size: 246 }, FreeRange { offset: 272, size: 752 }]);

        // Small request fits in the padding gap
        assert_eq!(list.allocate(8, 8), Some(16));
    }

    #[test]
    fn test_release_coalesces_neighbours() {
        let mut list = FreeList::new(300);
        let a = list.allocate(100, 1).unwrap();
        let b = list.allocate(100, 1).unwrap();
        let c = list.allocate(100, 1).unwrap();
        assert_eq!(list.free_bytes(), 0);
        assert_eq!(list.allocate(1, 1), None);

        list.release(a, 100);
        list.release(c, 100);
        assert_eq!(list.ranges().len(), 2);
        assert_eq!(list.largest_free(), 100);

        list.release(b, 100);
        assert!(list.is_fully_free());
        assert_eq!(list.largest_free(), 300);
    }

    #[test]
    fn test_exact_fit_removes_range() {
        let mut list = FreeList::new(64);
        assert_eq!(list.allocate(64, 64), Some(0));
        assert!(list.ranges().is_empty());
        list.release(0, 64);
        assert!(list.is_fully_free());
    }
}
