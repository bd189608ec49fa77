//! Free-space statistics returned by [`OffsetAllocator`](crate::OffsetAllocator).

use crate::bin_index::NUM_LEAF_BINS;

/// Summary of the free space of an allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageReport {
    /// Exact number of free bytes.
    pub total_free_space: u32,
    /// Canonical size of the largest non-empty size class.
    ///
    /// This is a lower bound of the largest free region: a free region is
    /// filed under the class rounded down from its size, so the region itself
    /// may be slightly larger.
    pub largest_free_region: u32,
}

/// Free regions of one size class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeRegions {
    /// Canonical size of the class.
    pub size: u32,
    /// Number of free regions filed under the class.
    pub count: u32,
}

/// Per-class breakdown of the free regions of an allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageReportFull {
    /// One entry per size class, indexed by class.
    pub free_regions: [FreeRegions; NUM_LEAF_BINS],
}

impl Default for StorageReportFull {
    fn default() -> Self {
        Self {
            free_regions: [FreeRegions::default(); NUM_LEAF_BINS],
        }
    }
}

impl StorageReportFull {
    /// Iterates over the classes that hold at least one free region.
    pub fn non_empty(&self) -> impl Iterator<Item = &FreeRegions> + '_ {
        self.free_regions.iter().filter(|regions| regions.count > 0)
    }

    /// Returns the total number of free regions.
    #[must_use]
    pub fn region_count(&self) -> u32 {
        self.free_regions.iter().map(|regions| regions.count).sum()
    }
}

/// A region of the arena, as seen while walking it in address order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Byte offset of the region.
    pub offset: u32,
    /// Length of the region in bytes.
    pub size: u32,
    /// `true` if the region backs a live allocation.
    pub used: bool,
}

impl Region {
    /// Returns the end offset of the region (exclusive).
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }
}
