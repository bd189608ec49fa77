//! Two-level segregated-fit offset allocator.
//!
//! # Algorithm
//!
//! - **Allocation**: the request is rounded up to a size class, the bitmap of
//!   [`BinIndex`] locates the smallest non-empty class that can hold it, and
//!   the head of that class's free list is taken. The tail of the region that
//!   the request does not need is split off into a new free node.
//! - **Deallocation**: the freed node absorbs its physical neighbors when they
//!   are free, and the combined region is filed under its rounded-down class.
//!
//! Both operations run in constant time and never allocate.

use snafu::Snafu;
use snafu_utils::Location;

use crate::{
    bin_index::BinIndex,
    node_pool::{Node, NodeIndex, NodePool},
    report::{FreeRegions, Region, StorageReport, StorageReportFull},
    small_float::{
        checked_float_to_uint, float_to_uint, uint_to_float_round_down, uint_to_float_round_up,
    },
};

/// Sentinel stored in both fields of [`Allocation::NO_SPACE`].
pub const NO_SPACE: u32 = u32::MAX;

/// Errors returned by [`OffsetAllocator::allocate`].
///
/// Both errors are recoverable: the allocator is left exactly as it was before
/// the failed call.
#[derive(Debug, Snafu, derive_more::IsVariant)]
#[snafu(module)]
pub enum AllocError {
    /// Every node slot is in use, so no further region can be described.
    #[snafu(display(
        "no node slot left to allocate {requested} bytes, max allocations: {capacity}"
    ))]
    NodePoolExhausted {
        requested: u32,
        capacity: u32,
        #[snafu(implicit)]
        location: Location,
    },
    /// No free region is large enough.
    #[snafu(display("no free region can hold {requested} bytes, free space: {free_space}"))]
    OutOfSpace {
        requested: u32,
        free_space: u32,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Handle of a live allocation.
///
/// `offset` locates the allocation inside the arena. `metadata` identifies the
/// node backing it and must be handed back unchanged to
/// [`OffsetAllocator::free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pub offset: u32,
    pub metadata: u32,
}

impl Default for Allocation {
    fn default() -> Self {
        Self::NO_SPACE
    }
}

impl Allocation {
    /// Placeholder for "no allocation".
    pub const NO_SPACE: Self = Self {
        offset: NO_SPACE,
        metadata: NO_SPACE,
    };

    /// Returns `true` if this is the [`NO_SPACE`](Self::NO_SPACE) placeholder.
    #[must_use]
    pub const fn is_no_space(&self) -> bool {
        self.metadata == NO_SPACE
    }
}

/// Allocator of offsets inside a linear range of `size` bytes.
///
/// The allocator only does the bookkeeping; it never touches the memory the
/// offsets refer to. At most `max_allocs` regions (allocated and free together)
/// can exist at the same time.
///
/// # Thread Safety
///
/// The allocator is `Send` and `Sync` but every mutating operation takes
/// `&mut self`. Sharing it between threads requires external synchronization.
#[derive(Debug, Clone)]
pub struct OffsetAllocator {
    size: u32,
    free_storage: u32,
    bins: BinIndex,
    nodes: NodePool,
    first_region: Option<NodeIndex>,
}

impl OffsetAllocator {
    /// Creates an allocator for `size` bytes with room for `max_allocs`
    /// regions.
    ///
    /// The node storage is allocated here, once. The whole range starts out as
    /// a single free region, which occupies one of the `max_allocs` slots.
    ///
    /// # Panics
    ///
    /// Panics if `max_allocs` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// # use offset_allocator::OffsetAllocator;
    /// let allocator = OffsetAllocator::new(1024, 16);
    /// assert_eq!(allocator.storage_report().total_free_space, 1024);
    /// ```
    #[must_use]
    pub fn new(size: u32, max_allocs: u32) -> Self {
        let mut allocator = Self {
            size,
            free_storage: 0,
            bins: BinIndex::new(),
            nodes: NodePool::new(max_allocs),
            first_region: None,
        };
        allocator.reset();
        allocator
    }

    /// Frees every allocation at once.
    ///
    /// Handles obtained before the reset must not be used afterwards.
    pub fn reset(&mut self) {
        self.free_storage = 0;
        self.bins.clear();
        self.nodes.reset();
        self.first_region = Some(self.insert_node_into_bin(self.size, 0));

        #[cfg(feature = "tracing")]
        tracing::trace!(
            size = self.size,
            max_allocs = self.nodes.capacity(),
            "reset offset allocator"
        );
    }

    /// Returns the length of the managed range in bytes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the maximum number of regions.
    #[must_use]
    pub fn max_allocs(&self) -> u32 {
        self.nodes.capacity()
    }

    /// Allocates `size` bytes.
    ///
    /// The smallest sufficient size class inside the top-level bin of the
    /// request is preferred; failing that, the lowest class of the next
    /// non-empty top-level bin is used. Callers that need aligned offsets must
    /// round `size` up to their alignment before calling.
    ///
    /// # Errors
    ///
    /// - [`AllocError::NodePoolExhausted`] if no node slot is left.
    /// - [`AllocError::OutOfSpace`] if no free region is large enough, even if
    ///   the total free space would be.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// # use offset_allocator::OffsetAllocator;
    /// let mut allocator = OffsetAllocator::new(64, 4);
    /// let a = allocator.allocate(32).unwrap();
    /// let b = allocator.allocate(32).unwrap();
    /// assert_eq!((a.offset, b.offset), (0, 32));
    /// assert!(allocator.allocate(32).unwrap_err().is_out_of_space());
    /// ```
    #[track_caller]
    pub fn allocate(&mut self, size: u32) -> Result<Allocation, AllocError> {
        assert!(size > 0, "allocation size must not be zero");

        if self.nodes.is_exhausted() {
            #[cfg(feature = "tracing")]
            tracing::debug!(size, "allocation failed, node pool exhausted");
            return alloc_error::NodePoolExhaustedSnafu {
                requested: size,
                capacity: self.nodes.capacity(),
            }
            .fail();
        }

        let min_class = uint_to_float_round_up(size);
        let found = self
            .bins
            .find_bin(min_class)
            .and_then(|class| Some((class, self.bins.head(class)?)));
        let Some((class, index)) = found else {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                size,
                free_space = self.free_storage,
                "allocation failed, out of space"
            );
            return alloc_error::OutOfSpaceSnafu {
                requested: size,
                free_space: self.free_storage,
            }
            .fail();
        };

        // Pop the head of the bin.
        let node = &mut self.nodes[index];
        let total_size = node.data_size;
        let next_in_bin = node.bin_list_next;
        let offset = node.data_offset;
        let neighbor_next = node.neighbor_next;
        node.data_size = size;
        node.used = true;
        node.bin_list_prev = None;
        node.bin_list_next = None;

        self.bins.set_head(class, next_in_bin);
        if let Some(next) = next_in_bin {
            self.nodes[next].bin_list_prev = None;
        }
        self.free_storage -= total_size;

        // Push the unused tail back as a new free node right after this one.
        let remainder = total_size - size;
        if remainder > 0 {
            let split = self.insert_node_into_bin(remainder, offset + size);
            if let Some(next) = neighbor_next {
                self.nodes[next].neighbor_prev = Some(split);
            }
            self.nodes[split].neighbor_prev = Some(index);
            self.nodes[split].neighbor_next = neighbor_next;
            self.nodes[index].neighbor_next = Some(split);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(size, offset, class, remainder, node = %index, "allocated");

        Ok(Allocation {
            offset,
            metadata: index.get(),
        })
    }

    /// Frees an allocation, merging it with free physical neighbors.
    ///
    /// # Panics
    ///
    /// Panics if `allocation` was not returned by this allocator, was already
    /// freed, or is [`Allocation::NO_SPACE`].
    #[track_caller]
    pub fn free(&mut self, allocation: Allocation) {
        assert!(
            !allocation.is_no_space(),
            "attempted to free a NO_SPACE allocation"
        );
        let index = NodeIndex::new(allocation.metadata);
        let Some(&node) = self.nodes.get(index) else {
            panic!("allocation {allocation:?} does not belong to this allocator");
        };
        assert!(node.used, "double free of allocation {allocation:?}");
        assert_eq!(
            node.data_offset, allocation.offset,
            "stale allocation {allocation:?}"
        );

        let mut offset = node.data_offset;
        let mut size = node.data_size;
        let mut neighbor_prev = node.neighbor_prev;
        let mut neighbor_next = node.neighbor_next;

        if let Some(prev) = neighbor_prev.filter(|&prev| !self.nodes[prev].used) {
            let prev_node = self.nodes[prev];
            debug_assert_eq!(prev_node.neighbor_next, Some(index));
            offset = prev_node.data_offset;
            size += prev_node.data_size;
            self.remove_node_from_bin(prev);
            neighbor_prev = prev_node.neighbor_prev;
        }

        if let Some(next) = neighbor_next.filter(|&next| !self.nodes[next].used) {
            let next_node = self.nodes[next];
            debug_assert_eq!(next_node.neighbor_prev, Some(index));
            size += next_node.data_size;
            self.remove_node_from_bin(next);
            neighbor_next = next_node.neighbor_next;
        }

        self.nodes.release(index);

        // The stack is LIFO, so the combined node reuses the slot just released.
        let combined = self.insert_node_into_bin(size, offset);
        self.nodes[combined].neighbor_prev = neighbor_prev;
        self.nodes[combined].neighbor_next = neighbor_next;
        if let Some(next) = neighbor_next {
            self.nodes[next].neighbor_prev = Some(combined);
        }
        match neighbor_prev {
            Some(prev) => self.nodes[prev].neighbor_next = Some(combined),
            None => self.first_region = Some(combined),
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            offset = allocation.offset,
            freed = node.data_size,
            merged_offset = offset,
            merged_size = size,
            node = %combined,
            "freed"
        );
    }

    /// Returns the size of an allocation, or `0` for
    /// [`Allocation::NO_SPACE`].
    #[must_use]
    pub fn allocation_size(&self, allocation: Allocation) -> u32 {
        if allocation.is_no_space() {
            return 0;
        }
        self.nodes
            .get(NodeIndex::new(allocation.metadata))
            .map_or(0, |node| node.data_size)
    }

    /// Returns the free space and a conservative estimate of the largest free
    /// region.
    ///
    /// # Examples
    ///
    /// ```
    /// # use offset_allocator::OffsetAllocator;
    /// let mut allocator = OffsetAllocator::new(1024, 8);
    /// let _ = allocator.allocate(100).unwrap();
    /// let _ = allocator.allocate(50).unwrap();
    ///
    /// let report = allocator.storage_report();
    /// assert_eq!(report.total_free_space, 1024 - 150);
    /// assert!(report.largest_free_region <= 1024 - 150);
    /// ```
    #[must_use]
    pub fn storage_report(&self) -> StorageReport {
        StorageReport {
            total_free_space: self.free_storage,
            largest_free_region: self.bins.highest_used().map_or(0, float_to_uint),
        }
    }

    /// Returns the number of free regions in every size class.
    #[must_use]
    pub fn storage_report_full(&self) -> StorageReportFull {
        let mut report = StorageReportFull::default();
        for (class, entry) in (0_u32..).zip(&mut report.free_regions) {
            let mut count = 0;
            let mut cursor = self.bins.head(class);
            while let Some(index) = cursor {
                count += 1;
                cursor = self.nodes[index].bin_list_next;
            }
            *entry = FreeRegions {
                size: checked_float_to_uint(class).unwrap_or(u32::MAX),
                count,
            };
        }
        report
    }

    /// Iterates over every region of the arena in address order.
    ///
    /// # Examples
    ///
    /// ```
    /// # use offset_allocator::{OffsetAllocator, Region};
    /// let mut allocator = OffsetAllocator::new(100, 4);
    /// let _ = allocator.allocate(40).unwrap();
    /// let regions: Vec<_> = allocator.regions().collect();
    /// assert_eq!(
    ///     regions,
    ///     [
    ///         Region { offset: 0, size: 40, used: true },
    ///         Region { offset: 40, size: 60, used: false },
    ///     ]
    /// );
    /// ```
    pub fn regions(&self) -> Regions<'_> {
        Regions {
            nodes: &self.nodes,
            next: self.first_region,
        }
    }

    /// Takes a node slot and files a free region of `size` bytes at `offset`
    /// under its rounded-down class.
    fn insert_node_into_bin(&mut self, size: u32, offset: u32) -> NodeIndex {
        // Round down so that every region in a bin is at least the bin size.
        let class = uint_to_float_round_down(size);
        let head = self.bins.head(class);
        let index = self.nodes.acquire(Node {
            bin_list_next: head,
            ..Node::new_free(offset, size)
        });
        if let Some(head) = head {
            self.nodes[head].bin_list_prev = Some(index);
        }
        self.bins.set_head(class, Some(index));
        self.free_storage += size;
        index
    }

    /// Unlinks a free node from its bin and returns its slot to the pool.
    fn remove_node_from_bin(&mut self, index: NodeIndex) {
        let node = self.nodes[index];
        debug_assert!(!node.used);

        if let Some(prev) = node.bin_list_prev {
            self.nodes[prev].bin_list_next = node.bin_list_next;
            if let Some(next) = node.bin_list_next {
                self.nodes[next].bin_list_prev = Some(prev);
            }
        } else {
            // Head of its bin: the bin has to be recomputed from the size.
            let class = uint_to_float_round_down(node.data_size);
            debug_assert_eq!(self.bins.head(class), Some(index));
            self.bins.set_head(class, node.bin_list_next);
            if let Some(next) = node.bin_list_next {
                self.nodes[next].bin_list_prev = None;
            }
        }

        self.nodes.release(index);
        self.free_storage -= node.data_size;
    }
}

/// Iterator over the regions of an [`OffsetAllocator`] in address order.
///
/// Created by [`OffsetAllocator::regions`].
#[derive(Debug, Clone)]
pub struct Regions<'a> {
    nodes: &'a NodePool,
    next: Option<NodeIndex>,
}

impl Iterator for Regions<'_> {
    type Item = Region;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.nodes[self.next?];
        self.next = node.neighbor_next;
        Some(Region {
            offset: node.data_offset,
            size: node.data_size,
            used: node.used,
        })
    }
}

#[cfg(test)]
impl OffsetAllocator {
    /// Verifies every structural invariant of the allocator.
    pub(crate) fn check_invariants(&self) {
        use std::collections::BTreeSet;

        use crate::bin_index::NUM_LEAF_BINS;

        self.bins.check_consistency();

        // The neighbor list partitions [0, size) and is doubly linked.
        let mut live = BTreeSet::new();
        let mut expected_offset = 0;
        let mut prev = None;
        let mut cursor = self.first_region;
        let mut free_bytes = 0;
        let mut free_nodes = BTreeSet::new();
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            assert!(live.insert(index), "cycle in neighbor list at {index}");
            assert_eq!(node.neighbor_prev, prev, "neighbor_prev of {index}");
            assert_eq!(node.data_offset, expected_offset, "gap before {index}");
            expected_offset = node.data_end();
            if !node.used {
                free_bytes += node.data_size;
                free_nodes.insert(index);
            }
            prev = Some(index);
            cursor = node.neighbor_next;
        }
        assert_eq!(expected_offset, self.size, "regions do not cover the arena");
        assert_eq!(free_bytes, self.free_storage, "free storage accounting");

        // Every free node is in the bin of its rounded-down size, and only free
        // nodes are in bins.
        let mut binned = BTreeSet::new();
        for class in (0_u32..).take(NUM_LEAF_BINS) {
            let mut prev = None;
            let mut cursor = self.bins.head(class);
            while let Some(index) = cursor {
                let node = &self.nodes[index];
                assert!(!node.used, "used node {index} in bin {class}");
                assert_eq!(node.bin_list_prev, prev, "bin_list_prev of {index}");
                assert_eq!(uint_to_float_round_down(node.data_size), class);
                assert!(binned.insert(index), "node {index} binned twice");
                prev = Some(index);
                cursor = node.bin_list_next;
            }
        }
        assert_eq!(binned, free_nodes, "binned nodes differ from free regions");

        // Slots are either live or on the unused stack, never both.
        let unused = self.nodes.unused_slots().iter().copied().collect::<Vec<_>>();
        assert_eq!(
            unused.len() + live.len(),
            self.nodes.capacity() as usize,
            "slot accounting"
        );
        for index in unused {
            assert!(!live.contains(&index), "live node {index} on unused stack");
        }
    }
}
