//! Fixed-capacity offset allocator.
//!
//! This crate partitions a single linear range of `size` bytes, such as the
//! byte range of a GPU buffer or a staging area, into non-overlapping regions
//! of variable size. The allocator never touches the memory itself: it hands
//! out offsets and leaves it to the caller to add them to a base address or a
//! buffer binding.
//!
//! # Algorithm
//!
//! The allocator is a two-level segregated-fit (TLSF) design:
//!
//! - **Size classes**: sizes are binned with a small floating point format (5
//!   exponent bits, 3 mantissa bits), giving 256 classes whose relative
//!   spacing stays around 1/8 (see [`small_float`]).
//! - **Free lists**: every class owns an intrusive doubly-linked list of free
//!   regions. A two-level bitmap (32 top bins of 8 leaf bins) locates the
//!   smallest non-empty class above a request with two bit scans.
//! - **Neighbor list**: every region, free or not, is linked to its physical
//!   neighbors so that a freed region merges with adjacent free regions in
//!   constant time.
//! - **Node pool**: region descriptors live in a fixed array sized at
//!   construction. `allocate` and `free` never touch the heap.
//!
//! # Usage Example
//!
//! ```rust
//! use offset_allocator::OffsetAllocator;
//!
//! // 64 MiB arena with room for 1024 regions
//! let mut allocator = OffsetAllocator::new(64 << 20, 1024);
//!
//! let vertices = allocator.allocate(3 << 20).unwrap();
//! let indices = allocator.allocate(1 << 20).unwrap();
//! assert_eq!(vertices.offset, 0);
//! assert_eq!(indices.offset, 3 << 20);
//!
//! allocator.free(vertices);
//! allocator.free(indices);
//!
//! let report = allocator.storage_report();
//! assert_eq!(report.total_free_space, 64 << 20);
//! assert_eq!(report.largest_free_region, 64 << 20);
//! ```
//!
//! # Failure Modes
//!
//! [`OffsetAllocator::allocate`] fails with an [`AllocError`] when either
//!
//! - every node slot is in use ([`AllocError::NodePoolExhausted`]), or
//! - no free region is large enough ([`AllocError::OutOfSpace`]).
//!
//! Both can happen while [`StorageReport::total_free_space`] is larger than
//! the request: fragmented free space is not compacted. A failed call leaves
//! the allocator untouched.
//!
//! Freeing an allocation twice or freeing a handle of another allocator is a
//! programming error and panics.
//!
//! # Performance Characteristics
//!
//! | Operation | Cost |
//! |-----------|------|
//! | `allocate` | O(1), at most two bit scans |
//! | `free` | O(1), merges at most two neighbors |
//! | `storage_report` | O(1) |
//! | `storage_report_full` | O(free regions) |
//! | Memory | 48 bytes per node slot plus ~2 KiB of bin heads |
//!
//! # Thread Safety
//!
//! The allocator has no interior synchronization. It is `Send` and `Sync`, but
//! allocation and deallocation need `&mut self`, so sharing it between threads
//! requires a lock.
//!
//! # Logging
//!
//! With the `tracing` feature enabled, allocations, frees and resets emit
//! `trace` events and failed allocations emit `debug` events.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

mod allocator;
mod bin_index;
mod node_pool;
mod report;
pub mod small_float;

pub use self::{
    allocator::{AllocError, Allocation, NO_SPACE, OffsetAllocator, Regions},
    bin_index::{BINS_PER_LEAF, NUM_LEAF_BINS, NUM_TOP_BINS},
    report::{FreeRegions, Region, StorageReport, StorageReportFull},
};
