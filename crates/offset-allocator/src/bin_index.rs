//! Two-level bitmap over the free-list bins.
//!
//! Each size class owns the head of an intrusive list of free nodes. Scanning
//! 256 heads for the first non-empty one would be too slow for a per-frame hot
//! path, so a two-level bitmap caches which lists are non-empty:
//!
//! ```text
//! used_bins_top:  bit t      set iff used_bins[t] != 0
//! used_bins[t]:   bit l      set iff heads[t << 3 | l] is Some
//! ```
//!
//! Finding the smallest non-empty class at or above a requested one then takes
//! at most two bit scans.

use crate::node_pool::NodeIndex;

/// Number of top-level bins (one per exponent).
pub const NUM_TOP_BINS: usize = 32;
/// Number of leaf bins inside each top-level bin.
pub const BINS_PER_LEAF: usize = 8;
/// Total number of size classes.
pub const NUM_LEAF_BINS: usize = NUM_TOP_BINS * BINS_PER_LEAF;

const TOP_BINS_INDEX_SHIFT: u32 = 3;
const LEAF_BINS_INDEX_MASK: u32 = 0x7;

const _: () = assert!(BINS_PER_LEAF == 1 << TOP_BINS_INDEX_SHIFT);
const _: () = assert!(NUM_TOP_BINS == u32::BITS as usize);
const _: () = assert!(BINS_PER_LEAF == u8::BITS as usize);

/// Splits a class index into its `(top, leaf)` bin pair.
fn split(class: u32) -> (u32, u32) {
    (class >> TOP_BINS_INDEX_SHIFT, class & LEAF_BINS_INDEX_MASK)
}

fn join(top: u32, leaf: u32) -> u32 {
    (top << TOP_BINS_INDEX_SHIFT) | leaf
}

/// Returns the index of the lowest set bit of `mask` at or above `start`.
fn find_lowest_set_bit_after(mask: u32, start: u32) -> Option<u32> {
    // `start` may be 32 when searching past the last top bin.
    let bits_after = mask & u32::MAX.checked_shl(start).unwrap_or(0);
    (bits_after != 0).then(|| bits_after.trailing_zeros())
}

/// Free-list heads of every size class together with the bitmap that tracks
/// which of them are non-empty.
///
/// Heads are only modified through [`BinIndex::set_head`], which keeps the
/// bitmap in sync with the heads in the same call.
#[derive(Debug, Clone)]
pub(crate) struct BinIndex {
    used_bins_top: u32,
    used_bins: [u8; NUM_TOP_BINS],
    heads: [Option<NodeIndex>; NUM_LEAF_BINS],
}

impl BinIndex {
    pub(crate) const fn new() -> Self {
        Self {
            used_bins_top: 0,
            used_bins: [0; NUM_TOP_BINS],
            heads: [None; NUM_LEAF_BINS],
        }
    }

    /// Empties every bin.
    pub(crate) fn clear(&mut self) {
        *self = Self::new();
    }

    pub(crate) fn head(&self, class: u32) -> Option<NodeIndex> {
        self.heads[class as usize]
    }

    /// Replaces the head of the list of `class` and updates the bitmap.
    ///
    /// Setting a head on an empty bin marks the bin as used; clearing the head
    /// marks it as unused, together with its top bin once all of its leaves
    /// are empty.
    pub(crate) fn set_head(&mut self, class: u32, head: Option<NodeIndex>) {
        let (top, leaf) = split(class);
        let slot = &mut self.heads[class as usize];
        match (*slot, head) {
            (None, Some(_)) => {
                self.used_bins[top as usize] |= 1 << leaf;
                self.used_bins_top |= 1 << top;
            }
            (Some(_), None) => {
                self.used_bins[top as usize] &= !(1 << leaf);
                if self.used_bins[top as usize] == 0 {
                    self.used_bins_top &= !(1 << top);
                }
            }
            _ => {}
        }
        *slot = head;
    }

    /// Finds the smallest non-empty class able to satisfy `min_class`.
    ///
    /// Inside the top bin of `min_class` the smallest sufficient leaf wins.
    /// Otherwise the lowest non-empty leaf of the next non-empty top bin is
    /// returned: every class there is larger than `min_class`.
    pub(crate) fn find_bin(&self, min_class: u32) -> Option<u32> {
        let (min_top, min_leaf) = split(min_class);

        if self.used_bins_top & (1 << min_top) != 0 {
            let leaves = u32::from(self.used_bins[min_top as usize]);
            if let Some(leaf) = find_lowest_set_bit_after(leaves, min_leaf) {
                return Some(join(min_top, leaf));
            }
        }

        let top = find_lowest_set_bit_after(self.used_bins_top, min_top + 1)?;
        let leaves = self.used_bins[top as usize];
        debug_assert_ne!(leaves, 0, "top bin {top} is marked used without leaves");
        Some(join(top, leaves.trailing_zeros()))
    }

    /// Returns the largest non-empty class.
    pub(crate) fn highest_used(&self) -> Option<u32> {
        if self.used_bins_top == 0 {
            return None;
        }
        let top = u32::BITS - 1 - self.used_bins_top.leading_zeros();
        let leaves = self.used_bins[top as usize];
        debug_assert_ne!(leaves, 0, "top bin {top} is marked used without leaves");
        let leaf = u8::BITS - 1 - leaves.leading_zeros();
        Some(join(top, leaf))
    }

    /// Checks that the bitmap mirrors the heads exactly.
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) {
        for top in 0..NUM_TOP_BINS {
            let mut leaves = 0_u8;
            for leaf in 0..BINS_PER_LEAF {
                if self.heads[top * BINS_PER_LEAF + leaf].is_some() {
                    leaves |= 1 << leaf;
                }
            }
            assert_eq!(self.used_bins[top], leaves, "leaf bits of top bin {top}");
            assert_eq!(
                self.used_bins_top & (1 << top) != 0,
                leaves != 0,
                "top bit {top}"
            );
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn index(i: u32) -> Option<NodeIndex> {
        Some(NodeIndex::new(i))
    }

    #[test]
    fn test_find_lowest_set_bit_after() {
        assert_eq!(find_lowest_set_bit_after(0b1010, 0), Some(1));
        assert_eq!(find_lowest_set_bit_after(0b1010, 2), Some(3));
        assert_eq!(find_lowest_set_bit_after(0b1010, 4), None);
        assert_eq!(find_lowest_set_bit_after(u32::MAX, 31), Some(31));
        assert_eq!(find_lowest_set_bit_after(u32::MAX, 32), None);
        assert_eq!(find_lowest_set_bit_after(0, 0), None);
    }

    #[test]
    fn test_empty_index() {
        let bins = BinIndex::new();
        assert_eq!(bins.highest_used(), None);
        assert_eq!(bins.find_bin(0), None);
        assert_eq!(bins.highest_used(), None);
        bins.check_consistency();
    }

    #[test]
    fn test_set_and_clear_heads() {
        let mut bins = BinIndex::new();
        bins.set_head(24, index(0));
        bins.set_head(26, index(1));
        bins.check_consistency();
        assert_eq!(bins.highest_used(), Some(26));

        // replacing a head keeps the bin marked
        bins.set_head(24, index(2));
        bins.check_consistency();
        assert_eq!(bins.head(24), index(2));

        bins.set_head(24, None);
        bins.check_consistency();
        assert_eq!(bins.find_bin(24), Some(26));

        bins.set_head(26, None);
        bins.check_consistency();
        assert_eq!(bins.highest_used(), None);
    }

    #[test]
    fn test_find_bin_prefers_same_top_bin() {
        let mut bins = BinIndex::new();
        bins.set_head(25, index(0));
        bins.set_head(27, index(1));
        bins.set_head(40, index(2));

        assert_eq!(bins.find_bin(24), Some(25));
        assert_eq!(bins.find_bin(26), Some(27));
        // nothing left in top bin 3 at or above leaf 4
        assert_eq!(bins.find_bin(28), Some(40));
        assert_eq!(bins.find_bin(41), None);
    }

    #[test]
    fn test_find_bin_takes_lowest_leaf_of_larger_top_bin() {
        let mut bins = BinIndex::new();
        bins.set_head(45, index(0));
        bins.set_head(42, index(1));
        assert_eq!(bins.find_bin(3), Some(42));
    }

    #[test]
    fn test_highest_used() {
        let mut bins = BinIndex::new();
        bins.set_head(3, index(0));
        assert_eq!(bins.highest_used(), Some(3));
        bins.set_head(100, index(1));
        bins.set_head(97, index(2));
        assert_eq!(bins.highest_used(), Some(100));
        bins.set_head(100, None);
        assert_eq!(bins.highest_used(), Some(97));
    }

    #[test]
    fn test_clear() {
        let mut bins = BinIndex::new();
        bins.set_head(200, index(5));
        bins.clear();
        assert_eq!(bins.highest_used(), None);
        assert_eq!(bins.head(200), None);
        bins.check_consistency();
    }
}
