//! Fixed-capacity storage for region descriptors.
//!
//! Every region of the arena, free or allocated, is described by a [`Node`].
//! Nodes live in a single boxed slice allocated at construction time and refer
//! to each other by [`NodeIndex`] instead of pointers. Unused slots are kept on
//! a LIFO stack so that acquiring and releasing a slot never touches the heap.

use alloc::{boxed::Box, vec::Vec};
use core::ops::{Index, IndexMut};

/// Index of a node slot inside a [`NodePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
#[display("#{_0}")]
pub(crate) struct NodeIndex(u32);

impl NodeIndex {
    pub(crate) const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn get(self) -> u32 {
        self.0
    }
}

/// Descriptor of one contiguous region of the arena.
///
/// Two intrusive lists run through the nodes:
///
/// - the *bin list* links free nodes sharing a size class (meaningless while
///   the node is used), and
/// - the *neighbor list* links each node to the regions physically before and
///   after it, regardless of whether they are free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Node {
    pub(crate) data_offset: u32,
    pub(crate) data_size: u32,
    pub(crate) bin_list_prev: Option<NodeIndex>,
    pub(crate) bin_list_next: Option<NodeIndex>,
    pub(crate) neighbor_prev: Option<NodeIndex>,
    pub(crate) neighbor_next: Option<NodeIndex>,
    pub(crate) used: bool,
}

impl Node {
    const UNUSED: Self = Self {
        data_offset: 0,
        data_size: 0,
        bin_list_prev: None,
        bin_list_next: None,
        neighbor_prev: None,
        neighbor_next: None,
        used: false,
    };

    /// Creates a free, unlinked node for `size` bytes at `offset`.
    pub(crate) const fn new_free(offset: u32, size: u32) -> Self {
        Self {
            data_offset: offset,
            data_size: size,
            ..Self::UNUSED
        }
    }

    /// Returns the end offset of the region (exclusive).
    #[cfg(test)]
    pub(crate) const fn data_end(&self) -> u32 {
        self.data_offset + self.data_size
    }
}

/// Node storage plus a stack of the slots that are not in use.
///
/// The stack is seeded in reverse order so that slot 0 is handed out first.
#[derive(Debug, Clone)]
pub(crate) struct NodePool {
    nodes: Box<[Node]>,
    free_nodes: Box<[NodeIndex]>,
    free_count: u32,
}

impl NodePool {
    /// Allocates storage for `capacity` nodes, all of them unused.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "node pool capacity must not be zero");
        let nodes = alloc::vec![Node::UNUSED; capacity as usize].into_boxed_slice();
        let free_nodes = (0..capacity)
            .rev()
            .map(NodeIndex::new)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            nodes,
            free_nodes,
            free_count: capacity,
        }
    }

    /// Marks every slot as unused again.
    pub(crate) fn reset(&mut self) {
        let capacity = self.capacity();
        self.nodes.fill(Node::UNUSED);
        for (slot, index) in self.free_nodes.iter_mut().zip((0..capacity).rev()) {
            *slot = NodeIndex::new(index);
        }
        self.free_count = capacity;
    }

    /// Returns the total number of slots.
    pub(crate) fn capacity(&self) -> u32 {
        // `new` takes the capacity as `u32`
        #[expect(clippy::cast_possible_truncation)]
        let capacity = self.nodes.len() as u32;
        capacity
    }

    /// Returns the number of slots that can still be acquired.
    #[cfg(test)]
    pub(crate) fn available(&self) -> u32 {
        self.free_count
    }

    /// Returns `true` if every slot is in use.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.free_count == 0
    }

    /// Pops an unused slot off the stack and stores `node` in it.
    ///
    /// # Panics
    ///
    /// Panics if the pool is exhausted.
    pub(crate) fn acquire(&mut self, node: Node) -> NodeIndex {
        assert!(!self.is_exhausted(), "node pool is exhausted");
        self.free_count -= 1;
        let index = self.free_nodes[self.free_count as usize];
        self[index] = node;
        index
    }

    /// Pushes `index` back onto the stack of unused slots.
    ///
    /// The slot keeps its stale contents until it is acquired again.
    pub(crate) fn release(&mut self, index: NodeIndex) {
        debug_assert!(self.free_count < self.capacity(), "node pool overflow");
        self.free_nodes[self.free_count as usize] = index;
        self.free_count += 1;
    }

    /// Returns the node at `index` if the index lies inside the pool.
    pub(crate) fn get(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.get() as usize)
    }

    /// Returns the slots currently on the stack of unused slots.
    #[cfg(test)]
    pub(crate) fn unused_slots(&self) -> &[NodeIndex] {
        &self.free_nodes[..self.free_count as usize]
    }
}

impl Index<NodeIndex> for NodePool {
    type Output = Node;

    fn index(&self, index: NodeIndex) -> &Self::Output {
        &self.nodes[index.get() as usize]
    }
}

impl IndexMut<NodeIndex> for NodePool {
    fn index_mut(&mut self, index: NodeIndex) -> &mut Self::Output {
        &mut self.nodes[index.get() as usize]
    }
}
