//! Typed columns.
//!
//! Every column is a sequence backed by a [`BpTree`]: a single leaf while the
//! column is small, an inner root once the leaf splits. Erasing elements can
//! collapse the tree back into a leaf.
//!
//! ```text
//!            BpTree<L>
//!               |
//!      +--------+---------+
//!      |                  |
//!  Root::Leaf(L)    Root::Inner(Array)
//!                     /    |    \
//!                    L     L     L
//! ```

mod basic;
mod binary;
mod index;
mod int;
mod link;
mod string;
mod string_enum;
mod subtable;

pub use basic::{BasicColumn, DoubleColumn, FloatColumn};
pub use binary::BinaryColumn;
pub use index::StringIndex;
pub use int::IntColumn;
pub use link::{LinkColumn, LinkListColumn, RefLeaf};
pub use string::StringColumn;
pub use string_enum::StringEnumColumn;
pub use subtable::SubtableColumn;

use std::marker::PhantomData;
use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{Ref, Result, NPOS};

use crate::array::{destroy_deep_ref, Array};
use crate::bptree::{
    bptree_leaf_insert, introduce_new_bptree_root, is_inner_bptree_ref, EraseHandler, LeafArray,
    NodeInfo, TreeInsert, UpdateHandler,
};
use crate::write::ArrayWriter;

enum Root<L> {
    Leaf(L),
    Inner(Array),
}

// ============================================================================
// BpTree
// ============================================================================

/// A sequence of leaf values, stored in a single leaf or a B+-tree.
pub struct BpTree<L: LeafArray> {
    alloc: Arc<dyn Allocator>,
    root: Root<L>,
    max_node_size: usize,
}

impl<L: LeafArray> BpTree<L> {
    /// Creates an empty tree (a single empty leaf).
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        debug_assert!(max_node_size >= 2);
        Ok(Self {
            alloc: Arc::clone(alloc),
            root: Root::Leaf(L::create_leaf(alloc)?),
            max_node_size,
        })
    }

    /// Attaches to the tree rooted at `ref_`.
    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref, max_node_size: usize) -> Self {
        let mem = MemRef::from_ref(alloc.as_ref(), ref_);
        let root = if is_inner_bptree_ref(alloc.as_ref(), ref_) {
            Root::Inner(Array::from_mem(alloc, mem))
        } else {
            Root::Leaf(L::from_mem(alloc, mem))
        };
        Self {
            alloc: Arc::clone(alloc),
            root,
            max_node_size,
        }
    }

    pub fn get_alloc(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    pub fn get_ref(&self) -> Ref {
        match &self.root {
            Root::Leaf(leaf) => leaf.leaf_ref(),
            Root::Inner(root) => root.get_ref(),
        }
    }

    pub fn max_node_size(&self) -> usize {
        self.max_node_size
    }

    /// Returns true while the tree is a single leaf.
    pub fn root_is_leaf(&self) -> bool {
        matches!(self.root, Root::Leaf(_))
    }

    pub fn size(&self) -> usize {
        match &self.root {
            Root::Leaf(leaf) => leaf.leaf_size(),
            Root::Inner(root) => root.get_bptree_size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, ndx: usize) -> L::Value {
        debug_assert!(ndx < self.size());
        match &self.root {
            Root::Leaf(leaf) => leaf.leaf_get(ndx),
            Root::Inner(root) => {
                let (mem, ndx_in_leaf) = root.get_bptree_leaf(ndx);
                L::from_mem(&self.alloc, mem).leaf_get(ndx_in_leaf)
            }
        }
    }

    /// Leaf holding element `ndx`, and the index of its first element.
    pub fn leaf_at(&self, ndx: usize) -> (L, usize) {
        match &self.root {
            Root::Leaf(leaf) => {
                let mem = MemRef::from_ref(self.alloc.as_ref(), leaf.leaf_ref());
                (L::from_mem(&self.alloc, mem), 0)
            }
            Root::Inner(root) => {
                let (mem, ndx_in_leaf) = root.get_bptree_leaf(ndx);
                (L::from_mem(&self.alloc, mem), ndx - ndx_in_leaf)
            }
        }
    }

    pub fn set(&mut self, ndx: usize, value: L::Value) -> Result<()> {
        debug_assert!(ndx < self.size());
        match &mut self.root {
            Root::Leaf(leaf) => leaf.leaf_set(ndx, value),
            Root::Inner(root) => {
                let mut handler = SetElem::<L> {
                    alloc: Arc::clone(&self.alloc),
                    value,
                };
                root.update_bptree_elem(ndx, &mut handler)
            }
        }
    }

    /// Inserts `value` before element `ndx`. `NPOS` or `size()` appends.
    pub fn insert(&mut self, ndx: usize, value: L::Value) -> Result<()> {
        let size = self.size();
        debug_assert!(ndx == NPOS || ndx <= size);
        let append = ndx == NPOS || ndx == size;
        let max = self.max_node_size;
        let mut state = TreeInsert::new(value);
        let sibling = match &mut self.root {
            Root::Leaf(leaf) => {
                let at = if append { NPOS } else { ndx };
                bptree_leaf_insert(leaf, at, &mut state, max, &self.alloc)?
            }
            Root::Inner(root) if append => root.bptree_append::<L>(&mut state, max)?,
            Root::Inner(root) => root.bptree_insert::<L>(ndx, &mut state, max)?,
        };
        if let Some(sibling) = sibling {
            let root = introduce_new_bptree_root(&self.alloc, self.get_ref(), sibling, &state, append)?;
            self.root = Root::Inner(root);
        }
        Ok(())
    }

    pub fn add(&mut self, value: L::Value) -> Result<()> {
        self.insert(NPOS, value)
    }

    /// Removes element `ndx` (`NPOS` = last).
    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        debug_assert!(!self.is_empty());
        let new_root = match &mut self.root {
            Root::Leaf(leaf) => {
                let ndx = if ndx == NPOS { leaf.leaf_size() - 1 } else { ndx };
                leaf.leaf_erase(ndx)?;
                None
            }
            Root::Inner(root) => {
                let mut handler = TreeEraser::<L> {
                    alloc: Arc::clone(&self.alloc),
                    new_root: None,
                };
                root.erase_bptree_elem(ndx, &mut handler)?;
                handler.new_root
            }
        };
        if let Some(root) = new_root {
            self.root = root;
        }
        Ok(())
    }

    /// Frees every node and starts over with an empty leaf.
    pub fn clear(&mut self) -> Result<()> {
        let fresh = L::create_leaf(&self.alloc)?;
        destroy_deep_ref(&self.alloc, self.get_ref());
        self.root = Root::Leaf(fresh);
        Ok(())
    }

    /// Frees every node. The tree must not be used afterwards.
    pub fn destroy(&mut self) {
        match &mut self.root {
            Root::Leaf(leaf) => leaf.leaf_destroy(),
            Root::Inner(root) => root.destroy_deep(),
        }
    }

    /// Calls `f(leaf, offset)` for every leaf holding elements at or after
    /// `start`. Returns false if `f` stopped the walk.
    pub fn visit_leaves(&self, start: usize, mut f: impl FnMut(&L, usize) -> bool) -> bool {
        match &self.root {
            Root::Leaf(leaf) => start >= leaf.leaf_size() || f(leaf, 0),
            Root::Inner(root) => {
                let alloc = &self.alloc;
                root.visit_bptree_leaves(start, &mut |info: &NodeInfo| {
                    let leaf = L::from_mem(alloc, info.mem);
                    f(&leaf, info.offset)
                })
            }
        }
    }

    /// Runs `f` on every leaf, patching relocated nodes.
    pub fn update_leaves(&mut self, mut f: impl FnMut(&mut L) -> Result<()>) -> Result<()> {
        match &mut self.root {
            Root::Leaf(leaf) => f(leaf),
            Root::Inner(root) => {
                let mut handler = LeafUpdate::<L, _> {
                    alloc: Arc::clone(&self.alloc),
                    f: &mut f,
                    _marker: PhantomData,
                };
                root.update_bptree_leaves(&mut handler)
            }
        }
    }

    /// Writes every node of the tree and returns the new root position.
    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        Array::from_ref(&self.alloc, self.get_ref()).write(writer, true)
    }

    /// Checks the tree's structural invariants. Panics on violation.
    pub fn verify(&self) {
        if let Root::Inner(root) = &self.root {
            let alloc = &self.alloc;
            let total = root.verify_bptree(&|mem| L::from_mem(alloc, mem).leaf_size());
            assert_eq!(total, self.size());
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

struct SetElem<L: LeafArray> {
    alloc: Arc<dyn Allocator>,
    value: L::Value,
}

impl<L: LeafArray> UpdateHandler for SetElem<L> {
    fn update(&mut self, leaf: MemRef, parent: &mut Array, ndx_in_parent: usize, elem_ndx: usize) -> Result<()> {
        let mut leaf = L::from_mem(&self.alloc, leaf);
        leaf.set_ndx_in_parent(ndx_in_parent);
        leaf.leaf_set(elem_ndx, self.value.clone())?;
        leaf.update_parent(parent)
    }
}

struct LeafUpdate<'f, L, F> {
    alloc: Arc<dyn Allocator>,
    f: &'f mut F,
    _marker: PhantomData<L>,
}

impl<L, F> UpdateHandler for LeafUpdate<'_, L, F>
where
    L: LeafArray,
    F: FnMut(&mut L) -> Result<()>,
{
    fn update(&mut self, leaf: MemRef, parent: &mut Array, ndx_in_parent: usize, _elem: usize) -> Result<()> {
        let mut leaf = L::from_mem(&self.alloc, leaf);
        leaf.set_ndx_in_parent(ndx_in_parent);
        (self.f)(&mut leaf)?;
        leaf.update_parent(parent)
    }
}

struct TreeEraser<L> {
    alloc: Arc<dyn Allocator>,
    new_root: Option<Root<L>>,
}

impl<L: LeafArray> EraseHandler for TreeEraser<L> {
    fn erase_leaf_elem(&mut self, leaf: MemRef, parent: &mut Array, ndx_in_parent: usize, elem_ndx: usize) -> Result<bool> {
        let mut leaf = L::from_mem(&self.alloc, leaf);
        leaf.set_ndx_in_parent(ndx_in_parent);
        let size = leaf.leaf_size();
        if size == 1 {
            return Ok(true);
        }
        let ndx = if elem_ndx == NPOS { size - 1 } else { elem_ndx };
        leaf.leaf_erase(ndx)?;
        leaf.update_parent(parent)?;
        Ok(false)
    }

    fn destroy_leaf(&mut self, leaf: MemRef) {
        L::from_mem(&self.alloc, leaf).leaf_destroy();
    }

    fn replace_root_by_leaf(&mut self, leaf: MemRef) {
        self.new_root = Some(Root::Leaf(L::from_mem(&self.alloc, leaf)));
    }

    fn replace_root_by_empty_leaf(&mut self) -> Result<()> {
        self.new_root = Some(Root::Leaf(L::create_leaf(&self.alloc)?));
        Ok(())
    }

    fn replace_root_by_inner(&mut self, inner: MemRef) {
        self.new_root = Some(Root::Inner(Array::from_mem(&self.alloc, inner)));
    }
}

// ============================================================================
// LeafCursor
// ============================================================================

/// Sequential reader that keeps the most recently used leaf.
///
/// A cursor is only valid while the tree it reads is not modified.
#[derive(Clone)]
pub struct LeafCursor<L: LeafArray> {
    cached: Option<(L, usize, usize)>,
}

impl<L: LeafArray> Default for LeafCursor<L> {
    fn default() -> Self {
        Self { cached: None }
    }
}

impl<L: LeafArray> LeafCursor<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf holding element `ndx` and the index of its first element.
    pub fn leaf_for(&mut self, tree: &BpTree<L>, ndx: usize) -> (&L, usize) {
        let cached = match self.cached.take() {
            Some(c) if c.1 <= ndx && ndx < c.2 => c,
            _ => {
                let (leaf, start) = tree.leaf_at(ndx);
                let end = start + leaf.leaf_size();
                (leaf, start, end)
            }
        };
        let cached = self.cached.insert(cached);
        (&cached.0, cached.1)
    }

    /// One past the last element of the cached leaf.
    pub fn leaf_end(&self) -> usize {
        self.cached.as_ref().map_or(0, |c| c.2)
    }

    pub fn get(&mut self, tree: &BpTree<L>, ndx: usize) -> L::Value {
        let (leaf, start) = self.leaf_for(tree, ndx);
        leaf.leaf_get(ndx - start)
    }

    /// Drops the cached leaf.
    pub fn reset(&mut self) {
        self.cached = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array_binary::ArrayBinary;
    use strata_alloc::SlabAlloc;
    use strata_common::StorageConfig;

    fn alloc() -> Arc<dyn Allocator> {
        Arc::new(SlabAlloc::new(StorageConfig::default()))
    }

    #[test]
    fn test_tree_grows_and_collapses() {
        let alloc = alloc();
        let mut tree = BpTree::<Array>::create(&alloc, 4).unwrap();
        for i in 0..50 {
            tree.add(i).unwrap();
        }
        assert!(!tree.root_is_leaf());
        tree.verify();
        tree.insert(10, -1).unwrap();
        assert_eq!(tree.get(10), -1);
        assert_eq!(tree.get(11), 10);
        tree.set(30, 999).unwrap();
        assert_eq!(tree.get(30), 999);

        while tree.size() > 3 {
            tree.erase(0).unwrap();
            tree.verify();
        }
        assert_eq!((0..3).map(|i| tree.get(i)).collect::<Vec<_>>(), vec![47, 48, 49]);

        // Sibling leaves never merge, so the root only collapses once a
        // single leaf is left.
        while tree.size() > 1 {
            tree.erase(0).unwrap();
            tree.verify();
        }
        assert!(tree.root_is_leaf());
        assert_eq!(tree.get(0), 49);
        tree.add(50).unwrap();
        assert_eq!((tree.get(0), tree.get(1)), (49, 50));
    }

    #[test]
    fn test_leaf_at_reports_leaf_start() {
        let alloc = alloc();
        let mut tree = BpTree::<Array>::create(&alloc, 5).unwrap();
        for i in 0..23 {
            tree.add(i).unwrap();
        }
        for ndx in 0..23 {
            let (leaf, start) = tree.leaf_at(ndx);
            assert!(start <= ndx && ndx < start + leaf.size());
            assert_eq!(leaf.get(ndx - start), ndx as i64);
        }
    }

    #[test]
    fn test_cursor_matches_get() {
        let alloc = alloc();
        let mut tree = BpTree::<ArrayBinary>::create(&alloc, 3).unwrap();
        for i in 0..20u8 {
            tree.add(vec![i; i as usize]).unwrap();
        }
        let mut cursor = LeafCursor::new();
        for ndx in (0..20).chain((0..20).rev()) {
            assert_eq!(cursor.get(&tree, ndx), tree.get(ndx));
        }
    }

    #[test]
    fn test_update_leaves_and_visit() {
        let alloc = alloc();
        let mut tree = BpTree::<Array>::create(&alloc, 4).unwrap();
        for i in 0..30 {
            tree.add(i).unwrap();
        }
        tree.update_leaves(|leaf| {
            let n = leaf.size();
            leaf.adjust_range(0, n, 100)
        })
        .unwrap();
        let mut seen = Vec::new();
        tree.visit_leaves(0, |leaf, offset| {
            for i in 0..leaf.size() {
                seen.push((offset + i, leaf.get(i)));
            }
            true
        });
        assert_eq!(seen.len(), 30);
        assert!(seen.iter().all(|&(i, v)| v == i as i64 + 100));
    }

    #[test]
    fn test_clear_releases_nodes() {
        let slab = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let alloc: Arc<dyn Allocator> = slab.clone();
        let mut tree = BpTree::<Array>::create(&alloc, 4).unwrap();
        for i in 0..100 {
            tree.add(i * 1000).unwrap();
        }
        tree.clear().unwrap();
        assert!(tree.is_empty());
        tree.destroy();
        assert!(slab.is_all_free());
    }
}
