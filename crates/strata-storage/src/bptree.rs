//! B+-tree algorithms over packed arrays.
//!
//! Leaves are any node type implementing [`LeafArray`]. Inner nodes are
//! `has_refs` arrays flagged as inner B+-tree nodes:
//!
//! ```text
//! +---------------+---------+-----+-------------+-----------------+
//! |   element 0   | child 0 | ... | child k-1   | 1 + 2 * total   |
//! +---------------+---------+-----+-------------+-----------------+
//!
//! general form: element 0 = ref of an offsets array with k-1 cumulative
//!               child ends
//! compact form: element 0 = 1 + 2 * elems_per_child, every child but the
//!               last holds exactly elems_per_child elements
//! ```
//!
//! Every inner node has at least one child and no leaf below an inner node is
//! empty. A child whose ref moves during an operation is patched into its
//! parent slot before the parent itself is touched.

use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{is_ref_value, tagged, to_ref, untagged, Ref, Result, NPOS};

use crate::array::header::is_inner_bptree_node_from_header;
use crate::array::{destroy_deep_ref, Array, ArrayParent, ArrayType};

// ============================================================================
// Leaf capability
// ============================================================================

/// A node type that can act as a B+-tree leaf.
pub trait LeafArray: Sized {
    /// Element type.
    type Value: Clone;

    /// Creates an empty leaf.
    fn create_leaf(alloc: &Arc<dyn Allocator>) -> Result<Self>;

    /// Attaches to an existing leaf.
    fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self;

    fn leaf_ref(&self) -> Ref;
    fn leaf_size(&self) -> usize;
    fn leaf_get(&self, ndx: usize) -> Self::Value;
    fn leaf_set(&mut self, ndx: usize, value: Self::Value) -> Result<()>;
    fn leaf_insert(&mut self, ndx: usize, value: Self::Value) -> Result<()>;
    fn leaf_erase(&mut self, ndx: usize) -> Result<()>;
    fn leaf_truncate(&mut self, size: usize) -> Result<()>;

    /// Frees the leaf and everything it owns.
    fn leaf_destroy(&mut self);

    fn set_ndx_in_parent(&mut self, ndx: usize);

    /// Stores this leaf's ref in `parent` if it moved.
    fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()>;
}

impl LeafArray for Array {
    type Value = i64;

    fn create_leaf(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        Array::create_new(alloc, ArrayType::Normal)
    }

    fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        Array::from_mem(alloc, mem)
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> i64 {
        self.get(ndx)
    }

    fn leaf_set(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.set(ndx, value)
    }

    fn leaf_insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.insert(ndx, value)
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.erase(ndx)
    }

    fn leaf_truncate(&mut self, size: usize) -> Result<()> {
        self.truncate(size)
    }

    fn leaf_destroy(&mut self) {
        self.destroy_deep();
    }

    fn set_ndx_in_parent(&mut self, ndx: usize) {
        Array::set_ndx_in_parent(self, ndx);
    }

    fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        Array::update_parent(self, parent)
    }
}

// ============================================================================
// Handler capabilities
// ============================================================================

/// State threaded through an insertion.
#[derive(Debug, Clone)]
pub struct TreeInsert<V> {
    /// Value being inserted.
    pub value: V,
    /// After a split: elements left in the original node.
    pub split_offset: usize,
    /// After a split: elements in the original node plus its new sibling.
    pub split_size: usize,
}

impl<V> TreeInsert<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            split_offset: 0,
            split_size: 0,
        }
    }
}

/// Leaf-type specific steps of an erase.
pub trait EraseHandler {
    /// Erases element `elem_ndx` (`NPOS` = last) from the leaf stored in
    /// `parent[ndx_in_parent]`, patching the slot if the leaf moves.
    ///
    /// Returns true, leaving the leaf untouched, if the leaf holds exactly
    /// one element and must be removed instead.
    fn erase_leaf_elem(
        &mut self,
        leaf: MemRef,
        parent: &mut Array,
        ndx_in_parent: usize,
        elem_ndx: usize,
    ) -> Result<bool>;

    /// Frees a leaf that was removed from the tree.
    fn destroy_leaf(&mut self, leaf: MemRef);

    /// The tree collapsed into a single leaf.
    fn replace_root_by_leaf(&mut self, leaf: MemRef);

    /// The last element was erased; the tree becomes an empty leaf.
    fn replace_root_by_empty_leaf(&mut self) -> Result<()>;

    /// The root was collapsed into one of its inner descendants.
    fn replace_root_by_inner(&mut self, inner: MemRef);
}

/// A leaf reached by [`Array::visit_bptree_leaves`].
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    /// The leaf.
    pub mem: MemRef,
    /// Ref of the inner node holding the leaf.
    pub parent_ref: Ref,
    /// Slot of the leaf in its parent.
    pub ndx_in_parent: usize,
    /// Index of the leaf's first element in the whole tree.
    pub offset: usize,
    /// Number of elements in the leaf.
    pub size: usize,
}

/// Receiver of visited leaves. Returning false stops the walk.
pub trait VisitHandler {
    fn visit(&mut self, info: &NodeInfo) -> bool;
}

impl<F: FnMut(&NodeInfo) -> bool> VisitHandler for F {
    fn visit(&mut self, info: &NodeInfo) -> bool {
        self(info)
    }
}

/// Mutates leaves in place.
pub trait UpdateHandler {
    /// Updates the leaf stored in `parent[ndx_in_parent]` and patches the
    /// slot if the leaf moved. `elem_ndx_in_leaf` is `NPOS` when the whole
    /// leaf is being updated.
    fn update(
        &mut self,
        leaf: MemRef,
        parent: &mut Array,
        ndx_in_parent: usize,
        elem_ndx_in_leaf: usize,
    ) -> Result<()>;
}

/// Inserts into a leaf, splitting it at the insertion point when it is full.
///
/// Returns the new sibling's ref after a split.
pub fn bptree_leaf_insert<L: LeafArray>(
    leaf: &mut L,
    ndx: usize,
    state: &mut TreeInsert<L::Value>,
    max_node_size: usize,
    alloc: &Arc<dyn Allocator>,
) -> Result<Option<Ref>> {
    let size = leaf.leaf_size();
    let ndx = if ndx == NPOS { size } else { ndx };
    debug_assert!(ndx <= size);
    if size < max_node_size {
        leaf.leaf_insert(ndx, state.value.clone())?;
        return Ok(None);
    }

    let mut sibling = L::create_leaf(alloc)?;
    if ndx == size {
        sibling.leaf_insert(0, state.value.clone())?;
        state.split_offset = ndx;
    } else {
        for i in ndx..size {
            sibling.leaf_insert(i - ndx, leaf.leaf_get(i))?;
        }
        leaf.leaf_truncate(ndx)?;
        leaf.leaf_insert(ndx, state.value.clone())?;
        state.split_offset = ndx + 1;
    }
    state.split_size = size + 1;
    Ok(Some(sibling.leaf_ref()))
}

/// Builds a new root over a split root and its new sibling.
///
/// The new root is compact when the split came from an append and the old
/// root was a leaf or itself compact.
pub fn introduce_new_bptree_root<V>(
    alloc: &Arc<dyn Allocator>,
    old_root: Ref,
    new_sibling: Ref,
    state: &TreeInsert<V>,
    is_append: bool,
) -> Result<Array> {
    let old_mem = MemRef::from_ref(alloc.as_ref(), old_root);
    let compact = is_append && (!is_inner(old_mem) || !is_ref_value(Array::from_mem(alloc, old_mem).get(0)));
    let mut root = Array::create_new(alloc, ArrayType::InnerBptreeNode)?;
    if compact {
        root.add(tagged(state.split_offset))?;
    } else {
        let mut offsets = Array::create_new(alloc, ArrayType::Normal)?;
        offsets.add(state.split_offset as i64)?;
        root.add(offsets.get_ref() as i64)?;
    }
    root.add(old_root as i64)?;
    root.add(new_sibling as i64)?;
    root.add(tagged(state.split_size))?;
    tracing::debug!(root = root.get_ref(), compact, size = state.split_size, "B+-tree gained a level");
    Ok(root)
}

#[inline]
fn is_inner(mem: MemRef) -> bool {
    // SAFETY: mem was translated from a live child ref.
    unsafe { is_inner_bptree_node_from_header(mem.addr) }
}

/// Returns true if the node at `ref_` is an inner B+-tree node.
pub fn is_inner_bptree_ref(alloc: &dyn Allocator, ref_: Ref) -> bool {
    is_inner(MemRef::from_ref(alloc, ref_))
}

// ============================================================================
// Inner node operations
// ============================================================================

impl Array {
    /// Number of children of an inner node.
    #[inline]
    pub fn bptree_num_children(&self) -> usize {
        self.size() - 2
    }

    /// Total elements below an inner node.
    #[inline]
    pub fn get_bptree_size(&self) -> usize {
        untagged(self.back())
    }

    /// Returns the offsets accessor, or `None` in compact form.
    fn bptree_offsets(&self) -> Option<Array> {
        let first = self.get(0);
        if is_ref_value(first) {
            let mut offsets = Array::from_ref(self.get_alloc(), to_ref(first));
            offsets.set_ndx_in_parent(0);
            Some(offsets)
        } else {
            None
        }
    }

    /// Index of the first element of `child_ndx` within this node.
    fn bptree_child_offset(&self, offsets: Option<&Array>, child_ndx: usize) -> usize {
        if child_ndx == 0 {
            return 0;
        }
        match offsets {
            Some(o) => o.get(child_ndx - 1) as usize,
            None => child_ndx * untagged(self.get(0)),
        }
    }

    /// One past the last element of `child_ndx` within this node.
    fn bptree_child_end(&self, offsets: Option<&Array>, child_ndx: usize) -> usize {
        if child_ndx + 1 == self.bptree_num_children() {
            self.get_bptree_size()
        } else {
            self.bptree_child_offset(offsets, child_ndx + 1)
        }
    }

    /// Converts a compact node to general form and returns its offsets.
    pub fn ensure_bptree_offsets(&mut self) -> Result<Array> {
        if let Some(offsets) = self.bptree_offsets() {
            return Ok(offsets);
        }
        let alloc = Arc::clone(self.get_alloc());
        let elems_per_child = untagged(self.get(0));
        let mut offsets = Array::create_new(&alloc, ArrayType::Normal)?;
        for i in 1..self.bptree_num_children() {
            if let Err(e) = offsets.add((i * elems_per_child) as i64) {
                offsets.destroy();
                return Err(e);
            }
        }
        if let Err(e) = self.set(0, offsets.get_ref() as i64) {
            offsets.destroy();
            return Err(e);
        }
        offsets.set_ndx_in_parent(0);
        Ok(offsets)
    }

    /// Child holding element `elem_ndx` and the element's index in it.
    pub fn find_bptree_child(&self, elem_ndx: usize) -> (usize, usize) {
        let offsets = self.bptree_offsets();
        self.find_bptree_child_in(offsets.as_ref(), elem_ndx)
    }

    fn find_bptree_child_in(&self, offsets: Option<&Array>, elem_ndx: usize) -> (usize, usize) {
        match offsets {
            Some(o) => {
                let child = o.upper_bound_int(elem_ndx as i64);
                let start = if child == 0 { 0 } else { o.get(child - 1) as usize };
                (child, elem_ndx - start)
            }
            None => {
                let elems_per_child = untagged(self.get(0));
                let child = (elem_ndx / elems_per_child).min(self.bptree_num_children() - 1);
                (child, elem_ndx - child * elems_per_child)
            }
        }
    }

    /// Finds the leaf holding element `ndx`. Returns the leaf and the
    /// element's index within it.
    pub fn get_bptree_leaf(&self, ndx: usize) -> (MemRef, usize) {
        let alloc = self.get_alloc();
        let (child, mut ndx_in_child) = self.find_bptree_child(ndx);
        let mut mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(child + 1));
        while is_inner(mem) {
            let node = Array::from_mem(alloc, mem);
            let (child, n) = node.find_bptree_child(ndx_in_child);
            mem = MemRef::from_ref(alloc.as_ref(), node.get_as_ref(child + 1));
            ndx_in_child = n;
        }
        (mem, ndx_in_child)
    }

    // ===== Insert =====

    /// Inserts `state.value` before element `elem_ndx` of the subtree.
    ///
    /// Returns the ref of a new right sibling if this node had to split.
    pub fn bptree_insert<L: LeafArray>(
        &mut self,
        elem_ndx: usize,
        state: &mut TreeInsert<L::Value>,
        max_node_size: usize,
    ) -> Result<Option<Ref>> {
        debug_assert!(self.is_inner_bptree_node() && self.size() >= 3);
        let alloc = Arc::clone(self.get_alloc());
        let offsets = self.ensure_bptree_offsets()?;

        let (child_ndx, ndx_in_child) = if elem_ndx == 0 {
            (0, 0)
        } else {
            // Ties append to the earlier child.
            let child = offsets.lower_bound_int(elem_ndx as i64);
            debug_assert!(child < self.bptree_num_children());
            let start = if child == 0 { 0 } else { offsets.get(child - 1) as usize };
            (child, elem_ndx - start)
        };

        let new_sibling = self.insert_into_child::<L>(child_ndx, ndx_in_child, state, max_node_size, &alloc)?;
        match new_sibling {
            None => {
                let last = self.size() - 1;
                self.adjust(last, 2)?;
                let mut offsets = offsets;
                let n = offsets.size();
                offsets.adjust_range(child_ndx, n, 1)?;
                offsets.update_parent(self)?;
                Ok(None)
            }
            Some(sibling) => self.insert_bptree_child(Some(offsets), child_ndx, sibling, state, max_node_size),
        }
    }

    /// Appends `state.value` to the subtree.
    ///
    /// Returns the ref of a new right sibling if this node had to split.
    pub fn bptree_append<L: LeafArray>(
        &mut self,
        state: &mut TreeInsert<L::Value>,
        max_node_size: usize,
    ) -> Result<Option<Ref>> {
        debug_assert!(self.is_inner_bptree_node() && self.size() >= 3);
        let alloc = Arc::clone(self.get_alloc());
        let child_ndx = self.bptree_num_children() - 1;
        match self.insert_into_child::<L>(child_ndx, NPOS, state, max_node_size, &alloc)? {
            None => {
                let last = self.size() - 1;
                self.adjust(last, 2)?;
                Ok(None)
            }
            Some(sibling) => {
                let offsets = self.bptree_offsets();
                self.insert_bptree_child(offsets, child_ndx, sibling, state, max_node_size)
            }
        }
    }

    fn insert_into_child<L: LeafArray>(
        &mut self,
        child_ndx: usize,
        ndx_in_child: usize,
        state: &mut TreeInsert<L::Value>,
        max_node_size: usize,
        alloc: &Arc<dyn Allocator>,
    ) -> Result<Option<Ref>> {
        let child_ref_ndx = child_ndx + 1;
        let mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(child_ref_ndx));
        if is_inner(mem) {
            let mut child = Array::from_mem(alloc, mem);
            child.set_ndx_in_parent(child_ref_ndx);
            let sibling = if ndx_in_child == NPOS {
                child.bptree_append::<L>(state, max_node_size)?
            } else {
                child.bptree_insert::<L>(ndx_in_child, state, max_node_size)?
            };
            child.update_parent(self)?;
            Ok(sibling)
        } else {
            let mut leaf = L::from_mem(alloc, mem);
            leaf.set_ndx_in_parent(child_ref_ndx);
            let sibling = bptree_leaf_insert(&mut leaf, ndx_in_child, state, max_node_size, alloc)?;
            leaf.update_parent(self)?;
            Ok(sibling)
        }
    }

    /// Places `new_sibling` right after child `orig_child_ndx`, which was
    /// just split. Splits this node too if it is full.
    fn insert_bptree_child<V>(
        &mut self,
        offsets: Option<Array>,
        orig_child_ndx: usize,
        new_sibling: Ref,
        state: &mut TreeInsert<V>,
        max_node_size: usize,
    ) -> Result<Option<Ref>> {
        let alloc = Arc::clone(self.get_alloc());
        let num_children = self.bptree_num_children();
        let old_total = self.get_bptree_size();
        let elem_offset = self.bptree_child_offset(offsets.as_ref(), orig_child_ndx);

        // Compact form survives only if the split child keeps exactly
        // elems_per_child elements and the sibling becomes the last child.
        let keep_compact = offsets.is_none()
            && orig_child_ndx + 1 == num_children
            && state.split_offset == untagged(self.get(0));
        let mut offsets = match offsets {
            Some(o) => Some(o),
            None if keep_compact => None,
            None => Some(self.ensure_bptree_offsets()?),
        };

        if num_children < max_node_size {
            self.insert(orig_child_ndx + 2, new_sibling as i64)?;
            let last = self.size() - 1;
            self.adjust(last, 2)?;
            if let Some(o) = offsets.as_mut() {
                o.insert(orig_child_ndx, (elem_offset + state.split_offset) as i64)?;
                let n = o.size();
                o.adjust_range(orig_child_ndx + 1, n, 1)?;
                o.update_parent(self)?;
            }
            return Ok(None);
        }

        // Split this node: children up to orig stay, the new sibling and
        // everything after it move right.
        let base = elem_offset + state.split_offset;
        debug_assert!(offsets.is_some() || base == old_total);
        let mut right = Array::create_new(&alloc, ArrayType::InnerBptreeNode)?;
        match offsets.as_mut() {
            None => {
                right.add(self.get(0))?;
                right.add(new_sibling as i64)?;
                right.add(tagged(state.split_size - state.split_offset))?;
            }
            Some(o) => {
                let mut right_offsets = Array::create_new(&alloc, ArrayType::Normal)?;
                for j in orig_child_ndx..num_children - 1 {
                    right_offsets.add(o.get(j) + 1 - base as i64)?;
                }
                right.add(right_offsets.get_ref() as i64)?;
                right.add(new_sibling as i64)?;
                for j in orig_child_ndx + 1..num_children {
                    right.add(self.get(j + 1))?;
                }
                right.add(tagged(old_total + 1 - base))?;

                self.truncate(orig_child_ndx + 2)?;
                self.add(tagged(base))?;
                o.truncate(orig_child_ndx)?;
                o.update_parent(self)?;
            }
        }
        state.split_offset = base;
        state.split_size = old_total + 1;
        Ok(Some(right.get_ref()))
    }

    // ===== Erase =====

    /// Erases element `elem_ndx` (`NPOS` = last) from the tree rooted here.
    ///
    /// When the root collapses or empties, `handler` is told which node
    /// replaces it and this accessor is detached.
    pub fn erase_bptree_elem<H: EraseHandler>(&mut self, elem_ndx: usize, handler: &mut H) -> Result<()> {
        let alloc = Arc::clone(self.get_alloc());
        if self.erase_bptree_elem_rec(elem_ndx, handler)? {
            handler.replace_root_by_empty_leaf()?;
            destroy_singlet_bptree_branch(&alloc, self.get_mem(), handler);
            self.detach();
            return Ok(());
        }
        if self.bptree_num_children() > 1 {
            return Ok(());
        }

        let mut child_ref = self.get_as_ref(1);
        self.destroy_inner_node();
        loop {
            let mem = MemRef::from_ref(alloc.as_ref(), child_ref);
            if !is_inner(mem) {
                tracing::debug!(root = mem.ref_, "B+-tree collapsed to a leaf");
                handler.replace_root_by_leaf(mem);
                return Ok(());
            }
            let mut node = Array::from_mem(&alloc, mem);
            if node.bptree_num_children() > 1 {
                tracing::debug!(root = mem.ref_, "B+-tree lost a level");
                handler.replace_root_by_inner(mem);
                return Ok(());
            }
            child_ref = node.get_as_ref(1);
            node.destroy_inner_node();
        }
    }

    /// Returns true if the subtree holds a single element that must be
    /// removed together with the subtree.
    fn erase_bptree_elem_rec<H: EraseHandler>(&mut self, elem_ndx: usize, handler: &mut H) -> Result<bool> {
        let alloc = Arc::clone(self.get_alloc());
        let mut offsets = if elem_ndx == NPOS {
            self.bptree_offsets()
        } else {
            Some(self.ensure_bptree_offsets()?)
        };
        let num_children = self.bptree_num_children();
        let (child_ndx, ndx_in_child) = if elem_ndx == NPOS {
            (num_children - 1, NPOS)
        } else {
            self.find_bptree_child_in(offsets.as_ref(), elem_ndx)
        };

        let child_ref_ndx = child_ndx + 1;
        let child_mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(child_ref_ndx));
        let destroy_child = if is_inner(child_mem) {
            let mut child = Array::from_mem(&alloc, child_mem);
            child.set_ndx_in_parent(child_ref_ndx);
            let destroy = child.erase_bptree_elem_rec(ndx_in_child, handler)?;
            if !destroy {
                child.update_parent(self)?;
            }
            destroy
        } else {
            handler.erase_leaf_elem(child_mem, self, child_ref_ndx, ndx_in_child)?
        };

        if destroy_child {
            if num_children == 1 {
                return Ok(true);
            }
            self.erase(child_ref_ndx)?;
            if let Some(o) = offsets.as_mut() {
                if child_ndx < o.size() {
                    o.erase(child_ndx)?;
                    let n = o.size();
                    o.adjust_range(child_ndx, n, -1)?;
                } else {
                    o.erase(child_ndx - 1)?;
                }
                o.update_parent(self)?;
            }
            destroy_singlet_bptree_branch(&alloc, child_mem, handler);
        } else if let Some(o) = offsets.as_mut() {
            let n = o.size();
            o.adjust_range(child_ndx, n, -1)?;
            o.update_parent(self)?;
        }
        let last = self.size() - 1;
        self.adjust(last, -2)?;
        Ok(false)
    }

    /// Frees this inner node and its offsets array, leaving children alone.
    fn destroy_inner_node(&mut self) {
        let first = self.get(0);
        if is_ref_value(first) {
            destroy_deep_ref(self.get_alloc(), to_ref(first));
        }
        self.destroy();
    }

    // ===== Traversal =====

    /// Visits every leaf holding elements at or after `start`, in order.
    ///
    /// Returns false if the handler stopped the walk.
    pub fn visit_bptree_leaves<H: VisitHandler + ?Sized>(&self, start: usize, handler: &mut H) -> bool {
        self.visit_leaves_from(0, start, handler)
    }

    fn visit_leaves_from<H: VisitHandler + ?Sized>(&self, node_offset: usize, start: usize, handler: &mut H) -> bool {
        let alloc = self.get_alloc();
        let offsets = self.bptree_offsets();
        let total = self.get_bptree_size();
        if start >= node_offset + total {
            return true;
        }
        let first = if start <= node_offset {
            0
        } else {
            self.find_bptree_child_in(offsets.as_ref(), start - node_offset).0
        };
        for child in first..self.bptree_num_children() {
            let child_start = self.bptree_child_offset(offsets.as_ref(), child);
            let mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(child + 1));
            if is_inner(mem) {
                let node = Array::from_mem(alloc, mem);
                if !node.visit_leaves_from(node_offset + child_start, start, handler) {
                    return false;
                }
            } else {
                let info = NodeInfo {
                    mem,
                    parent_ref: self.get_ref(),
                    ndx_in_parent: child + 1,
                    offset: node_offset + child_start,
                    size: self.bptree_child_end(offsets.as_ref(), child) - child_start,
                };
                if !handler.visit(&info) {
                    return false;
                }
            }
        }
        true
    }

    /// Runs `handler` on every leaf and patches relocated nodes upward.
    pub fn update_bptree_leaves<H: UpdateHandler + ?Sized>(&mut self, handler: &mut H) -> Result<()> {
        let alloc = Arc::clone(self.get_alloc());
        for child in 0..self.bptree_num_children() {
            let ndx_in_parent = child + 1;
            let mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(ndx_in_parent));
            if is_inner(mem) {
                let mut node = Array::from_mem(&alloc, mem);
                node.set_ndx_in_parent(ndx_in_parent);
                node.update_bptree_leaves(handler)?;
                node.update_parent(self)?;
            } else {
                handler.update(mem, self, ndx_in_parent, NPOS)?;
            }
        }
        Ok(())
    }

    /// Runs `handler` on the leaf holding element `elem_ndx` and patches
    /// relocated nodes upward.
    pub fn update_bptree_elem<H: UpdateHandler + ?Sized>(&mut self, elem_ndx: usize, handler: &mut H) -> Result<()> {
        let alloc = Arc::clone(self.get_alloc());
        let (child, ndx_in_child) = self.find_bptree_child(elem_ndx);
        let ndx_in_parent = child + 1;
        let mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(ndx_in_parent));
        if is_inner(mem) {
            let mut node = Array::from_mem(&alloc, mem);
            node.set_ndx_in_parent(ndx_in_parent);
            node.update_bptree_elem(ndx_in_child, handler)?;
            node.update_parent(self)
        } else {
            handler.update(mem, self, ndx_in_parent, ndx_in_child)
        }
    }

    /// Checks the structural invariants of the subtree and returns its
    /// element count. Panics on violation.
    pub fn verify_bptree(&self, leaf_size: &dyn Fn(MemRef) -> usize) -> usize {
        assert!(self.is_inner_bptree_node());
        let num_children = self.bptree_num_children();
        assert!(num_children >= 1, "inner node without children");
        let offsets = self.bptree_offsets();
        if let Some(o) = offsets.as_ref() {
            assert_eq!(o.size(), num_children - 1, "offsets size");
        }
        let alloc = self.get_alloc();
        let mut total = 0;
        for child in 0..num_children {
            let mem = MemRef::from_ref(alloc.as_ref(), self.get_as_ref(child + 1));
            let size = if is_inner(mem) {
                Array::from_mem(alloc, mem).verify_bptree(leaf_size)
            } else {
                leaf_size(mem)
            };
            assert!(size > 0, "empty child {child}");
            assert_eq!(self.bptree_child_offset(offsets.as_ref(), child), total, "child {child} offset");
            total += size;
        }
        assert_eq!(total, self.get_bptree_size(), "subtree total");
        total
    }
}

/// Frees a chain of single-child inner nodes ending in a leaf.
fn destroy_singlet_bptree_branch<H: EraseHandler>(alloc: &Arc<dyn Allocator>, mem: MemRef, handler: &mut H) {
    let mut mem = mem;
    while is_inner(mem) {
        let mut node = Array::from_mem(alloc, mem);
        let next = node.get_as_ref(1);
        node.destroy_inner_node();
        mem = MemRef::from_ref(alloc.as_ref(), next);
    }
    handler.destroy_leaf(mem);
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_alloc::SlabAlloc;
    use strata_common::StorageConfig;

    fn alloc() -> Arc<dyn Allocator> {
        Arc::new(SlabAlloc::new(StorageConfig::default()))
    }

    /// Minimal integer tree driver used to exercise the inner node code.
    struct Tree {
        alloc: Arc<dyn Allocator>,
        root: Array,
        max: usize,
    }

    impl Tree {
        fn new(max: usize) -> Self {
            let alloc = alloc();
            let root = Array::create_new(&alloc, ArrayType::Normal).unwrap();
            Self { alloc, root, max }
        }

        fn size(&self) -> usize {
            if self.root.is_inner_bptree_node() {
                self.root.get_bptree_size()
            } else {
                self.root.size()
            }
        }

        fn insert(&mut self, ndx: usize, value: i64) {
            let append = ndx == NPOS || ndx == self.size();
            let mut state = TreeInsert::new(value);
            let sibling = if self.root.is_inner_bptree_node() {
                if append {
                    self.root.bptree_append::<Array>(&mut state, self.max).unwrap()
                } else {
                    self.root.bptree_insert::<Array>(ndx, &mut state, self.max).unwrap()
                }
            } else {
                bptree_leaf_insert(&mut self.root, if append { NPOS } else { ndx }, &mut state, self.max, &self.alloc)
                    .unwrap()
            };
            if let Some(sibling) = sibling {
                self.root =
                    introduce_new_bptree_root(&self.alloc, self.root.get_ref(), sibling, &state, append).unwrap();
            }
        }

        fn get(&self, ndx: usize) -> i64 {
            if self.root.is_inner_bptree_node() {
                let (mem, n) = self.root.get_bptree_leaf(ndx);
                Array::from_mem(&self.alloc, mem).get(n)
            } else {
                self.root.get(ndx)
            }
        }

        fn erase(&mut self, ndx: usize) {
            if !self.root.is_inner_bptree_node() {
                self.root.erase(if ndx == NPOS { self.root.size() - 1 } else { ndx }).unwrap();
                return;
            }
            let mut handler = IntEraser {
                alloc: Arc::clone(&self.alloc),
                new_root: None,
            };
            self.root.erase_bptree_elem(ndx, &mut handler).unwrap();
            if let Some(root) = handler.new_root {
                self.root = root;
            }
        }

        fn verify(&self) {
            if self.root.is_inner_bptree_node() {
                let alloc = Arc::clone(&self.alloc);
                let n = self.root.verify_bptree(&move |mem| Array::from_mem(&alloc, mem).size());
                assert_eq!(n, self.size());
            }
        }
    }

    struct IntEraser {
        alloc: Arc<dyn Allocator>,
        new_root: Option<Array>,
    }

    impl EraseHandler for IntEraser {
        fn erase_leaf_elem(&mut self, leaf: MemRef, parent: &mut Array, ndx_in_parent: usize, elem_ndx: usize) -> Result<bool> {
            let mut leaf = Array::from_mem(&self.alloc, leaf);
            leaf.set_ndx_in_parent(ndx_in_parent);
            if leaf.size() == 1 {
                return Ok(true);
            }
            let ndx = if elem_ndx == NPOS { leaf.size() - 1 } else { elem_ndx };
            leaf.erase(ndx)?;
            leaf.update_parent(parent)
                .map(|_| false)
        }
        fn destroy_leaf(&mut self, leaf: MemRef) {
            Array::from_mem(&self.alloc, leaf).destroy_deep();
        }
        fn replace_root_by_leaf(&mut self, leaf: MemRef) {
            self.new_root = Some(Array::from_mem(&self.alloc, leaf));
        }
        fn replace_root_by_empty_leaf(&mut self) -> Result<()> {
            self.new_root = Some(Array::create_new(&self.alloc, ArrayType::Normal)?);
            Ok(())
        }
        fn replace_root_by_inner(&mut self, inner: MemRef) {
            self.new_root = Some(Array::from_mem(&self.alloc, inner));
        }
    }

    #[test]
    fn test_append_keeps_compact_form() {
        let mut tree = Tree::new(4);
        for i in 0..100 {
            tree.insert(NPOS, i);
        }
        assert!(tree.root.is_inner_bptree_node());
        assert!(!is_ref_value(tree.root.get(0)), "root should stay compact");
        tree.verify();
        for i in 0..100 {
            assert_eq!(tree.get(i), i as i64);
        }
    }

    #[test]
    fn test_prepend_and_middle_inserts() {
        let mut tree = Tree::new(3);
        let mut model = Vec::new();
        for i in 0..60i64 {
            let ndx = match i % 3 {
                0 => 0,
                1 => model.len() / 2,
                _ => model.len(),
            };
            tree.insert(ndx, i);
            model.insert(ndx, i);
            tree.verify();
        }
        for (i, &v) in model.iter().enumerate() {
            assert_eq!(tree.get(i), v);
        }
    }

    #[test]
    fn test_erase_collapses_to_leaf() {
        let mut tree = Tree::new(3);
        for i in 0..30 {
            tree.insert(NPOS, i);
        }
        for _ in 0..28 {
            tree.erase(0);
            tree.verify();
        }
        assert_eq!(tree.size(), 2);
        assert!(!tree.root.is_inner_bptree_node());
        assert_eq!(tree.root.to_vec(), vec![28, 29]);
    }

    #[test]
    fn test_erase_last_until_empty() {
        let mut tree = Tree::new(2);
        for i in 0..17 {
            tree.insert(NPOS, i);
        }
        for expected in (0..17).rev() {
            assert_eq!(tree.get(tree.size() - 1), expected);
            tree.erase(NPOS);
            tree.verify();
        }
        assert_eq!(tree.size(), 0);
        assert!(!tree.root.is_inner_bptree_node());
    }

    #[test]
    fn test_visit_leaves_from_offset() {
        let mut tree = Tree::new(4);
        for i in 0..50 {
            tree.insert(NPOS, i);
        }
        let mut seen = Vec::new();
        let alloc = Arc::clone(&tree.alloc);
        tree.root.visit_bptree_leaves(21, &mut |info: &NodeInfo| {
            let leaf = Array::from_mem(&alloc, info.mem);
            assert_eq!(leaf.size(), info.size);
            for i in 0..info.size {
                seen.push((info.offset + i, leaf.get(i)));
            }
            true
        });
        assert_eq!(seen.first().map(|s| s.0), Some(20));
        assert!(seen.iter().all(|&(i, v)| i as i64 == v));
        assert_eq!(seen.last(), Some(&(49, 49)));
    }

    #[test]
    fn test_update_elem_patches_ancestors() {
        struct SetBig(i64);
        impl UpdateHandler for SetBig {
            fn update(&mut self, leaf: MemRef, parent: &mut Array, ndx_in_parent: usize, elem: usize) -> Result<()> {
                let mut leaf = Array::from_mem(parent.get_alloc(), leaf);
                leaf.set_ndx_in_parent(ndx_in_parent);
                leaf.set(elem, self.0)?;
                leaf.update_parent(parent)
            }
        }
        let mut tree = Tree::new(4);
        for i in 0..40 {
            tree.insert(NPOS, i % 4);
        }
        tree.root.update_bptree_elem(33, &mut SetBig(1 << 50)).unwrap();
        assert_eq!(tree.get(33), 1 << 50);
        assert_eq!(tree.get(32), 0);
        tree.verify();
    }
}
