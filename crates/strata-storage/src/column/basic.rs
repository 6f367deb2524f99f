//! Float and double columns.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::array_basic::{ArrayBasic, BasicType};
use crate::write::ArrayWriter;

use super::BpTree;

/// A column of `f32` or `f64` values.
pub struct BasicColumn<T: BasicType> {
    tree: BpTree<ArrayBasic<T>>,
}

pub type FloatColumn = BasicColumn<f32>;
pub type DoubleColumn = BasicColumn<f64>;

impl<T: BasicType> BasicColumn<T> {
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        Ok(Self {
            tree: BpTree::create(alloc, max_node_size)?,
        })
    }

    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref, max_node_size: usize) -> Self {
        Self {
            tree: BpTree::from_ref(alloc, ref_, max_node_size),
        }
    }

    pub fn tree(&self) -> &BpTree<ArrayBasic<T>> {
        &self.tree
    }

    pub fn get_ref(&self) -> Ref {
        self.tree.get_ref()
    }

    pub fn size(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, ndx: usize) -> T {
        self.tree.get(ndx)
    }

    pub fn set(&mut self, ndx: usize, value: T) -> Result<()> {
        self.tree.set(ndx, value)
    }

    pub fn insert(&mut self, ndx: usize, value: T) -> Result<()> {
        self.tree.insert(ndx, value)
    }

    pub fn add(&mut self, value: T) -> Result<()> {
        self.tree.add(value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        self.tree.erase(ndx)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.tree.clear()
    }

    pub fn destroy(&mut self) {
        self.tree.destroy();
    }

    pub fn leaf_at(&self, ndx: usize) -> (ArrayBasic<T>, usize) {
        self.tree.leaf_at(ndx)
    }

    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        self.tree.write(writer)
    }

    fn clamp_end(&self, end: usize) -> usize {
        if end == NPOS {
            self.size()
        } else {
            end.min(self.size())
        }
    }

    /// First row in `[start, end)` equal to `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: T, start: usize, end: usize) -> usize {
        let end = self.clamp_end(end);
        let mut found = NOT_FOUND;
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                let i = leaf.find_first(value, s, e);
                if i != NOT_FOUND {
                    found = offset + i;
                    return false;
                }
                offset + leaf.size() < end
            });
        }
        found
    }

    /// Sum over `[start, end)`, accumulated in `f64`.
    pub fn sum(&self, start: usize, end: usize) -> f64 {
        let end = self.clamp_end(end);
        let mut total = 0.0;
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                total += leaf.sum(s, e);
                offset + leaf.size() < end
            });
        }
        total
    }

    pub fn minimum(&self, start: usize, end: usize) -> Option<(T, usize)> {
        self.extreme(start, end, |leaf, s, e| leaf.minimum(s, e), |v, best| v < best)
    }

    pub fn maximum(&self, start: usize, end: usize) -> Option<(T, usize)> {
        self.extreme(start, end, |leaf, s, e| leaf.maximum(s, e), |v, best| v > best)
    }

    fn extreme(
        &self,
        start: usize,
        end: usize,
        in_leaf: impl Fn(&ArrayBasic<T>, usize, usize) -> Option<(T, usize)>,
        better: impl Fn(T, T) -> bool,
    ) -> Option<(T, usize)> {
        let end = self.clamp_end(end);
        let mut best: Option<(T, usize)> = None;
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                if let Some((v, i)) = in_leaf(leaf, s, e) {
                    if best.map_or(true, |(b, _)| better(v, b)) {
                        best = Some((v, offset + i));
                    }
                }
                offset + leaf.size() < end
            });
        }
        best
    }

    /// Mean of `[start, end)`; 0 for an empty range.
    pub fn average(&self, start: usize, end: usize) -> f64 {
        let end = self.clamp_end(end);
        if start >= end {
            return 0.0;
        }
        self.sum(start, end) / (end - start) as f64
    }
}
