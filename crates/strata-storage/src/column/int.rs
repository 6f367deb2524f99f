//! Integer columns (int, bool and datetime values).

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::array::find::{CollectAll, CountMatches, FirstMatch};
use crate::array::{Array, Equal, FindState, IntegerCondition};
use crate::write::ArrayWriter;

use super::BpTree;

/// A column of packed 64-bit integers.
pub struct IntColumn {
    tree: BpTree<Array>,
}

impl IntColumn {
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

    /// Underlying tree, for leaf level scans.
    pub fn tree(&self) -> &BpTree<Array> {
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

    pub fn get(&self, ndx: usize) -> i64 {
        self.tree.get(ndx)
    }

    pub fn set(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.tree.set(ndx, value)
    }

    pub fn insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.tree.insert(ndx, value)
    }

    pub fn add(&mut self, value: i64) -> Result<()> {
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

    /// Leaf holding row `ndx` and the row of its first element.
    pub fn leaf_at(&self, ndx: usize) -> (Array, usize) {
        self.tree.leaf_at(ndx)
    }

    /// Adds `diff` to row `ndx`.
    pub fn adjust(&mut self, ndx: usize, diff: i64) -> Result<()> {
        let v = self.get(ndx);
        self.set(ndx, v.wrapping_add(diff))
    }

    /// Adds `diff` to every row.
    pub fn adjust_all(&mut self, diff: i64) -> Result<()> {
        self.tree.update_leaves(|leaf| {
            let n = leaf.size();
            leaf.adjust_range(0, n, diff)
        })
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

    // ===== Search =====

    /// Runs `Array::find` over every leaf overlapping `[start, end)`,
    /// reporting column row numbers. Returns false if `state` stopped.
    pub fn find_with<C, S>(&self, value: i64, start: usize, end: usize, state: &mut S) -> bool
    where
        C: IntegerCondition,
        S: FindState + ?Sized,
    {
        let end = self.clamp_end(end);
        if start >= end {
            return true;
        }
        let mut cont = true;
        self.tree.visit_leaves(start, |leaf, offset| {
            let local_start = start.saturating_sub(offset);
            let local_end = (end - offset).min(leaf.size());
            cont = leaf.find::<C, S>(value, local_start, local_end, offset, state);
            cont && offset + leaf.size() < end
        });
        cont
    }

    /// First row in `[start, end)` equal to `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: i64, start: usize, end: usize) -> usize {
        let mut state = FirstMatch { index: NOT_FOUND };
        self.find_with::<Equal, _>(value, start, end, &mut state);
        state.index
    }

    /// Every row in `[start, end)` equal to `value`.
    pub fn find_all(&self, value: i64, start: usize, end: usize) -> Vec<usize> {
        let mut out = Vec::new();
        self.find_with::<Equal, _>(value, start, end, &mut CollectAll { out: &mut out });
        out
    }

    pub fn count(&self, value: i64) -> usize {
        let mut state = CountMatches::default();
        self.find_with::<Equal, _>(value, 0, NPOS, &mut state);
        state.count
    }

    /// First row whose value is `>= value`. The column must be sorted.
    pub fn lower_bound(&self, value: i64) -> usize {
        if self.tree.root_is_leaf() {
            return self.leaf_at(0).0.lower_bound_int(value);
        }
        self.partition_point(|v| v < value)
    }

    /// First row whose value is `> value`. The column must be sorted.
    pub fn upper_bound(&self, value: i64) -> usize {
        if self.tree.root_is_leaf() {
            return self.leaf_at(0).0.upper_bound_int(value);
        }
        self.partition_point(|v| v <= value)
    }

    fn partition_point(&self, pred: impl Fn(i64) -> bool) -> usize {
        let (mut lo, mut hi) = (0, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if pred(self.get(mid)) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    // ===== Aggregates =====

    /// Wrapping sum over `[start, end)`.
    pub fn sum(&self, start: usize, end: usize) -> i64 {
        let end = self.clamp_end(end);
        let mut total = 0i64;
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                total = total.wrapping_add(leaf.sum(s, e));
                offset + leaf.size() < end
            });
        }
        total
    }

    /// Smallest value in `[start, end)` and its first row.
    pub fn minimum(&self, start: usize, end: usize) -> Option<(i64, usize)> {
        self.extreme(start, end, |leaf, s, e| leaf.minimum(s, e), |v, best| v < best)
    }

    /// Largest value in `[start, end)` and its first row.
    pub fn maximum(&self, start: usize, end: usize) -> Option<(i64, usize)> {
        self.extreme(start, end, |leaf, s, e| leaf.maximum(s, e), |v, best| v > best)
    }

    fn extreme(
        &self,
        start: usize,
        end: usize,
        in_leaf: impl Fn(&Array, usize, usize) -> Option<(i64, usize)>,
        better: impl Fn(i64, i64) -> bool,
    ) -> Option<(i64, usize)> {
        let end = self.clamp_end(end);
        let mut best: Option<(i64, usize)> = None;
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
        self.sum(start, end) as f64 / (end - start) as f64
    }
}
