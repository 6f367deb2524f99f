//! String columns.
//!
//! Values are UTF-8 byte strings in binary leaves. An optional
//! [`StringIndex`] is kept in step with every mutation.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::array_binary::ArrayBinary;
use crate::write::ArrayWriter;

use super::{BpTree, StringIndex};

/// A column of strings.
pub struct StringColumn {
    tree: BpTree<ArrayBinary>,
    index: Option<StringIndex>,
}

impl StringColumn {
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        Ok(Self {
            tree: BpTree::create(alloc, max_node_size)?,
            index: None,
        })
    }

    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref, max_node_size: usize) -> Self {
        Self {
            tree: BpTree::from_ref(alloc, ref_, max_node_size),
            index: None,
        }
    }

    pub fn tree(&self) -> &BpTree<ArrayBinary> {
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

    pub fn get(&self, ndx: usize) -> String {
        String::from_utf8_lossy(&self.tree.get(ndx)).into_owned()
    }

    pub fn set(&mut self, ndx: usize, value: &str) -> Result<()> {
        if let Some(index) = self.index.as_mut() {
            let old = String::from_utf8_lossy(&self.tree.get(ndx)).into_owned();
            index.set(ndx, &old, value);
        }
        self.tree.set(ndx, value.as_bytes().to_vec())
    }

    pub fn insert(&mut self, ndx: usize, value: &str) -> Result<()> {
        let size = self.size();
        let row = if ndx == NPOS { size } else { ndx };
        self.tree.insert(row, value.as_bytes().to_vec())?;
        if let Some(index) = self.index.as_mut() {
            index.insert(row, value, row == size);
        }
        Ok(())
    }

    pub fn add(&mut self, value: &str) -> Result<()> {
        self.insert(NPOS, value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        if self.index.is_some() {
            let old = self.get(ndx);
            let is_last = ndx + 1 == self.size();
            if let Some(index) = self.index.as_mut() {
                index.erase(ndx, &old, is_last);
            }
        }
        self.tree.erase(ndx)
    }

    pub fn clear(&mut self) -> Result<()> {
        if let Some(index) = self.index.as_mut() {
            index.clear();
        }
        self.tree.clear()
    }

    pub fn destroy(&mut self) {
        self.tree.destroy();
    }

    pub fn leaf_at(&self, ndx: usize) -> (ArrayBinary, usize) {
        self.tree.leaf_at(ndx)
    }

    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        self.tree.write(writer)
    }

    // ===== Search index =====

    /// Builds a search index over the current values.
    pub fn add_search_index(&mut self) {
        let values: Vec<String> = (0..self.size()).map(|i| self.get(i)).collect();
        self.index = Some(StringIndex::build(values.iter().enumerate().map(|(i, v)| (i, v.as_str()))));
    }

    pub fn remove_search_index(&mut self) {
        self.index = None;
    }

    pub fn has_search_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn search_index(&self) -> Option<&StringIndex> {
        self.index.as_ref()
    }

    pub(crate) fn take_search_index(&mut self) -> Option<StringIndex> {
        self.index.take()
    }

    // ===== Search =====

    /// First row in `[start, end)` holding `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: &str, start: usize, end: usize) -> usize {
        let end = if end == NPOS { self.size() } else { end.min(self.size()) };
        if let Some(index) = &self.index {
            let rows = index.find_all(value);
            let pos = rows.partition_point(|&r| r < start);
            return match rows.get(pos) {
                Some(&r) if r < end => r,
                _ => NOT_FOUND,
            };
        }
        let needle = value.as_bytes();
        let mut found = NOT_FOUND;
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                let i = leaf.find_first(needle, s, e);
                if i != NOT_FOUND {
                    found = offset + i;
                    return false;
                }
                offset + leaf.size() < end
            });
        }
        found
    }

    /// Every row in `[start, end)` holding `value`.
    pub fn find_all(&self, value: &str, start: usize, end: usize) -> Vec<usize> {
        let end = if end == NPOS { self.size() } else { end.min(self.size()) };
        if let Some(index) = &self.index {
            return index.find_all(value).iter().copied().filter(|&r| r >= start && r < end).collect();
        }
        let needle = value.as_bytes();
        let mut out = Vec::new();
        if start < end {
            self.tree.visit_leaves(start, |leaf, offset| {
                let s = start.saturating_sub(offset);
                let e = (end - offset).min(leaf.size());
                out.extend((s..e).filter(|&i| leaf.get(i) == needle).map(|i| offset + i));
                offset + leaf.size() < end
            });
        }
        out
    }

    pub fn count(&self, value: &str) -> usize {
        match &self.index {
            Some(index) => index.count(value),
            None => self.find_all(value, 0, NPOS).len(),
        }
    }
}
