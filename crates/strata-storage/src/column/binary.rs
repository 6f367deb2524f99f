//! Binary (byte string) columns.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::array_binary::ArrayBinary;
use crate::write::ArrayWriter;

use super::BpTree;

/// A column of byte strings.
pub struct BinaryColumn {
    tree: BpTree<ArrayBinary>,
}

impl BinaryColumn {
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

    pub fn get(&self, ndx: usize) -> Vec<u8> {
        self.tree.get(ndx)
    }

    pub fn set(&mut self, ndx: usize, value: &[u8]) -> Result<()> {
        self.tree.set(ndx, value.to_vec())
    }

    pub fn insert(&mut self, ndx: usize, value: &[u8]) -> Result<()> {
        self.tree.insert(ndx, value.to_vec())
    }

    pub fn add(&mut self, value: &[u8]) -> Result<()> {
        self.tree.add(value.to_vec())
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

    pub fn leaf_at(&self, ndx: usize) -> (ArrayBinary, usize) {
        self.tree.leaf_at(ndx)
    }

    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        self.tree.write(writer)
    }

    /// First row in `[start, end)` holding `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: &[u8], start: usize, end: usize) -> usize {
        let end = if end == NPOS { self.size() } else { end.min(self.size()) };
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_alloc::SlabAlloc;
    use strata_common::StorageConfig;

    #[test]
    fn test_binary_column_edits() {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let mut col = BinaryColumn::create(&alloc, 3).unwrap();
        for i in 0..10u8 {
            col.add(&[i, i + 1]).unwrap();
        }
        col.insert(4, b"").unwrap();
        col.set(9, b"longer value").unwrap();
        assert_eq!(col.size(), 11);
        assert_eq!(col.get(4), Vec::<u8>::new());
        assert_eq!(col.get(5), vec![4, 5]);
        assert_eq!(col.find_first(b"longer value", 0, NPOS), 9);
        assert_eq!(col.find_first(&[9, 10], 0, NPOS), 10);
        assert_eq!(col.find_first(&[9, 10], 0, 10), NOT_FOUND);
        col.erase(0).unwrap();
        assert_eq!(col.get(0), vec![1, 2]);
    }
}
