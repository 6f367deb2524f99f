//! Link and link-list columns.
//!
//! A link column stores `target + 1` per row, with 0 meaning no link. A
//! link-list column stores per row either 0 (empty list) or the ref of a
//! node holding the target rows.

use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::array::{Array, ArrayParent, ArrayType};
use crate::bptree::LeafArray;
use crate::write::ArrayWriter;

use super::{BpTree, IntColumn};

// ============================================================================
// LinkColumn
// ============================================================================

/// A column of optional links to rows of a target table.
pub struct LinkColumn {
    values: IntColumn,
}

impl LinkColumn {
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        Ok(Self {
            values: IntColumn::create(alloc, max_node_size)?,
        })
    }

    /// Raw `target + 1` values.
    pub fn values(&self) -> &IntColumn {
        &self.values
    }

    pub fn size(&self) -> usize {
        self.values.size()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get_link(&self, row: usize) -> Option<usize> {
        match self.values.get(row) {
            0 => None,
            v => Some(v as usize - 1),
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        self.values.get(row) == 0
    }

    pub fn set_link(&mut self, row: usize, target: Option<usize>) -> Result<()> {
        self.values.set(row, target.map_or(0, |t| t as i64 + 1))
    }

    /// Inserts a row without a link.
    pub fn insert(&mut self, row: usize) -> Result<()> {
        self.values.insert(row, 0)
    }

    pub fn erase(&mut self, row: usize) -> Result<()> {
        self.values.erase(row)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.values.clear()
    }

    pub fn destroy(&mut self) {
        self.values.destroy();
    }

    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        self.values.write(writer)
    }
}

// ============================================================================
// RefLeaf
// ============================================================================

/// A `has_refs` integer leaf; destroying it frees the nodes it references.
#[derive(Debug, Clone)]
pub struct RefLeaf(Array);

impl RefLeaf {
    pub fn as_array(&self) -> &Array {
        &self.0
    }
}

impl LeafArray for RefLeaf {
    type Value = i64;

    fn create_leaf(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        Ok(RefLeaf(Array::create_new(alloc, ArrayType::HasRefs)?))
    }

    fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        RefLeaf(Array::from_mem(alloc, mem))
    }

    fn leaf_ref(&self) -> Ref {
        self.0.get_ref()
    }

    fn leaf_size(&self) -> usize {
        self.0.size()
    }

    fn leaf_get(&self, ndx: usize) -> i64 {
        self.0.get(ndx)
    }

    fn leaf_set(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.0.set(ndx, value)
    }

    fn leaf_insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        self.0.insert(ndx, value)
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.0.erase(ndx)
    }

    fn leaf_truncate(&mut self, size: usize) -> Result<()> {
        self.0.truncate(size)
    }

    fn leaf_destroy(&mut self) {
        self.0.destroy_deep();
    }

    fn set_ndx_in_parent(&mut self, ndx: usize) {
        self.0.set_ndx_in_parent(ndx);
    }

    fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        self.0.update_parent(parent)
    }
}

// ============================================================================
// LinkListColumn
// ============================================================================

/// A column of ordered target-row lists.
pub struct LinkListColumn {
    lists: BpTree<RefLeaf>,
}

impl LinkListColumn {
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        Ok(Self {
            lists: BpTree::create(alloc, max_node_size)?,
        })
    }

    pub fn tree(&self) -> &BpTree<RefLeaf> {
        &self.lists
    }

    pub fn size(&self) -> usize {
        self.lists.size()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    fn list(&self, row: usize) -> Option<Array> {
        match self.lists.get(row) {
            0 => None,
            ref_ => Some(Array::from_ref(self.lists.get_alloc(), ref_ as Ref)),
        }
    }

    /// Targets of row `row`, in list order.
    pub fn get_links(&self, row: usize) -> Vec<usize> {
        self.list(row)
            .map(|list| list.to_vec().into_iter().map(|t| t as usize).collect())
            .unwrap_or_default()
    }

    pub fn link_count(&self, row: usize) -> usize {
        self.list(row).map_or(0, |list| list.size())
    }

    /// Returns true if the list of row `row` contains `target`.
    pub fn contains(&self, row: usize, target: usize) -> bool {
        self.list(row)
            .is_some_and(|list| list.find_first(target as i64, 0, NPOS) != NOT_FOUND)
    }

    /// Appends `target` to the list of row `row`.
    pub fn add_link(&mut self, row: usize, target: usize) -> Result<()> {
        match self.list(row) {
            Some(mut list) => {
                let old = list.get_ref();
                list.add(target as i64)?;
                if list.get_ref() != old {
                    self.lists.set(row, list.get_ref() as i64)?;
                }
            }
            None => {
                let mut list = Array::create_new(self.lists.get_alloc(), ArrayType::Normal)?;
                list.add(target as i64)?;
                self.lists.set(row, list.get_ref() as i64)?;
            }
        }
        Ok(())
    }

    /// Removes entry `list_ndx` from the list of row `row`.
    pub fn remove_link(&mut self, row: usize, list_ndx: usize) -> Result<()> {
        let Some(mut list) = self.list(row) else {
            return Ok(());
        };
        if list.size() == 1 {
            list.destroy();
            return self.lists.set(row, 0);
        }
        let old = list.get_ref();
        list.erase(list_ndx)?;
        if list.get_ref() != old {
            self.lists.set(row, list.get_ref() as i64)?;
        }
        Ok(())
    }

    /// Inserts a row with an empty list.
    pub fn insert(&mut self, row: usize) -> Result<()> {
        self.lists.insert(row, 0)
    }

    pub fn erase(&mut self, row: usize) -> Result<()> {
        if let Some(mut list) = self.list(row) {
            list.destroy();
            self.lists.set(row, 0)?;
        }
        self.lists.erase(row)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.lists.clear()
    }

    pub fn destroy(&mut self) {
        self.lists.destroy();
    }

    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        self.lists.write(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_alloc::SlabAlloc;
    use strata_common::StorageConfig;

    #[test]
    fn test_link_column_offsets_targets() {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let mut col = LinkColumn::create(&alloc, 1000).unwrap();
        for _ in 0..3 {
            col.insert(col.size()).unwrap();
        }
        col.set_link(1, Some(0)).unwrap();
        col.set_link(2, Some(7)).unwrap();
        assert_eq!(col.get_link(0), None);
        assert_eq!(col.get_link(1), Some(0));
        assert_eq!(col.values().get(2), 8);
        col.set_link(2, None).unwrap();
        assert!(col.is_null(2));
    }

    #[test]
    fn test_link_lists_free_on_erase() {
        let slab = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let alloc: Arc<dyn Allocator> = slab.clone();
        let mut col = LinkListColumn::create(&alloc, 3).unwrap();
        for _ in 0..10 {
            col.insert(col.size()).unwrap();
        }
        for row in 0..10 {
            for t in 0..row {
                col.add_link(row, t * 3).unwrap();
            }
        }
        assert_eq!(col.link_count(0), 0);
        assert_eq!(col.get_links(4), vec![0, 3, 6, 9]);
        assert!(col.contains(9, 24));
        assert!(!col.contains(9, 25));

        col.remove_link(4, 1).unwrap();
        assert_eq!(col.get_links(4), vec![0, 6, 9]);
        col.remove_link(1, 0).unwrap();
        assert_eq!(col.link_count(1), 0);

        for _ in 0..10 {
            col.erase(0).unwrap();
        }
        col.destroy();
        assert!(slab.is_all_free());
    }
}
