//! Binary column conditions.

use std::marker::PhantomData;

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::{ArrayBinary, LeafCursor, Table};

use super::{ConditionNode, NodeStats};
use crate::condition::{Needle, StringCondition};

/// `column <C> needle` over a binary column. Comparisons are bytewise.
pub struct BinaryNode<C: StringCondition> {
    column: usize,
    needle: Needle,
    stats: NodeStats,
    cursor: LeafCursor<ArrayBinary>,
    _cond: PhantomData<C>,
}

impl<C: StringCondition> Clone for BinaryNode<C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column,
            needle: self.needle.clone(),
            stats: self.stats,
            cursor: self.cursor.clone(),
            _cond: PhantomData,
        }
    }
}

impl<C: StringCondition> BinaryNode<C> {
    pub fn new(column: usize, needle: impl AsRef<[u8]>) -> Self {
        // Binary needles need not be UTF-8.
        let (needle, _) = Needle::new(needle.as_ref());
        Self {
            column,
            needle,
            stats: NodeStats::new(100.0, 100.0),
            cursor: LeafCursor::new(),
            _cond: PhantomData,
        }
    }
}

impl<C: StringCondition> ConditionNode for BinaryNode<C> {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        table.binary_column(self.column)?;
        self.stats = NodeStats::new(100.0, 100.0);
        self.cursor.reset();
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let Ok(column) = table.binary_column(self.column) else {
            return NOT_FOUND;
        };
        let tree = column.tree();
        let mut s = start;
        while s < end {
            let (leaf, leaf_start) = self.cursor.leaf_for(tree, s);
            let leaf_end = (leaf_start + leaf.size()).min(end);
            for i in s..leaf_end {
                if C::matches(&self.needle, leaf.get(i - leaf_start)) {
                    return i;
                }
            }
            s = leaf_end;
        }
        NOT_FOUND
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut NodeStats {
        &mut self.stats
    }

    fn box_clone(&self) -> Box<dyn ConditionNode> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{BeginsWith, Contains, EndsWith};
    use std::sync::Arc;
    use strata_alloc::{Allocator, SlabAlloc};
    use strata_common::{ColumnType, StorageConfig};
    use strata_storage::{Equal, NotEqual};

    fn table() -> Table {
        let config = StorageConfig {
            max_node_size: 2,
            ..StorageConfig::default()
        };
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(config));
        let mut t = Table::new(&alloc, config).unwrap();
        t.add_column(ColumnType::Binary, "blob").unwrap();
        let blobs: [&[u8]; 5] = [&[0, 1, 2], &[], &[0xFF, 0x00], &[1, 2, 3, 4], &[0, 1, 2]];
        t.add_empty_rows(blobs.len()).unwrap();
        for (row, blob) in blobs.iter().enumerate() {
            t.set_binary(0, row, blob).unwrap();
        }
        t
    }

    fn first<C: StringCondition>(t: &Table, needle: &[u8], start: usize) -> usize {
        let mut node = BinaryNode::<C>::new(0, needle);
        node.init(t, &QueryConfig::default()).unwrap();
        node.find_first_local(t, start, t.size())
    }

    #[test]
    fn test_binary_conditions() {
        let t = table();
        assert_eq!(first::<Equal>(&t, &[0, 1, 2], 1), 4);
        assert_eq!(first::<NotEqual>(&t, &[0, 1, 2], 0), 1);
        assert_eq!(first::<Contains>(&t, &[2, 3], 0), 3);
        assert_eq!(first::<BeginsWith>(&t, &[0xFF], 0), 2);
        assert_eq!(first::<EndsWith>(&t, &[4], 0), 3);
        assert_eq!(first::<Equal>(&t, &[9], 0), NOT_FOUND);
        assert_eq!(first::<Equal>(&t, &[], 0), 1);
    }
}
