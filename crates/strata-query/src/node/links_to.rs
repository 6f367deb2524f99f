//! Conditions on link and link-list columns.

use strata_common::{QueryConfig, Result, StrataError, NOT_FOUND};
use strata_storage::{Array, Column, Equal, LeafCursor, Table};

use super::{ConditionNode, NodeStats};
use crate::access::find_in_int_tree;

/// Matches rows linking to `target`: a link column pointing at it, or a
/// link list containing it.
#[derive(Clone)]
pub struct LinksToNode {
    column: usize,
    target: usize,
    cursor: LeafCursor<Array>,
    stats: NodeStats,
}

impl LinksToNode {
    pub fn new(column: usize, target: usize) -> Self {
        Self {
            column,
            target,
            cursor: LeafCursor::new(),
            stats: NodeStats::new(10.0, 50.0),
        }
    }
}

impl ConditionNode for LinksToNode {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        match table.column(self.column)? {
            Column::Link(_) | Column::LinkList(_) => {}
            _ => {
                return Err(StrataError::ColumnTypeMismatch {
                    column: self.column,
                    expected: "Link".to_string(),
                    actual: table.get_real_column_type(self.column)?.name().to_string(),
                })
            }
        }
        self.cursor.reset();
        self.stats = NodeStats::new(10.0, 50.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        match table.column(self.column) {
            Ok(Column::Link(c)) => {
                // Stored as target + 1; 0 is a null link.
                let needle = self.target as i64 + 1;
                find_in_int_tree::<Equal>(&mut self.cursor, c.values().tree(), needle, start, end, |_| {})
            }
            Ok(Column::LinkList(c)) => (start..end)
                .find(|&row| c.contains(row, self.target))
                .unwrap_or(NOT_FOUND),
            _ => NOT_FOUND,
        }
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
    use std::sync::Arc;
    use strata_alloc::{Allocator, SlabAlloc};
    use strata_common::{ColumnType, StorageConfig};

    fn table() -> Table {
        let config = StorageConfig {
            max_node_size: 3,
            ..StorageConfig::default()
        };
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(config));
        let mut t = Table::new(&alloc, config).unwrap();
        t.add_column(ColumnType::Link, "owner").unwrap();
        t.add_column(ColumnType::LinkList, "tags").unwrap();
        t.add_column(ColumnType::Int, "n").unwrap();
        t.add_empty_rows(6).unwrap();
        for (row, target) in [(1, 0), (2, 4), (4, 0), (5, 2)] {
            t.set_link(0, row, Some(target)).unwrap();
        }
        for (row, target) in [(0, 3), (0, 1), (3, 1), (5, 7)] {
            t.add_link_list_entry(1, row, target).unwrap();
        }
        t
    }

    fn all(node: &mut LinksToNode, t: &Table) -> Vec<usize> {
        node.init(t, &QueryConfig::default()).unwrap();
        let mut out = Vec::new();
        let mut r = 0;
        loop {
            let m = node.find_first_local(t, r, t.size());
            if m == NOT_FOUND {
                return out;
            }
            out.push(m);
            r = m + 1;
        }
    }

    #[test]
    fn test_link_column() {
        let t = table();
        assert_eq!(all(&mut LinksToNode::new(0, 0), &t), vec![1, 4]);
        assert_eq!(all(&mut LinksToNode::new(0, 4), &t), vec![2]);
        assert_eq!(all(&mut LinksToNode::new(0, 3), &t), Vec::<usize>::new());

        let mut node = LinksToNode::new(0, 0);
        node.init(&t, &QueryConfig::default()).unwrap();
        assert_eq!(node.find_first_local(&t, 2, 4), NOT_FOUND);
    }

    #[test]
    fn test_link_list_column() {
        let t = table();
        assert_eq!(all(&mut LinksToNode::new(1, 1), &t), vec![0, 3]);
        assert_eq!(all(&mut LinksToNode::new(1, 7), &t), vec![5]);
    }

    #[test]
    fn test_other_columns_fail_init() {
        let t = table();
        assert!(matches!(
            LinksToNode::new(2, 0).init(&t, &QueryConfig::default()),
            Err(StrataError::ColumnTypeMismatch { .. })
        ));
    }
}
