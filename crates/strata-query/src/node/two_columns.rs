//! Comparison of two columns of the same row.

use std::marker::PhantomData;

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::{Condition, LeafCursor, Table};

use super::{ConditionNode, NodeStats};
use crate::access::PairValue;

/// `col1 <C> col2`, row by row. Both columns hold values of type `T`.
pub struct TwoColumnsNode<T: PairValue, C: Condition> {
    col1: usize,
    col2: usize,
    cursor1: LeafCursor<T::Leaf>,
    cursor2: LeafCursor<T::Leaf>,
    stats: NodeStats,
    _cond: PhantomData<C>,
}

impl<T: PairValue, C: Condition> Clone for TwoColumnsNode<T, C> {
    fn clone(&self) -> Self {
        Self {
            col1: self.col1,
            col2: self.col2,
            cursor1: self.cursor1.clone(),
            cursor2: self.cursor2.clone(),
            stats: self.stats,
            _cond: PhantomData,
        }
    }
}

impl<T: PairValue, C: Condition> TwoColumnsNode<T, C> {
    pub fn new(col1: usize, col2: usize) -> Self {
        Self {
            col1,
            col2,
            cursor1: LeafCursor::new(),
            cursor2: LeafCursor::new(),
            stats: NodeStats::new(100.0, 100.0),
            _cond: PhantomData,
        }
    }
}

impl<T: PairValue, C: Condition> ConditionNode for TwoColumnsNode<T, C> {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        T::tree(table, self.col1)?;
        T::tree(table, self.col2)?;
        self.cursor1.reset();
        self.cursor2.reset();
        self.stats = NodeStats::new(100.0, 100.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let (Ok(t1), Ok(t2)) = (T::tree(table, self.col1), T::tree(table, self.col2)) else {
            return NOT_FOUND;
        };
        T::find_pair::<C>((&mut self.cursor1, t1), (&mut self.cursor2, t2), start, end)
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
    use crate::node::test_support::int_table;
    use std::sync::Arc;
    use strata_alloc::{Allocator, SlabAlloc};
    use strata_common::{ColumnType, StorageConfig};
    use strata_storage::{Equal, Greater, Less};

    fn all<N: ConditionNode>(node: &mut N, t: &Table) -> Vec<usize> {
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
    fn test_int_columns_across_mixed_widths() {
        let a: Vec<i64> = vec![1, 5, 300, -2, 7, 7, 70_000, 0, 9, 1];
        let b: Vec<i64> = vec![1, 4, 3, -1, 8, 7, 69_999, 0, 10, 0];
        let table = int_table(&[&a, &b]);
        assert_eq!(all(&mut TwoColumnsNode::<i64, Equal>::new(0, 1), &table), vec![0, 5, 7]);
        assert_eq!(all(&mut TwoColumnsNode::<i64, Greater>::new(0, 1), &table), vec![1, 2, 6, 9]);
        assert_eq!(all(&mut TwoColumnsNode::<i64, Less>::new(0, 1), &table), vec![3, 4, 8]);
    }

    #[test]
    fn test_double_columns() {
        let config = StorageConfig {
            max_node_size: 3,
            ..StorageConfig::default()
        };
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(config));
        let mut t = Table::new(&alloc, config).unwrap();
        t.add_column(ColumnType::Double, "x").unwrap();
        t.add_column(ColumnType::Double, "y").unwrap();
        t.add_empty_rows(7).unwrap();
        for row in 0..7 {
            t.set_double(0, row, row as f64).unwrap();
            t.set_double(1, row, 6.0 - row as f64).unwrap();
        }
        assert_eq!(all(&mut TwoColumnsNode::<f64, Greater>::new(0, 1), &t), vec![4, 5, 6]);
        assert_eq!(all(&mut TwoColumnsNode::<f64, Equal>::new(0, 1), &t), vec![3]);
    }

    #[test]
    fn test_mismatched_types_fail_init() {
        let table = int_table(&[&[1, 2]]);
        let mut node = TwoColumnsNode::<f64, Equal>::new(0, 0);
        assert!(node.init(&table, &QueryConfig::default()).is_err());
    }
}
