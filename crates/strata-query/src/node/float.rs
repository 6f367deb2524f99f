//! Float and double column conditions.

use std::marker::PhantomData;

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::{ArrayBasic, Condition, LeafCursor, Table};

use super::{ConditionNode, NodeStats};
use crate::access::FloatKind;

/// `column <C> value` over a float or double column.
pub struct FloatDoubleNode<T: FloatKind, C: Condition> {
    column: usize,
    value: T,
    stats: NodeStats,
    cursor: LeafCursor<ArrayBasic<T>>,
    _cond: PhantomData<C>,
}

impl<T: FloatKind, C: Condition> Clone for FloatDoubleNode<T, C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column,
            value: self.value,
            stats: self.stats,
            cursor: self.cursor.clone(),
            _cond: PhantomData,
        }
    }
}

impl<T: FloatKind, C: Condition> FloatDoubleNode<T, C> {
    pub fn new(column: usize, value: T) -> Self {
        Self {
            column,
            value,
            stats: NodeStats::new(100.0, 1.0),
            cursor: LeafCursor::new(),
            _cond: PhantomData,
        }
    }
}

impl<T: FloatKind, C: Condition> ConditionNode for FloatDoubleNode<T, C> {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        T::column(table, self.column)?;
        self.stats = NodeStats::new(100.0, 1.0);
        self.cursor.reset();
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let Ok(column) = T::column(table, self.column) else {
            return NOT_FOUND;
        };
        let tree = column.tree();
        let mut s = start;
        while s < end {
            let (leaf, leaf_start) = self.cursor.leaf_for(tree, s);
            let leaf_end = (leaf_start + leaf.size()).min(end);
            for i in s..leaf_end {
                if C::eval(leaf.get(i - leaf_start), self.value) {
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
