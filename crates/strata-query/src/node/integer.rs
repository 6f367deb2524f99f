//! Integer column conditions.

use std::marker::PhantomData;

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::{Array, FindState, IntegerCondition, LeafCursor, Table};

use super::{ConditionNode, NodeStats, Siblings};
use crate::access::find_in_int_tree;
use crate::sink::MatchSink;

/// `column <C> value` over an integer, bool or datetime column.
///
/// Aggregation runs `Array::find` directly on the leaves. With no siblings
/// and a sink that accepts raw leaf matches the sink's state receives them
/// with no per-match overhead; otherwise every match is confirmed against
/// the siblings first.
pub struct IntegerNode<C: IntegerCondition> {
    column: usize,
    value: i64,
    stats: NodeStats,
    cursor: LeafCursor<Array>,
    max_node_size: usize,
    bitwidth_time_unit: f64,
    _cond: PhantomData<C>,
}

impl<C: IntegerCondition> Clone for IntegerNode<C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column,
            value: self.value,
            stats: self.stats,
            cursor: self.cursor.clone(),
            max_node_size: self.max_node_size,
            bitwidth_time_unit: self.bitwidth_time_unit,
            _cond: PhantomData,
        }
    }
}

impl<C: IntegerCondition> IntegerNode<C> {
    pub fn new(column: usize, value: i64) -> Self {
        Self {
            column,
            value,
            stats: NodeStats::new(100.0, 1.0 / 4.0),
            cursor: LeafCursor::new(),
            max_node_size: 1,
            bitwidth_time_unit: QueryConfig::default().bitwidth_time_unit,
            _cond: PhantomData,
        }
    }

    fn leaf_time(max_node_size: usize, bitwidth_time_unit: f64, width: usize) -> f64 {
        if width == 0 {
            1.0 / max_node_size as f64
        } else {
            width as f64 / bitwidth_time_unit
        }
    }
}

/// Confirms leaf matches against the siblings before reporting them.
struct LocalProbe<'p, 'n> {
    table: &'p Table,
    sink: &'p mut dyn MatchSink,
    siblings: &'p mut Siblings<'n>,
    local_limit: usize,
    local_matches: usize,
    last: usize,
    stopped: bool,
}

impl FindState for LocalProbe<'_, '_> {
    fn match_index(&mut self, index: usize, _value: i64) -> bool {
        self.local_matches += 1;
        self.last = index;
        if self.siblings.confirm(self.table, index) && !self.sink.report(index) {
            self.stopped = true;
            return false;
        }
        self.local_matches < self.local_limit
    }
}

impl<C: IntegerCondition> ConditionNode for IntegerNode<C> {
    fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()> {
        table.int_column(self.column)?;
        self.stats = NodeStats::new(100.0, 1.0 / 4.0);
        self.cursor.reset();
        self.max_node_size = table.config().max_node_size;
        self.bitwidth_time_unit = config.bitwidth_time_unit;
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let Ok(column) = table.int_column(self.column) else {
            return NOT_FOUND;
        };
        let (max, unit) = (self.max_node_size, self.bitwidth_time_unit);
        let dt = &mut self.stats.dt;
        find_in_int_tree::<C>(&mut self.cursor, column.tree(), self.value, start, end, |width| {
            *dt = Self::leaf_time(max, unit, width);
        })
    }

    fn aggregate_local(
        &mut self,
        table: &Table,
        sink: &mut dyn MatchSink,
        siblings: &mut Siblings<'_>,
        start: usize,
        end: usize,
        local_limit: usize,
    ) -> usize {
        let Ok(column) = table.int_column(self.column) else {
            return end;
        };
        if start >= end {
            return end;
        }
        let (leaf, _) = self.cursor.leaf_for(column.tree(), start);
        self.stats.dt = Self::leaf_time(self.max_node_size, self.bitwidth_time_unit, leaf.width());

        if siblings.is_empty() {
            let reported = sink.match_count();
            let fast = sink
                .fast_state(column)
                .map(|state| column.find_with::<C, _>(self.value, start, end, state));
            if let Some(cont) = fast {
                let local = sink.match_count() - reported;
                self.stats.dd = (end - start) as f64 / (local as f64 + 1.0);
                return if cont { end } else { NOT_FOUND };
            }
        }

        let mut probe = LocalProbe {
            table,
            sink,
            siblings,
            local_limit,
            local_matches: 0,
            last: start,
            stopped: false,
        };
        column.find_with::<C, _>(self.value, start, end, &mut probe);
        if probe.stopped {
            return NOT_FOUND;
        }
        let local = probe.local_matches as f64;
        if probe.local_matches >= local_limit {
            self.stats.dd = (probe.last + 1 - start) as f64 / (local + 1.0);
            probe.last + 1
        } else {
            self.stats.dd = (end - start) as f64 / (local + 1.0);
            end
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
