//! Condition nodes and the cost-adaptive scheduler.
//!
//! A query is a chain of condition nodes that must all hold for a row to
//! match. Every node can search its own condition (`find_first_local`) and
//! keeps running statistics of how costly that is:
//!
//! ```text
//!   dD  average row distance between local matches   (high = selective)
//!   dT  time to test one more row                    (0 = index lookup)
//!
//!   cost = distance_weight * bitwidth_time_unit / dD + dT
//! ```
//!
//! Aggregation lets the cheapest node lead for a window of rows. Each local
//! match of the leader is confirmed by testing the single row `(r, r + 1)`
//! on its siblings. After every round the other nodes are probed briefly so
//! their statistics stay current, and the leader is chosen again:
//!
//! ```text
//!   [ leader: aggregate findlocals matches ][ probe B ][ probe C ][ leader ...
//!   start ------------------------------------------------------------> end
//! ```

mod binary;
mod expression;
mod float;
mod integer;
mod links_to;
mod not;
mod or;
mod string;
mod subtable;
mod two_columns;

pub use binary::BinaryNode;
pub use expression::ExpressionNode;
pub use float::FloatDoubleNode;
pub use integer::IntegerNode;
pub use links_to::LinksToNode;
pub use not::NotNode;
pub use or::OrNode;
pub use string::{StringEqualNode, StringNode};
pub use subtable::SubtableNode;
pub use two_columns::TwoColumnsNode;

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::Table;
use tracing::trace;

use crate::sink::MatchSink;

/// Running statistics of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStats {
    /// Average row distance between local matches.
    pub dd: f64,
    /// Time overhead of testing one more row.
    pub dt: f64,
    /// Rounds this node has run in `aggregate_local`.
    pub probes: usize,
    /// Confirmed matches reported while this node led.
    pub matches: usize,
}

impl NodeStats {
    pub fn new(dd: f64, dt: f64) -> Self {
        Self {
            dd,
            dt,
            probes: 0,
            matches: 0,
        }
    }

    pub fn cost(&self, config: &QueryConfig) -> f64 {
        config.distance_weight * config.bitwidth_time_unit / self.dd + self.dt
    }
}

/// The other nodes of a chain, seen from the node that currently leads.
pub struct Siblings<'n> {
    before: &'n mut [Box<dyn ConditionNode>],
    after: &'n mut [Box<dyn ConditionNode>],
}

impl<'n> Siblings<'n> {
    pub fn new(before: &'n mut [Box<dyn ConditionNode>], after: &'n mut [Box<dyn ConditionNode>]) -> Self {
        Self { before, after }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    /// Returns true if every sibling matches `row`.
    pub fn confirm(&mut self, table: &Table, row: usize) -> bool {
        self.before
            .iter_mut()
            .chain(self.after.iter_mut())
            .all(|node| node.find_first_local(table, row, row + 1) == row)
    }
}

/// A condition evaluated over the rows of a table.
pub trait ConditionNode: Send + Sync {
    /// Binds the node to `table` and resets its statistics and memos.
    fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()>;

    /// First row in `[start, end)` satisfying this node alone, or
    /// `NOT_FOUND`.
    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize;

    /// Reports up to `local_limit` local matches in `[start, end)` that all
    /// `siblings` confirm, and updates `dD`.
    ///
    /// Returns the row to resume at, or `NOT_FOUND` once the sink stopped.
    fn aggregate_local(
        &mut self,
        table: &Table,
        sink: &mut dyn MatchSink,
        siblings: &mut Siblings<'_>,
        start: usize,
        end: usize,
        local_limit: usize,
    ) -> usize {
        let mut local_matches = 0usize;
        let mut r = start;
        loop {
            if local_matches == local_limit {
                self.stats_mut().dd = (r - start) as f64 / (local_matches as f64 + 1.1);
                return r;
            }
            let m = self.find_first_local(table, r, end);
            if m == NOT_FOUND {
                self.stats_mut().dd = (end - start) as f64 / (local_matches as f64 + 1.1);
                return end;
            }
            local_matches += 1;
            if siblings.confirm(table, m) && !sink.report(m) {
                return NOT_FOUND;
            }
            r = m + 1;
        }
    }

    /// Construction error of this node, if any.
    fn validate(&self) -> Option<String> {
        None
    }

    fn stats(&self) -> &NodeStats;

    fn stats_mut(&mut self) -> &mut NodeStats;

    fn box_clone(&self) -> Box<dyn ConditionNode>;
}

impl Clone for Box<dyn ConditionNode> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

// ============================================================================
// Chain
// ============================================================================

/// A conjunction of condition nodes.
#[derive(Clone)]
pub struct Chain {
    nodes: Vec<Box<dyn ConditionNode>>,
    config: QueryConfig,
}

impl Chain {
    pub fn new(nodes: Vec<Box<dyn ConditionNode>>, config: QueryConfig) -> Self {
        Self { nodes, config }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Box<dyn ConditionNode>] {
        &self.nodes
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()> {
        self.config = *config;
        for node in &mut self.nodes {
            node.init(table, config)?;
        }
        Ok(())
    }

    /// First construction error in chain order.
    pub fn validate(&self) -> Option<String> {
        self.nodes.iter().find_map(|node| node.validate())
    }

    /// First row in `[start, end)` satisfying every node, or `NOT_FOUND`.
    ///
    /// Nodes take turns searching from the last candidate row; a row is a
    /// match once every node has returned it without moving on. An empty
    /// chain matches every row.
    pub fn find_first(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let count = self.nodes.len();
        if count == 0 {
            return if start < end { start } else { NOT_FOUND };
        }
        let mut start = start;
        let mut next = 0;
        let mut first = 0;
        while start < end {
            let m = self.nodes[next].find_first_local(table, start, end);
            next = (next + 1) % count;
            if m == start {
                if next == first {
                    return m;
                }
            } else {
                first = next;
                start = m;
            }
        }
        NOT_FOUND
    }

    /// Reports every row in `[start, end)` satisfying the chain to `sink`,
    /// until the sink stops.
    pub fn aggregate(&mut self, table: &Table, sink: &mut dyn MatchSink, start: usize, end: usize) {
        if self.nodes.is_empty() {
            for row in start..end {
                if !sink.report(row) {
                    return;
                }
            }
            return;
        }

        let config = self.config;
        let mut start = start;
        while start < end {
            let best = self.best_node();
            let window = if self.nodes[best].stats().dt == 0.0 {
                end
            } else {
                end.min(start.saturating_add(config.aggregate_window))
            };
            start = self.run_local(best, table, sink, start, window, config.findlocals);

            // Probe the others so their statistics stay current. A node
            // whose cost is all overhead can never become cheaper.
            for c in 0..self.nodes.len() {
                if start >= end {
                    break;
                }
                let stats = self.nodes[c].stats();
                let dt = stats.dt;
                if c == best || dt >= stats.cost(&config) {
                    continue;
                }
                let window = if dt == 0.0 {
                    end
                } else {
                    end.min(start.saturating_add(config.bestdist))
                };
                trace!(node = c, start, window, "probing condition node");
                start = self.run_local(c, table, sink, start, window, config.probe_matches);
            }
        }
    }

    /// Index of the node with the lowest cost; ties go to the earliest.
    fn best_node(&self) -> usize {
        let mut best = 0;
        let mut best_cost = f64::INFINITY;
        for (i, node) in self.nodes.iter().enumerate() {
            let cost = node.stats().cost(&self.config);
            if cost < best_cost {
                best = i;
                best_cost = cost;
            }
        }
        best
    }

    fn run_local(
        &mut self,
        index: usize,
        table: &Table,
        sink: &mut dyn MatchSink,
        start: usize,
        end: usize,
        local_limit: usize,
    ) -> usize {
        let (before, rest) = self.nodes.split_at_mut(index);
        let Some((node, after)) = rest.split_first_mut() else {
            return NOT_FOUND;
        };
        let mut siblings = Siblings::new(before, after);
        let reported = sink.match_count();
        let next = node.aggregate_local(table, sink, &mut siblings, start, end, local_limit);
        let stats = node.stats_mut();
        stats.probes += 1;
        stats.matches += sink.match_count() - reported;
        next
    }
}
