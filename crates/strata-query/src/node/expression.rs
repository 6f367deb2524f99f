//! Arithmetic comparison nodes.

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::Table;
use tracing::warn;

use super::{ConditionNode, NodeStats};
use crate::expression::{BoundCompare, Compare};

/// Rows where an arithmetic comparison over their columns holds.
#[derive(Clone)]
pub struct ExpressionNode {
    compare: Compare,
    bound: Option<BoundCompare>,
    stats: NodeStats,
}

impl ExpressionNode {
    pub fn new(compare: Compare) -> Self {
        Self {
            compare,
            bound: None,
            stats: NodeStats::new(10.0, 50.0),
        }
    }
}

impl ConditionNode for ExpressionNode {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        self.bound = Some(self.compare.bind(table)?);
        self.stats = NodeStats::new(10.0, 50.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let Some(bound) = self.bound.as_mut() else {
            return NOT_FOUND;
        };
        match bound.find_first(table, start, end) {
            Ok(row) => row,
            Err(err) => {
                warn!(error = %err, "expression evaluation failed");
                NOT_FOUND
            }
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
