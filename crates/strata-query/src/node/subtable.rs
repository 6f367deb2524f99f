//! Conditions on subtables.

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::Table;
use tracing::warn;

use super::{Chain, ConditionNode, NodeStats};

/// Matches a row if any row of its subtable satisfies the nested chain.
///
/// A degenerate (never created) or empty subtable does not match.
#[derive(Clone)]
pub struct SubtableNode {
    column: usize,
    chain: Chain,
    config: QueryConfig,
    stats: NodeStats,
}

impl SubtableNode {
    pub fn new(column: usize, chain: Chain) -> Self {
        Self {
            column,
            config: *chain.config(),
            chain,
            stats: NodeStats::new(10.0, 100.0),
        }
    }
}

impl ConditionNode for SubtableNode {
    fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()> {
        let spec = table.subtable_column(self.column)?.spec();
        // Check the nested conditions against the subtable schema up front.
        let mut prototype = Table::with_spec(table.get_alloc(), *table.config(), spec)?;
        let checked = self.chain.init(&prototype, config);
        prototype.destroy();
        checked?;
        self.config = *config;
        self.stats = NodeStats::new(10.0, 100.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        for row in start..end {
            let Some(subtable) = table.get_subtable(self.column, row) else {
                continue;
            };
            if subtable.is_empty() {
                continue;
            }
            if let Err(err) = self.chain.init(subtable, &self.config) {
                warn!(column = self.column, row, error = %err, "skipping subtable");
                continue;
            }
            if self.chain.find_first(subtable, 0, subtable.size()) != NOT_FOUND {
                return row;
            }
        }
        NOT_FOUND
    }

    fn validate(&self) -> Option<String> {
        self.chain.validate()
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
