//! Negation of a condition chain.

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::Table;

use super::{Chain, ConditionNode, NodeStats};

/// Matches a row if the inner chain does not.
///
/// The node remembers the range `[from, last)` it already knows the inner
/// chain matches, and whether `last` itself is a known non-match. Forward
/// scans reuse that knowledge; a scan that starts before `from` discards it.
#[derive(Clone)]
pub struct NotNode {
    chain: Chain,
    from: usize,
    last: usize,
    was_match: bool,
    stats: NodeStats,
}

impl NotNode {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            from: 0,
            last: 0,
            was_match: false,
            stats: NodeStats::new(10.0, 50.0),
        }
    }

    fn forget(&mut self, start: usize) {
        self.from = start;
        self.last = start;
        self.was_match = false;
    }
}

impl ConditionNode for NotNode {
    fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()> {
        self.chain.init(table, config)?;
        self.forget(0);
        self.stats = NodeStats::new(10.0, 50.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        if start >= end {
            return NOT_FOUND;
        }
        if start < self.from {
            self.forget(start);
        }
        if self.last >= start {
            if self.was_match {
                return if self.last < end { self.last } else { NOT_FOUND };
            }
            if self.last >= end {
                return NOT_FOUND;
            }
        } else {
            self.forget(start);
        }

        for row in self.last..end {
            if self.chain.find_first(table, row, row + 1) == NOT_FOUND {
                self.last = row;
                self.was_match = true;
                return row;
            }
        }
        self.last = end;
        self.was_match = false;
        NOT_FOUND
    }

    fn validate(&self) -> Option<String> {
        if self.chain.is_empty() {
            return Some("Missing argument to Not".to_string());
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::int_table;
    use crate::node::IntegerNode;
    use strata_storage::{Equal, Less};

    fn not(node: Box<dyn ConditionNode>) -> NotNode {
        NotNode::new(Chain::new(vec![node], QueryConfig::default()))
    }

    #[test]
    fn test_complement() {
        let values: Vec<i64> = (0..12).map(|i| i % 3).collect();
        let table = int_table(&[&values]);
        let mut node = not(Box::new(IntegerNode::<Equal>::new(0, 0)));
        node.init(&table, &QueryConfig::default()).unwrap();
        let mut found = Vec::new();
        let mut r = 0;
        loop {
            let m = node.find_first_local(&table, r, 12);
            if m == NOT_FOUND {
                break;
            }
            found.push(m);
            r = m + 1;
        }
        assert_eq!(found, vec![1, 2, 4, 5, 7, 8, 10, 11]);
    }

    #[test]
    fn test_memo_survives_narrow_and_backward_scans() {
        let values: Vec<i64> = vec![0, 0, 0, 0, 9, 0, 0, 9];
        let table = int_table(&[&values]);
        let mut node = not(Box::new(IntegerNode::<Less>::new(0, 5)));
        node.init(&table, &QueryConfig::default()).unwrap();
        assert_eq!(node.find_first_local(&table, 0, 3), NOT_FOUND);
        assert_eq!(node.find_first_local(&table, 1, 8), 4);
        assert_eq!(node.find_first_local(&table, 2, 4), NOT_FOUND);
        assert_eq!(node.find_first_local(&table, 4, 5), 4);
        assert_eq!(node.find_first_local(&table, 5, 8), 7);
        assert_eq!(node.find_first_local(&table, 0, 8), 4);
    }

    #[test]
    fn test_missing_argument() {
        let node = NotNode::new(Chain::new(Vec::new(), QueryConfig::default()));
        assert_eq!(node.validate().as_deref(), Some("Missing argument to Not"));
    }
}
