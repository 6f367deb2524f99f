//! Disjunction of condition chains.

use strata_common::{QueryConfig, Result, NOT_FOUND};
use strata_storage::Table;

use super::{Chain, ConditionNode, NodeStats};

/// Matches a row if any branch chain matches it.
///
/// Each branch remembers its last result: the row it matched, or the end of
/// the range it searched without a match, together with the start of that
/// search. A later call only searches a branch again once it has passed that
/// row. A call starting before the remembered start forgets the result.
#[derive(Clone)]
pub struct OrNode {
    branches: Vec<Chain>,
    from: Vec<usize>,
    last: Vec<usize>,
    was_match: Vec<bool>,
    stats: NodeStats,
}

impl OrNode {
    pub fn new(branches: Vec<Chain>) -> Self {
        let n = branches.len();
        Self {
            branches,
            from: vec![0; n],
            last: vec![0; n],
            was_match: vec![false; n],
            stats: NodeStats::new(10.0, 50.0),
        }
    }
}

impl ConditionNode for OrNode {
    fn init(&mut self, table: &Table, config: &QueryConfig) -> Result<()> {
        for branch in &mut self.branches {
            branch.init(table, config)?;
        }
        self.from.iter_mut().for_each(|f| *f = 0);
        self.last.iter_mut().for_each(|l| *l = 0);
        self.was_match.iter_mut().for_each(|m| *m = false);
        self.stats = NodeStats::new(10.0, 50.0);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        if start >= end {
            return NOT_FOUND;
        }
        let mut index = NOT_FOUND;
        for (c, branch) in self.branches.iter_mut().enumerate() {
            if start < self.from[c] {
                self.last[c] = 0;
                self.was_match[c] = false;
            }
            if self.last[c] >= end {
                continue;
            }
            if self.was_match[c] && self.last[c] >= start {
                index = index.min(self.last[c]);
                continue;
            }
            let from = self.last[c].max(start);
            self.from[c] = start;
            let f = branch.find_first(table, from, end);
            self.was_match[c] = f != NOT_FOUND;
            self.last[c] = if f == NOT_FOUND { end } else { f };
            if f != NOT_FOUND {
                index = index.min(f);
            }
        }
        index
    }

    fn validate(&self) -> Option<String> {
        if self.branches.first().map_or(true, Chain::is_empty) {
            return Some("Missing left-hand side of OR".to_string());
        }
        if self.branches.last().map_or(true, Chain::is_empty) {
            return Some("Missing final right-hand side of OR".to_string());
        }
        self.branches.iter().find_map(Chain::validate)
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
    use strata_storage::{Equal, Greater};

    fn branch(node: Box<dyn ConditionNode>) -> Chain {
        Chain::new(vec![node], QueryConfig::default())
    }

    #[test]
    fn test_union_of_branches() {
        let values: Vec<i64> = (0..20).collect();
        let table = int_table(&[&values]);
        let mut or = OrNode::new(vec![
            branch(Box::new(IntegerNode::<Equal>::new(0, 3))),
            branch(Box::new(IntegerNode::<Greater>::new(0, 16))),
            branch(Box::new(IntegerNode::<Equal>::new(0, 9))),
        ]);
        or.init(&table, &QueryConfig::default()).unwrap();
        let mut found = Vec::new();
        let mut r = 0;
        while let Some(m) = Some(or.find_first_local(&table, r, 20)).filter(|&m| m != NOT_FOUND) {
            found.push(m);
            r = m + 1;
        }
        assert_eq!(found, vec![3, 9, 17, 18, 19]);
    }

    #[test]
    fn test_single_row_probes_use_memo() {
        let values: Vec<i64> = (0..10).collect();
        let table = int_table(&[&values]);
        let mut or = OrNode::new(vec![
            branch(Box::new(IntegerNode::<Equal>::new(0, 4))),
            branch(Box::new(IntegerNode::<Equal>::new(0, 7))),
        ]);
        or.init(&table, &QueryConfig::default()).unwrap();
        let hits: Vec<usize> = (0..10)
            .filter(|&r| or.find_first_local(&table, r, r + 1) == r)
            .collect();
        assert_eq!(hits, vec![4, 7]);
    }

    #[test]
    fn test_backward_scan_forgets_memo() {
        let values: Vec<i64> = (0..30).map(|i| i % 10).collect();
        let table = int_table(&[&values]);
        let mut or = OrNode::new(vec![
            branch(Box::new(IntegerNode::<Equal>::new(0, 2))),
            branch(Box::new(IntegerNode::<Equal>::new(0, 6))),
        ]);
        or.init(&table, &QueryConfig::default()).unwrap();
        assert_eq!(or.find_first_local(&table, 20, 30), 22);
        assert_eq!(or.find_first_local(&table, 23, 30), 26);
        // Out of order: rows before the earlier starts must be searched again.
        assert_eq!(or.find_first_local(&table, 0, 30), 2);
        assert_eq!(or.find_first_local(&table, 3, 30), 6);
        assert_eq!(or.find_first_local(&table, 0, 2), NOT_FOUND);
        assert_eq!(or.find_first_local(&table, 10, 20), 12);
        assert_eq!(or.find_first_local(&table, 7, 12), NOT_FOUND);
    }

    #[test]
    fn test_missing_sides() {
        let empty = || Chain::new(Vec::new(), QueryConfig::default());
        let one = || branch(Box::new(IntegerNode::<Equal>::new(0, 1)));
        assert_eq!(
            OrNode::new(vec![empty(), one()]).validate().as_deref(),
            Some("Missing left-hand side of OR")
        );
        assert_eq!(
            OrNode::new(vec![one(), empty()]).validate().as_deref(),
            Some("Missing final right-hand side of OR")
        );
        assert!(OrNode::new(vec![one(), one()]).validate().is_none());
    }
}
