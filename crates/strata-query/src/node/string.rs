//! String column conditions.

use std::marker::PhantomData;

use strata_common::{QueryConfig, Result, StrataError, NOT_FOUND};
use strata_storage::{Array, ArrayBinary, BpTree, Column, Equal, LeafCursor, StringIndex, Table};

use super::{ConditionNode, NodeStats};
use crate::access::find_in_int_tree;
use crate::condition::{Needle, StringCondition};

fn not_a_string(table: &Table, column: usize) -> StrataError {
    StrataError::ColumnTypeMismatch {
        column,
        expected: "String".to_string(),
        actual: table
            .get_real_column_type(column)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|_| "none".to_string()),
    }
}

/// First row in `[start, end)` whose value satisfies `test`.
fn scan_binary(
    cursor: &mut LeafCursor<ArrayBinary>,
    tree: &BpTree<ArrayBinary>,
    start: usize,
    end: usize,
    mut test: impl FnMut(&[u8]) -> bool,
) -> usize {
    let mut s = start;
    while s < end {
        let (leaf, leaf_start) = cursor.leaf_for(tree, s);
        let leaf_end = (leaf_start + leaf.size()).min(end);
        for i in s..leaf_end {
            if test(leaf.get(i - leaf_start)) {
                return i;
            }
        }
        s = leaf_end;
    }
    NOT_FOUND
}

/// Search state of a string node, resolved against the column at init.
#[derive(Clone)]
enum StringSource {
    Unbound,
    Plain(LeafCursor<ArrayBinary>),
    /// Per-key match flags of an enumerated column.
    Enum { key_matches: Vec<bool>, cursor: LeafCursor<Array> },
}

/// `column <C> needle` over a string column, plain or enumerated.
pub struct StringNode<C: StringCondition> {
    column: usize,
    needle: Needle,
    error: Option<String>,
    stats: NodeStats,
    source: StringSource,
    _cond: PhantomData<C>,
}

impl<C: StringCondition> Clone for StringNode<C> {
    fn clone(&self) -> Self {
        Self {
            column: self.column,
            needle: self.needle.clone(),
            error: self.error.clone(),
            stats: self.stats,
            source: self.source.clone(),
            _cond: PhantomData,
        }
    }
}

impl<C: StringCondition> StringNode<C> {
    pub fn new(column: usize, needle: impl AsRef<[u8]>) -> Self {
        let (needle, error) = Needle::new(needle.as_ref());
        Self {
            column,
            needle,
            error,
            stats: NodeStats::new(100.0, 10.0),
            source: StringSource::Unbound,
            _cond: PhantomData,
        }
    }
}

impl<C: StringCondition> ConditionNode for StringNode<C> {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        self.stats = NodeStats::new(100.0, 10.0);
        self.source = match table.column(self.column)? {
            Column::String(_) => StringSource::Plain(LeafCursor::new()),
            Column::StringEnum(c) => {
                let keys = c.keys();
                let key_matches = (0..keys.size())
                    .map(|k| C::matches(&self.needle, keys.get(k).as_bytes()))
                    .collect();
                StringSource::Enum {
                    key_matches,
                    cursor: LeafCursor::new(),
                }
            }
            _ => return Err(not_a_string(table, self.column)),
        };
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        let needle = &self.needle;
        match (&mut self.source, table.column(self.column)) {
            (StringSource::Plain(cursor), Ok(Column::String(c))) => {
                scan_binary(cursor, c.tree(), start, end, |v| C::matches(needle, v))
            }
            (StringSource::Enum { key_matches, cursor }, Ok(Column::StringEnum(c))) => {
                let tree = c.values().tree();
                (start..end)
                    .find(|&row| {
                        let key = cursor.get(tree, row) as usize;
                        key_matches.get(key).copied().unwrap_or(false)
                    })
                    .unwrap_or(NOT_FOUND)
            }
            _ => NOT_FOUND,
        }
    }

    fn validate(&self) -> Option<String> {
        self.error.clone()
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

// ============================================================================
// Case-sensitive equality
// ============================================================================

#[derive(Clone)]
enum EqualMode {
    Unbound,
    /// Ascending rows holding the needle, from the search index.
    Indexed(Vec<usize>),
    /// Key of the needle in an enumerated column; `None` if absent.
    Enum { key: Option<i64>, cursor: LeafCursor<Array> },
    Plain(LeafCursor<ArrayBinary>),
}

/// Case-sensitive string equality.
///
/// Uses the column's search index when it has one. Enumerated columns
/// resolve the needle to a key once and scan the key indexes as integers.
/// Other columns are scanned value by value.
///
/// Values are compared as raw bytes, so a needle that is not UTF-8 is
/// accepted and matches no row.
#[derive(Clone)]
pub struct StringEqualNode {
    column: usize,
    needle: Needle,
    stats: NodeStats,
    mode: EqualMode,
}

impl StringEqualNode {
    pub fn new(column: usize, needle: impl AsRef<[u8]>) -> Self {
        let (needle, _) = Needle::new(needle.as_ref());
        Self {
            column,
            needle,
            stats: NodeStats::new(10.0, 10.0),
            mode: EqualMode::Unbound,
        }
    }
}

impl ConditionNode for StringEqualNode {
    fn init(&mut self, table: &Table, _config: &QueryConfig) -> Result<()> {
        let needle = self.needle.as_str();
        let (mode, dt) = match table.column(self.column)? {
            Column::String(c) => match c.search_index() {
                Some(index) => (indexed_rows(index, needle), 0.0),
                None => (EqualMode::Plain(LeafCursor::new()), 10.0),
            },
            Column::StringEnum(c) => match c.search_index() {
                Some(index) => (indexed_rows(index, needle), 0.0),
                None => (
                    EqualMode::Enum {
                        key: needle.and_then(|n| c.get_key_ndx(n)).map(|k| k as i64),
                        cursor: LeafCursor::new(),
                    },
                    1.0,
                ),
            },
            _ => return Err(not_a_string(table, self.column)),
        };
        self.mode = mode;
        self.stats = NodeStats::new(10.0, dt);
        Ok(())
    }

    fn find_first_local(&mut self, table: &Table, start: usize, end: usize) -> usize {
        if start >= end {
            return NOT_FOUND;
        }
        let needle = self.needle.as_bytes();
        match (&mut self.mode, table.column(self.column)) {
            (EqualMode::Indexed(rows), _) => {
                let pos = rows.partition_point(|&r| r < start);
                match rows.get(pos) {
                    Some(&r) if r < end => r,
                    _ => NOT_FOUND,
                }
            }
            (EqualMode::Enum { key: Some(key), cursor }, Ok(Column::StringEnum(c))) => {
                find_in_int_tree::<Equal>(cursor, c.values().tree(), *key, start, end, |_| {})
            }
            (EqualMode::Plain(cursor), Ok(Column::String(c))) => {
                scan_binary(cursor, c.tree(), start, end, |v| v == needle)
            }
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

fn indexed_rows(index: &StringIndex, needle: Option<&str>) -> EqualMode {
    EqualMode::Indexed(needle.map(|n| index.find_all(n).to_vec()).unwrap_or_default())
}
