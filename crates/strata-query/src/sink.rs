//! Match sinks: a [`QueryState`] plus the column it aggregates.

use std::ptr;

use strata_storage::{Array, ArrayBasic, BasicColumn, BasicType, FindState, IntColumn, LeafCursor};

use crate::state::QueryState;

/// Receiver of confirmed matches.
pub trait MatchSink {
    /// Reports a match at `row`. Returns false to stop scanning.
    fn report(&mut self, row: usize) -> bool;

    /// Matches reported so far.
    fn match_count(&self) -> usize;

    /// State that integer leaves may feed directly while scanning `column`.
    ///
    /// Only available when the aggregated value is the scanned value, or
    /// when no value is aggregated at all.
    fn fast_state(&mut self, column: &IntColumn) -> Option<&mut dyn FindState>;
}

/// Sink over an integer state, aggregating an optional integer column.
pub struct IntSink<'s, 'a, 't> {
    state: &'s mut QueryState<'a, i64>,
    source: Option<&'t IntColumn>,
    cursor: LeafCursor<Array>,
}

impl<'s, 'a, 't> IntSink<'s, 'a, 't> {
    pub fn new(state: &'s mut QueryState<'a, i64>, source: Option<&'t IntColumn>) -> Self {
        Self {
            state,
            source,
            cursor: LeafCursor::new(),
        }
    }
}

impl MatchSink for IntSink<'_, '_, '_> {
    fn report(&mut self, row: usize) -> bool {
        let value = match self.source {
            Some(column) if self.state.uses_value() => self.cursor.get(column.tree(), row),
            _ => 0,
        };
        self.state.match_value(row, value)
    }

    fn match_count(&self) -> usize {
        self.state.match_count()
    }

    fn fast_state(&mut self, column: &IntColumn) -> Option<&mut dyn FindState> {
        match self.source {
            Some(source) if self.state.uses_value() && !ptr::eq(source, column) => None,
            _ => Some(&mut *self.state as &mut dyn FindState),
        }
    }
}

/// Sink over a floating point state, aggregating a float or double column.
pub struct FloatSink<'s, 'a, 't, T: BasicType> {
    state: &'s mut QueryState<'a, f64>,
    source: &'t BasicColumn<T>,
    cursor: LeafCursor<ArrayBasic<T>>,
}

impl<'s, 'a, 't, T: BasicType> FloatSink<'s, 'a, 't, T> {
    pub fn new(state: &'s mut QueryState<'a, f64>, source: &'t BasicColumn<T>) -> Self {
        Self {
            state,
            source,
            cursor: LeafCursor::new(),
        }
    }
}

impl<T: BasicType> MatchSink for FloatSink<'_, '_, '_, T> {
    fn report(&mut self, row: usize) -> bool {
        let value = self.cursor.get(self.source.tree(), row).to_f64();
        self.state.match_value(row, value)
    }

    fn match_count(&self) -> usize {
        self.state.match_count()
    }

    fn fast_state(&mut self, _column: &IntColumn) -> Option<&mut dyn FindState> {
        None
    }
}
