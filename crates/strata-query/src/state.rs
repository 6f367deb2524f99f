//! Aggregation state fed by condition nodes.
//!
//! Every confirmed match is reported to a [`QueryState`] as `(row, value)`.
//! The state applies its [`Action`] and tells the caller whether to keep
//! scanning:
//!
//! ```text
//! node ──match──> MatchSink ──(row, value)──> QueryState ──> continue?
//!                    │
//!                    └── source column (sum/min/max payload)
//! ```

use std::fmt;

use strata_common::{Result, StrataError, NOT_FOUND};
use strata_storage::{Array, FindState};

/// What a query does with each match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReturnFirst,
    Sum,
    Max,
    Min,
    Count,
    FindAll,
    CallbackIdx,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::ReturnFirst => "ReturnFirst",
            Action::Sum => "Sum",
            Action::Max => "Max",
            Action::Min => "Min",
            Action::Count => "Count",
            Action::FindAll => "FindAll",
            Action::CallbackIdx => "CallbackIdx",
        }
    }

    /// Returns true if the action reads the source column.
    pub fn uses_value(&self) -> bool {
        matches!(self, Action::Sum | Action::Max | Action::Min)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result type of a [`QueryState`].
pub trait StateValue: Copy + PartialOrd + Default + Send + fmt::Debug + 'static {
    const NAME: &'static str;
    /// Initial state of `Max`.
    const LOWEST: Self;
    /// Initial state of `Min`.
    const HIGHEST: Self;
    /// Whether row-oriented actions (first, count, find all, callback) are
    /// supported.
    const ROW_ACTIONS: bool;

    fn accumulate(self, value: Self) -> Self;
    fn from_count(count: usize) -> Self;
}

impl StateValue for i64 {
    const NAME: &'static str = "i64";
    const LOWEST: Self = i64::MIN;
    const HIGHEST: Self = i64::MAX;
    const ROW_ACTIONS: bool = true;

    fn accumulate(self, value: Self) -> Self {
        self.wrapping_add(value)
    }

    fn from_count(count: usize) -> Self {
        count as i64
    }
}

impl StateValue for f64 {
    const NAME: &'static str = "f64";
    const LOWEST: Self = f64::NEG_INFINITY;
    const HIGHEST: Self = f64::INFINITY;
    const ROW_ACTIONS: bool = false;

    fn accumulate(self, value: Self) -> Self {
        self + value
    }

    fn from_count(count: usize) -> Self {
        count as f64
    }
}

type Callback<'a> = Box<dyn FnMut(usize) -> bool + 'a>;

/// Accumulator for one query execution.
pub struct QueryState<'a, R: StateValue> {
    action: Action,
    state: R,
    match_count: usize,
    limit: usize,
    minmax_index: usize,
    matches: Vec<usize>,
    callback: Option<Callback<'a>>,
}

impl<R: StateValue> fmt::Debug for QueryState<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryState")
            .field("action", &self.action)
            .field("state", &self.state)
            .field("match_count", &self.match_count)
            .field("limit", &self.limit)
            .finish()
    }
}

impl<'a, R: StateValue> QueryState<'a, R> {
    /// Creates a state for `action` that stops after `limit` matches.
    pub fn new(action: Action, limit: usize) -> Result<Self> {
        let row_action = !matches!(action, Action::Sum | Action::Max | Action::Min);
        if row_action && !R::ROW_ACTIONS {
            return Err(StrataError::UnsupportedAction {
                action: action.name().to_string(),
                state: R::NAME.to_string(),
            });
        }
        if action == Action::CallbackIdx {
            return Err(StrataError::InvalidParameter {
                name: "action".to_string(),
                value: "CallbackIdx requires QueryState::with_callback".to_string(),
            });
        }
        let state = match action {
            Action::Max => R::LOWEST,
            Action::Min => R::HIGHEST,
            _ => R::default(),
        };
        Ok(Self {
            action,
            state,
            match_count: 0,
            limit,
            minmax_index: NOT_FOUND,
            matches: Vec::new(),
            callback: None,
        })
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Accumulated value: the sum, extreme or count.
    pub fn state(&self) -> R {
        self.state
    }

    pub fn match_count(&self) -> usize {
        self.match_count
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Row of the current minimum or maximum, or of the first match.
    pub fn minmax_index(&self) -> usize {
        self.minmax_index
    }

    /// Rows collected by `FindAll`.
    pub fn matches(&self) -> &[usize] {
        &self.matches
    }

    pub fn into_matches(self) -> Vec<usize> {
        self.matches
    }

    pub fn uses_value(&self) -> bool {
        self.action.uses_value()
    }

    /// Applies the action to a match. Returns false to stop scanning.
    pub fn match_value(&mut self, index: usize, value: R) -> bool {
        self.match_count += 1;
        match self.action {
            Action::ReturnFirst => {
                self.minmax_index = index;
                return false;
            }
            Action::Sum => self.state = self.state.accumulate(value),
            Action::Max => {
                if value > self.state {
                    self.state = value;
                    self.minmax_index = index;
                }
            }
            Action::Min => {
                if value < self.state {
                    self.state = value;
                    self.minmax_index = index;
                }
            }
            Action::Count => self.state = R::from_count(self.match_count),
            Action::FindAll => self.matches.push(index),
            Action::CallbackIdx => {
                if let Some(callback) = self.callback.as_mut() {
                    if !callback(index) {
                        return false;
                    }
                }
            }
        }
        self.limit > self.match_count
    }

    /// Consumes a batch of matches, only when counting and the batch cannot
    /// cross the limit.
    pub fn match_pattern(&mut self, _index: usize, mask: u64) -> bool {
        if self.action != Action::Count || self.match_count + 64 >= self.limit {
            return false;
        }
        self.match_count += mask.count_ones() as usize;
        self.state = R::from_count(self.match_count);
        true
    }
}

impl<'a> QueryState<'a, i64> {
    /// Creates a `CallbackIdx` state. The callback returns false to stop.
    pub fn with_callback(limit: usize, callback: impl FnMut(usize) -> bool + 'a) -> Self {
        Self {
            action: Action::CallbackIdx,
            state: 0,
            match_count: 0,
            limit,
            minmax_index: NOT_FOUND,
            matches: Vec::new(),
            callback: Some(Box::new(callback)),
        }
    }
}

impl FindState for QueryState<'_, i64> {
    fn match_index(&mut self, index: usize, value: i64) -> bool {
        self.match_value(index, value)
    }

    fn match_pattern(&mut self, index: usize, mask: u64) -> bool {
        QueryState::match_pattern(self, index, mask)
    }

    fn match_all(&mut self, _array: &Array, start: usize, end: usize, _baseindex: usize) -> Option<bool> {
        let n = end - start;
        if self.action != Action::Count || self.match_count + n >= self.limit {
            return None;
        }
        self.match_count += n;
        self.state = self.match_count as i64;
        Some(true)
    }
}
