//! Query builder and executors.
//!
//! A [`Query`] is built by chaining condition methods; consecutive
//! conditions are ANDed. `or()` splits the current group into branches,
//! `not()` negates the next condition or group, and `group()`/`subtable()`
//! open nested scopes:
//!
//! ```text
//!   q.greater(0, 10).group().equal(1, 3).or().less(1, 0).end_group()
//!     ==>  c0 > 10  AND  (c1 == 3  OR  c1 < 0)
//! ```
//!
//! Building never fails. Malformed input is recorded and reported by
//! [`Query::validate`], which every executor runs before touching a row.

use strata_common::{QueryConfig, Result, StrataError, NOT_FOUND};
use strata_storage::{
    Condition, Equal, Greater, GreaterEqual, IntColumn, Less, LessEqual, NoCondition, NotEqual, Table,
};
use tracing::debug;

use crate::access::{FloatKind, PairValue};
use crate::condition::{
    BeginsWith, BeginsWithIns, Contains, ContainsIns, EndsWith, EndsWithIns, EqualIns, NotEqualIns,
};
use crate::expression::Compare;
use crate::node::{
    BinaryNode, Chain, ConditionNode, ExpressionNode, FloatDoubleNode, IntegerNode, LinksToNode, NotNode, OrNode,
    StringEqualNode, StringNode, SubtableNode, TwoColumnsNode,
};
use crate::sink::{FloatSink, IntSink};
use crate::state::{Action, QueryState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    Group,
    Subtable(usize),
}

/// An open scope of the builder.
#[derive(Clone)]
struct Frame {
    kind: FrameKind,
    nodes: Vec<Box<dyn ConditionNode>>,
    /// Completed OR branches to the left of `nodes`.
    branches: Vec<Vec<Box<dyn ConditionNode>>>,
    pending_not: bool,
}

impl Frame {
    fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            nodes: Vec::new(),
            branches: Vec::new(),
            pending_not: false,
        }
    }

    /// The conditions of this scope as an AND-chain.
    fn close(&self, config: &QueryConfig) -> Vec<Box<dyn ConditionNode>> {
        if self.branches.is_empty() {
            return self.nodes.clone();
        }
        let branches = self
            .branches
            .iter()
            .chain(std::iter::once(&self.nodes))
            .map(|nodes| Chain::new(nodes.clone(), *config))
            .collect();
        vec![Box::new(OrNode::new(branches)) as Box<dyn ConditionNode>]
    }
}

/// A composable query over the rows of a table.
#[derive(Clone)]
pub struct Query {
    config: QueryConfig,
    frames: Vec<Frame>,
    error: Option<String>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        Self::with_config(QueryConfig::default())
    }

    pub fn with_config(config: QueryConfig) -> Self {
        Self {
            config,
            frames: vec![Frame::new(FrameKind::Root)],
            error: None,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn fail(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
    }

    fn top(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Adds `nodes` to the current scope as one condition.
    fn attach(&mut self, nodes: Vec<Box<dyn ConditionNode>>) -> &mut Self {
        let config = self.config;
        let top = self.top();
        if top.pending_not {
            top.pending_not = false;
            top.nodes.push(Box::new(NotNode::new(Chain::new(nodes, config))));
        } else {
            top.nodes.extend(nodes);
        }
        self
    }

    fn push(&mut self, node: Box<dyn ConditionNode>) -> &mut Self {
        self.attach(vec![node])
    }

    // ===== Integer =====

    pub fn equal(&mut self, column: usize, value: i64) -> &mut Self {
        self.push(Box::new(IntegerNode::<Equal>::new(column, value)))
    }

    pub fn not_equal(&mut self, column: usize, value: i64) -> &mut Self {
        self.push(Box::new(IntegerNode::<NotEqual>::new(column, value)))
    }

    pub fn greater(&mut self, column: usize, value: i64) -> &mut Self {
        self.push(Box::new(IntegerNode::<Greater>::new(column, value)))
    }

    pub fn less(&mut self, column: usize, value: i64) -> &mut Self {
        self.push(Box::new(IntegerNode::<Less>::new(column, value)))
    }

    pub fn greater_equal(&mut self, column: usize, value: i64) -> &mut Self {
        let nodes = lower_bound_node(column, value).into_iter().collect();
        self.attach_bounds(column, nodes)
    }

    pub fn less_equal(&mut self, column: usize, value: i64) -> &mut Self {
        let nodes = upper_bound_node(column, value).into_iter().collect();
        self.attach_bounds(column, nodes)
    }

    /// `from <= column <= to`.
    pub fn between(&mut self, column: usize, from: i64, to: i64) -> &mut Self {
        let nodes = lower_bound_node(column, from)
            .into_iter()
            .chain(upper_bound_node(column, to))
            .collect();
        self.attach_bounds(column, nodes)
    }

    /// Bounds at the ends of the `i64` range always hold and add no node,
    /// unless negated.
    fn attach_bounds(&mut self, column: usize, nodes: Vec<Box<dyn ConditionNode>>) -> &mut Self {
        if nodes.is_empty() {
            if !self.top().pending_not {
                return self;
            }
            return self.push(Box::new(IntegerNode::<NoCondition>::new(column, 0)));
        }
        self.attach(nodes)
    }

    pub fn equal_bool(&mut self, column: usize, value: bool) -> &mut Self {
        self.equal(column, i64::from(value))
    }

    // ===== Float and double =====

    pub fn compare_float<C: Condition>(&mut self, column: usize, value: f32) -> &mut Self {
        self.push(Box::new(FloatDoubleNode::<f32, C>::new(column, value)))
    }

    pub fn compare_double<C: Condition>(&mut self, column: usize, value: f64) -> &mut Self {
        self.push(Box::new(FloatDoubleNode::<f64, C>::new(column, value)))
    }

    pub fn between_float(&mut self, column: usize, from: f32, to: f32) -> &mut Self {
        self.between_basic(column, from, to)
    }

    pub fn between_double(&mut self, column: usize, from: f64, to: f64) -> &mut Self {
        self.between_basic(column, from, to)
    }

    fn between_basic<T: FloatKind>(&mut self, column: usize, from: T, to: T) -> &mut Self {
        self.attach(vec![
            Box::new(FloatDoubleNode::<T, GreaterEqual>::new(column, from)) as Box<dyn ConditionNode>,
            Box::new(FloatDoubleNode::<T, LessEqual>::new(column, to)),
        ])
    }

    // ===== String =====

    pub fn equal_string(&mut self, column: usize, value: impl AsRef<[u8]>, case_sensitive: bool) -> &mut Self {
        if case_sensitive {
            self.push(Box::new(StringEqualNode::new(column, value)))
        } else {
            self.push(Box::new(StringNode::<EqualIns>::new(column, value)))
        }
    }

    pub fn not_equal_string(&mut self, column: usize, value: impl AsRef<[u8]>, case_sensitive: bool) -> &mut Self {
        if case_sensitive {
            self.push(Box::new(StringNode::<NotEqual>::new(column, value)))
        } else {
            self.push(Box::new(StringNode::<NotEqualIns>::new(column, value)))
        }
    }

    pub fn contains(&mut self, column: usize, value: impl AsRef<[u8]>, case_sensitive: bool) -> &mut Self {
        if case_sensitive {
            self.push(Box::new(StringNode::<Contains>::new(column, value)))
        } else {
            self.push(Box::new(StringNode::<ContainsIns>::new(column, value)))
        }
    }

    pub fn begins_with(&mut self, column: usize, value: impl AsRef<[u8]>, case_sensitive: bool) -> &mut Self {
        if case_sensitive {
            self.push(Box::new(StringNode::<BeginsWith>::new(column, value)))
        } else {
            self.push(Box::new(StringNode::<BeginsWithIns>::new(column, value)))
        }
    }

    pub fn ends_with(&mut self, column: usize, value: impl AsRef<[u8]>, case_sensitive: bool) -> &mut Self {
        if case_sensitive {
            self.push(Box::new(StringNode::<EndsWith>::new(column, value)))
        } else {
            self.push(Box::new(StringNode::<EndsWithIns>::new(column, value)))
        }
    }

    // ===== Binary =====

    pub fn equal_binary(&mut self, column: usize, value: &[u8]) -> &mut Self {
        self.push(Box::new(BinaryNode::<Equal>::new(column, value)))
    }

    pub fn not_equal_binary(&mut self, column: usize, value: &[u8]) -> &mut Self {
        self.push(Box::new(BinaryNode::<NotEqual>::new(column, value)))
    }

    pub fn contains_binary(&mut self, column: usize, value: &[u8]) -> &mut Self {
        self.push(Box::new(BinaryNode::<Contains>::new(column, value)))
    }

    pub fn begins_with_binary(&mut self, column: usize, value: &[u8]) -> &mut Self {
        self.push(Box::new(BinaryNode::<BeginsWith>::new(column, value)))
    }

    pub fn ends_with_binary(&mut self, column: usize, value: &[u8]) -> &mut Self {
        self.push(Box::new(BinaryNode::<EndsWith>::new(column, value)))
    }

    // ===== Other conditions =====

    /// `col1 <C> col2` for two columns of value type `T`.
    pub fn compare_columns<T: PairValue, C: Condition>(&mut self, col1: usize, col2: usize) -> &mut Self {
        self.push(Box::new(TwoColumnsNode::<T, C>::new(col1, col2)))
    }

    pub fn links_to(&mut self, column: usize, target: usize) -> &mut Self {
        self.push(Box::new(LinksToNode::new(column, target)))
    }

    pub fn expression(&mut self, compare: Compare) -> &mut Self {
        self.push(Box::new(ExpressionNode::new(compare)))
    }

    // ===== Structure =====

    pub fn group(&mut self) -> &mut Self {
        self.frames.push(Frame::new(FrameKind::Group));
        self
    }

    pub fn end_group(&mut self) -> &mut Self {
        if self.top().kind != FrameKind::Group {
            self.fail("Unbalanced group");
            return self;
        }
        self.close_frame(|nodes, _| nodes)
    }

    /// Opens a scope whose conditions apply to the rows of the subtables in
    /// `column`.
    pub fn subtable(&mut self, column: usize) -> &mut Self {
        self.frames.push(Frame::new(FrameKind::Subtable(column)));
        self
    }

    pub fn end_subtable(&mut self) -> &mut Self {
        let FrameKind::Subtable(column) = self.top().kind else {
            self.fail("Unbalanced subtable/end_subtable block");
            return self;
        };
        self.close_frame(|nodes, config| {
            let node: Box<dyn ConditionNode> = Box::new(SubtableNode::new(column, Chain::new(nodes, config)));
            vec![node]
        })
    }

    fn close_frame(
        &mut self,
        wrap: impl FnOnce(Vec<Box<dyn ConditionNode>>, QueryConfig) -> Vec<Box<dyn ConditionNode>>,
    ) -> &mut Self {
        let Some(frame) = self.frames.pop() else {
            return self;
        };
        if frame.pending_not {
            self.fail("Missing argument to Not");
        }
        let nodes = frame.close(&self.config);
        let nodes = wrap(nodes, self.config);
        if nodes.is_empty() && !self.top().pending_not {
            return self;
        }
        self.attach(nodes)
    }

    pub fn or(&mut self) -> &mut Self {
        let top = self.top();
        if top.pending_not {
            top.pending_not = false;
            self.fail("Missing argument to Not");
            return self;
        }
        let nodes = std::mem::take(&mut top.nodes);
        top.branches.push(nodes);
        self
    }

    /// Negates the next condition or group.
    pub fn not(&mut self) -> &mut Self {
        let top = self.top();
        top.pending_not = !top.pending_not;
        self
    }

    // ===== Validation =====

    /// Returns the first construction error: builder errors first, then
    /// node errors in chain order.
    pub fn validate(&self) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(StrataError::QueryValidation(error.clone()));
        }
        if let Some(open) = self.frames.last().filter(|f| f.kind != FrameKind::Root) {
            let message = match open.kind {
                FrameKind::Subtable(_) => "Unbalanced subtable/end_subtable block",
                _ => "Unbalanced group",
            };
            return Err(StrataError::QueryValidation(message.to_string()));
        }
        if self.frames[0].pending_not {
            return Err(StrataError::QueryValidation("Missing argument to Not".to_string()));
        }
        match self.root_chain().validate() {
            Some(error) => Err(StrataError::QueryValidation(error)),
            None => Ok(()),
        }
    }

    fn root_chain(&self) -> Chain {
        Chain::new(self.frames[0].close(&self.config), self.config)
    }

    /// A fresh, uninitialized copy of the condition tree.
    pub fn build_chain(&self) -> Result<Chain> {
        self.validate()?;
        Ok(self.root_chain())
    }

    fn prepare(&self, table: &Table, action: Action, start: usize, end: usize) -> Result<(Chain, usize, usize)> {
        let mut chain = self.build_chain()?;
        chain.init(table, &self.config)?;
        let end = if end == NOT_FOUND { table.size() } else { end.min(table.size()) };
        let start = start.min(end);
        debug!(%action, start, end, nodes = chain.len(), "running query");
        Ok((chain, start, end))
    }

    fn run_int<'a>(
        &self,
        table: &Table,
        source: Option<&IntColumn>,
        mut state: QueryState<'a, i64>,
        start: usize,
        end: usize,
    ) -> Result<QueryState<'a, i64>> {
        let (mut chain, start, end) = self.prepare(table, state.action(), start, end)?;
        if state.limit() > 0 {
            chain.aggregate(table, &mut IntSink::new(&mut state, source), start, end);
        }
        Ok(state)
    }

    fn run_float<T: FloatKind>(
        &self,
        table: &Table,
        column: usize,
        action: Action,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<QueryState<'static, f64>> {
        let source = T::column(table, column)?;
        let mut state = QueryState::new(action, limit)?;
        let (mut chain, start, end) = self.prepare(table, action, start, end)?;
        if limit > 0 {
            chain.aggregate(table, &mut FloatSink::new(&mut state, source), start, end);
        }
        Ok(state)
    }

    // ===== Executors =====

    /// First matching row at or after `begin`, or `NOT_FOUND`.
    pub fn find(&self, table: &Table, begin: usize) -> Result<usize> {
        let state = QueryState::new(Action::ReturnFirst, usize::MAX)?;
        let state = self.run_int(table, None, state, begin, NOT_FOUND)?;
        Ok(state.minmax_index())
    }

    /// Matching rows in `[start, end)`, at most `limit` of them.
    pub fn find_all(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<Vec<usize>> {
        let state = QueryState::new(Action::FindAll, limit)?;
        Ok(self.run_int(table, None, state, start, end)?.into_matches())
    }

    pub fn count(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<usize> {
        let state = QueryState::new(Action::Count, limit)?;
        Ok(self.run_int(table, None, state, start, end)?.match_count())
    }

    /// Calls `callback` with every matching row until it returns false.
    /// Returns the number of rows passed to it.
    pub fn find_each(
        &self,
        table: &Table,
        start: usize,
        end: usize,
        limit: usize,
        callback: impl FnMut(usize) -> bool,
    ) -> Result<usize> {
        let state = QueryState::with_callback(limit, callback);
        Ok(self.run_int(table, None, state, start, end)?.match_count())
    }

    pub fn sum_int(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<i64> {
        let source = table.int_column(column)?;
        let state = QueryState::new(Action::Sum, limit)?;
        Ok(self.run_int(table, Some(source), state, start, end)?.state())
    }

    pub fn sum_float(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<f64> {
        Ok(self.run_float::<f32>(table, column, Action::Sum, start, end, limit)?.state())
    }

    pub fn sum_double(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<f64> {
        Ok(self.run_float::<f64>(table, column, Action::Sum, start, end, limit)?.state())
    }

    fn extreme_int(
        &self,
        table: &Table,
        column: usize,
        action: Action,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(i64, usize)>> {
        let source = table.int_column(column)?;
        let state = QueryState::new(action, limit)?;
        let state = self.run_int(table, Some(source), state, start, end)?;
        Ok((state.match_count() > 0).then(|| (state.state(), state.minmax_index())))
    }

    fn extreme_float<T: FloatKind>(
        &self,
        table: &Table,
        column: usize,
        action: Action,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(f64, usize)>> {
        let state = self.run_float::<T>(table, column, action, start, end, limit)?;
        Ok((state.match_count() > 0).then(|| (state.state(), state.minmax_index())))
    }

    /// Largest value among matching rows and the first row holding it.
    pub fn maximum_int(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(i64, usize)>> {
        self.extreme_int(table, column, Action::Max, start, end, limit)
    }

    pub fn minimum_int(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(i64, usize)>> {
        self.extreme_int(table, column, Action::Min, start, end, limit)
    }

    pub fn maximum_float(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(f64, usize)>> {
        self.extreme_float::<f32>(table, column, Action::Max, start, end, limit)
    }

    pub fn minimum_float(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(f64, usize)>> {
        self.extreme_float::<f32>(table, column, Action::Min, start, end, limit)
    }

    pub fn maximum_double(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(f64, usize)>> {
        self.extreme_float::<f64>(table, column, Action::Max, start, end, limit)
    }

    pub fn minimum_double(
        &self,
        table: &Table,
        column: usize,
        start: usize,
        end: usize,
        limit: usize,
    ) -> Result<Option<(f64, usize)>> {
        self.extreme_float::<f64>(table, column, Action::Min, start, end, limit)
    }

    /// Mean over matching rows; 0.0 if none match.
    pub fn average_int(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<f64> {
        let source = table.int_column(column)?;
        let state = QueryState::new(Action::Sum, limit)?;
        let state = self.run_int(table, Some(source), state, start, end)?;
        Ok(mean(state.state() as f64, state.match_count()))
    }

    pub fn average_float(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<f64> {
        let state = self.run_float::<f32>(table, column, Action::Sum, start, end, limit)?;
        Ok(mean(state.state(), state.match_count()))
    }

    pub fn average_double(&self, table: &Table, column: usize, start: usize, end: usize, limit: usize) -> Result<f64> {
        let state = self.run_float::<f64>(table, column, Action::Sum, start, end, limit)?;
        Ok(mean(state.state(), state.match_count()))
    }

    /// Deletes the matching rows. Returns how many were deleted.
    pub fn remove(&self, table: &mut Table, start: usize, end: usize, limit: usize) -> Result<usize> {
        let rows = self.find_all(table, start, end, limit)?;
        for &row in rows.iter().rev() {
            table.remove(row)?;
        }
        debug!(removed = rows.len(), "removed matching rows");
        Ok(rows.len())
    }
}

fn lower_bound_node(column: usize, value: i64) -> Option<Box<dyn ConditionNode>> {
    (value != i64::MIN).then(|| Box::new(IntegerNode::<Greater>::new(column, value - 1)) as Box<dyn ConditionNode>)
}

fn upper_bound_node(column: usize, value: i64) -> Option<Box<dyn ConditionNode>> {
    (value != i64::MAX).then(|| Box::new(IntegerNode::<Less>::new(column, value + 1)) as Box<dyn ConditionNode>)
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
