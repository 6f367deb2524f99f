//! Query engine for Strata tables.
//!
//! This crate provides:
//! - Condition nodes over integer, floating point, string, binary, link and
//!   subtable columns, plus OR, NOT and arithmetic expression nodes
//! - A cost-adaptive scheduler that lets the most selective node lead
//! - Aggregation states (first, count, find all, sum, min, max, callback)
//! - A query builder with validated executors
//! - Parallel scans over row chunks

pub mod access;
pub mod condition;
pub mod expression;
pub mod node;
pub mod parallel;
pub mod query;
pub mod sink;
pub mod state;

pub use access::{FloatKind, PairValue};
pub use condition::{
    BeginsWith, BeginsWithIns, Contains, ContainsIns, EndsWith, EndsWithIns, EqualIns, Needle, NotEqualIns,
    StringCondition,
};
pub use expression::{ArithOp, BoundCompare, Compare, CompareOp, Scalar, Subexpr};
pub use node::{Chain, ConditionNode, NodeStats, Siblings};
pub use parallel::ParallelScan;
pub use query::Query;
pub use sink::{FloatSink, IntSink, MatchSink};
pub use state::{Action, QueryState, StateValue};
