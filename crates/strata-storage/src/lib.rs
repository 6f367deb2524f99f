//! Columnar storage for Strata.
//!
//! This crate provides:
//! - Packed integer arrays with adaptive element width and vectorized search
//! - Float, double, blob and binary leaves
//! - A B+-tree of arrays with index-based addressing
//! - Typed columns (integer, floating point, string, enumerated string,
//!   binary, link, link list and subtable)
//! - A table façade over the columns
//! - Serialization of node trees into a single-root file image

pub mod array;
pub mod array_basic;
pub mod array_binary;
pub mod array_blob;
pub mod bptree;
pub mod column;
pub mod table;
pub mod write;

pub use array::{
    destroy_deep_ref, Array, ArrayParent, ArrayType, Condition, ConditionKind, Equal, FindState,
    Greater, GreaterEqual, IntegerCondition, Less, LessEqual, NoCondition, NotEqual,
};
pub use array_basic::{ArrayBasic, BasicType};
pub use array_binary::ArrayBinary;
pub use array_blob::ArrayBlob;
pub use bptree::LeafArray;
pub use column::{
    BasicColumn, BinaryColumn, BpTree, DoubleColumn, FloatColumn, IntColumn, LeafCursor,
    LinkColumn, LinkListColumn, StringColumn, StringEnumColumn, StringIndex, SubtableColumn,
};
pub use table::{Column, ColumnSpec, Table};
pub use write::{write_ref_node, write_to_file, ArrayWriter, MemoryArrayWriter};
