//! Ref handles and column type identifiers.

use serde::{Deserialize, Serialize};

/// Handle to a node managed by an allocator.
///
/// A ref is a byte offset into the allocator's address space and doubles as
/// the node's identity. Refs are always 8-byte aligned, so a slot value with
/// its low bit set (or zero) is a tagged scalar rather than a ref.
pub type Ref = usize;

/// Sentinel returned by searches that found nothing.
pub const NOT_FOUND: usize = usize::MAX;

/// Sentinel meaning "append" or "the last element".
pub const NPOS: usize = usize::MAX;

/// Returns true if a stored slot value is a child ref.
#[inline]
pub fn is_ref_value(value: i64) -> bool {
    value != 0 && value & 1 == 0
}

/// Converts a stored slot value into a ref.
#[inline]
pub fn to_ref(value: i64) -> Ref {
    debug_assert!(value >= 0, "negative ref value {value}");
    value as Ref
}

/// Encodes a count as a tagged scalar (`1 + 2*n`).
#[inline]
pub fn tagged(n: usize) -> i64 {
    1 + 2 * n as i64
}

/// Decodes a tagged scalar back into a count.
#[inline]
pub fn untagged(value: i64) -> usize {
    debug_assert!(value & 1 == 1, "value {value} is not tagged");
    (value / 2) as usize
}

/// Column types a table can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    // Integer backed
    Int = 0,
    Bool = 1,
    DateTime = 7,

    // Floating point
    Float = 9,
    Double = 10,

    // Variable length
    String = 2,
    StringEnum = 3,
    Binary = 4,

    // Nested
    Table = 5,

    // Links
    Link = 12,
    LinkList = 13,
}

impl ColumnType {
    /// Returns true if values are stored in a packed integer column.
    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Bool | ColumnType::DateTime)
    }

    /// Returns true if values are stored as floating point.
    pub fn is_floating(&self) -> bool {
        matches!(self, ColumnType::Float | ColumnType::Double)
    }

    /// Returns true if the column holds strings, plain or enumerated.
    pub fn is_string(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::StringEnum)
    }

    /// Returns true if the column type can back an arithmetic expression.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    /// Returns the type name.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Int => "Int",
            ColumnType::Bool => "Bool",
            ColumnType::DateTime => "DateTime",
            ColumnType::Float => "Float",
            ColumnType::Double => "Double",
            ColumnType::String => "String",
            ColumnType::StringEnum => "StringEnum",
            ColumnType::Binary => "Binary",
            ColumnType::Table => "Table",
            ColumnType::Link => "Link",
            ColumnType::LinkList => "LinkList",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_value_classification() {
        assert!(!is_ref_value(0));
        assert!(!is_ref_value(1));
        assert!(!is_ref_value(2001));
        assert!(is_ref_value(8));
        assert!(is_ref_value(4096));
    }

    #[test]
    fn test_tagged_roundtrip() {
        assert_eq!(tagged(0), 1);
        assert_eq!(tagged(1000), 2001);
        assert_eq!(untagged(2001), 1000);
        assert_eq!(untagged(tagged(12345)), 12345);
    }

    #[test]
    fn test_column_type_classes() {
        assert!(ColumnType::Int.is_integer());
        assert!(ColumnType::Bool.is_integer());
        assert!(ColumnType::DateTime.is_integer());
        assert!(ColumnType::Float.is_floating());
        assert!(ColumnType::Double.is_numeric());
        assert!(ColumnType::StringEnum.is_string());
        assert!(!ColumnType::Binary.is_numeric());
        assert!(!ColumnType::Link.is_integer());
    }

    #[test]
    fn test_column_type_display() {
        assert_eq!(ColumnType::Int.to_string(), "Int");
        assert_eq!(ColumnType::LinkList.to_string(), "LinkList");
        assert_eq!(ColumnType::Table.to_string(), "Table");
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(NOT_FOUND, usize::MAX);
        assert_eq!(NPOS, usize::MAX);
    }
}
