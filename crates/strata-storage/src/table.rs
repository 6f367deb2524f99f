//! Table façade over typed columns.
//!
//! A table is an ordered set of named columns of equal length. It exists to
//! give the query engine something to scan; there is no persistence of the
//! schema itself.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{ColumnType, Result, StorageConfig, StrataError};
use tracing::debug;

use crate::column::{
    BinaryColumn, DoubleColumn, FloatColumn, IntColumn, LinkColumn, LinkListColumn, StringColumn,
    StringEnumColumn, SubtableColumn,
};

/// Declared name and type of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    /// Schema of the subtables, for `ColumnType::Table`.
    pub subspec: Vec<ColumnSpec>,
}

impl ColumnSpec {
    pub fn new(ty: ColumnType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            subspec: Vec::new(),
        }
    }

    pub fn subtable(name: impl Into<String>, subspec: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Table,
            subspec,
        }
    }
}

/// Storage of one column.
pub enum Column {
    Int(IntColumn),
    Float(FloatColumn),
    Double(DoubleColumn),
    String(StringColumn),
    StringEnum(StringEnumColumn),
    Binary(BinaryColumn),
    Link(LinkColumn),
    LinkList(LinkListColumn),
    Table(SubtableColumn),
}

impl Column {
    fn create(alloc: &Arc<dyn Allocator>, config: StorageConfig, spec: &ColumnSpec) -> Result<Self> {
        let max = config.max_node_size;
        Ok(match spec.ty {
            ColumnType::Int | ColumnType::Bool | ColumnType::DateTime => Column::Int(IntColumn::create(alloc, max)?),
            ColumnType::Float => Column::Float(FloatColumn::create(alloc, max)?),
            ColumnType::Double => Column::Double(DoubleColumn::create(alloc, max)?),
            ColumnType::String => Column::String(StringColumn::create(alloc, max)?),
            ColumnType::StringEnum => Column::StringEnum(StringEnumColumn::create(alloc, max)?),
            ColumnType::Binary => Column::Binary(BinaryColumn::create(alloc, max)?),
            ColumnType::Link => Column::Link(LinkColumn::create(alloc, max)?),
            ColumnType::LinkList => Column::LinkList(LinkListColumn::create(alloc, max)?),
            ColumnType::Table => Column::Table(SubtableColumn::new(alloc, config, spec.subspec.clone())),
        })
    }

    pub fn size(&self) -> usize {
        match self {
            Column::Int(c) => c.size(),
            Column::Float(c) => c.size(),
            Column::Double(c) => c.size(),
            Column::String(c) => c.size(),
            Column::StringEnum(c) => c.size(),
            Column::Binary(c) => c.size(),
            Column::Link(c) => c.size(),
            Column::LinkList(c) => c.size(),
            Column::Table(c) => c.size(),
        }
    }

    /// Inserts the type's default value at `row`.
    fn insert_default(&mut self, row: usize) -> Result<()> {
        match self {
            Column::Int(c) => c.insert(row, 0),
            Column::Float(c) => c.insert(row, 0.0),
            Column::Double(c) => c.insert(row, 0.0),
            Column::String(c) => c.insert(row, ""),
            Column::StringEnum(c) => c.insert(row, ""),
            Column::Binary(c) => c.insert(row, &[]),
            Column::Link(c) => c.insert(row),
            Column::LinkList(c) => c.insert(row),
            Column::Table(c) => {
                c.insert(row);
                Ok(())
            }
        }
    }

    fn erase(&mut self, row: usize) -> Result<()> {
        match self {
            Column::Int(c) => c.erase(row),
            Column::Float(c) => c.erase(row),
            Column::Double(c) => c.erase(row),
            Column::String(c) => c.erase(row),
            Column::StringEnum(c) => c.erase(row),
            Column::Binary(c) => c.erase(row),
            Column::Link(c) => c.erase(row),
            Column::LinkList(c) => c.erase(row),
            Column::Table(c) => {
                c.erase(row);
                Ok(())
            }
        }
    }

    fn clear(&mut self) -> Result<()> {
        match self {
            Column::Int(c) => c.clear(),
            Column::Float(c) => c.clear(),
            Column::Double(c) => c.clear(),
            Column::String(c) => c.clear(),
            Column::StringEnum(c) => c.clear(),
            Column::Binary(c) => c.clear(),
            Column::Link(c) => c.clear(),
            Column::LinkList(c) => c.clear(),
            Column::Table(c) => {
                c.clear();
                Ok(())
            }
        }
    }

    fn destroy(&mut self) {
        match self {
            Column::Int(c) => c.destroy(),
            Column::Float(c) => c.destroy(),
            Column::Double(c) => c.destroy(),
            Column::String(c) => c.destroy(),
            Column::StringEnum(c) => c.destroy(),
            Column::Binary(c) => c.destroy(),
            Column::Link(c) => c.destroy(),
            Column::LinkList(c) => c.destroy(),
            Column::Table(c) => c.destroy(),
        }
    }
}

/// A table of typed columns.
pub struct Table {
    alloc: Arc<dyn Allocator>,
    config: StorageConfig,
    spec: Vec<ColumnSpec>,
    columns: Vec<Column>,
    size: usize,
}

impl Table {
    /// Creates a table without columns.
    pub fn new(alloc: &Arc<dyn Allocator>, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            alloc: Arc::clone(alloc),
            config,
            spec: Vec::new(),
            columns: Vec::new(),
            size: 0,
        })
    }

    /// Creates an empty table with the given columns.
    pub fn with_spec(alloc: &Arc<dyn Allocator>, config: StorageConfig, spec: &[ColumnSpec]) -> Result<Self> {
        let mut table = Self::new(alloc, config)?;
        for column in spec {
            table.add_column_spec(column.clone())?;
        }
        Ok(table)
    }

    pub fn get_alloc(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // ===== Schema =====

    /// Adds a column and returns its index. Existing rows get the type's
    /// default value.
    pub fn add_column(&mut self, ty: ColumnType, name: &str) -> Result<usize> {
        self.add_column_spec(ColumnSpec::new(ty, name))
    }

    /// Adds a subtable column whose tables have the columns in `subspec`.
    pub fn add_subtable_column(&mut self, name: &str, subspec: Vec<ColumnSpec>) -> Result<usize> {
        self.add_column_spec(ColumnSpec::subtable(name, subspec))
    }

    fn add_column_spec(&mut self, spec: ColumnSpec) -> Result<usize> {
        let mut column = Column::create(&self.alloc, self.config, &spec)?;
        for row in 0..self.size {
            column.insert_default(row)?;
        }
        self.spec.push(spec);
        self.columns.push(column);
        Ok(self.columns.len() - 1)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn spec(&self) -> &[ColumnSpec] {
        &self.spec
    }

    pub fn column_name(&self, col: usize) -> Result<&str> {
        self.spec
            .get(col)
            .map(|s| s.name.as_str())
            .ok_or(StrataError::ColumnNotFound(col))
    }

    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.spec.iter().position(|s| s.name == name)
    }

    /// Declared type of column `col`. Enumerated strings report `String`.
    pub fn get_column_type(&self, col: usize) -> Result<ColumnType> {
        match self.get_real_column_type(col)? {
            ColumnType::StringEnum => Ok(ColumnType::String),
            ty => Ok(ty),
        }
    }

    /// Storage type of column `col`.
    pub fn get_real_column_type(&self, col: usize) -> Result<ColumnType> {
        match (self.columns.get(col), self.spec.get(col)) {
            (Some(Column::StringEnum(_)), _) => Ok(ColumnType::StringEnum),
            (Some(_), Some(spec)) => Ok(spec.ty),
            _ => Err(StrataError::ColumnNotFound(col)),
        }
    }

    pub fn column(&self, col: usize) -> Result<&Column> {
        self.columns.get(col).ok_or(StrataError::ColumnNotFound(col))
    }

    fn column_mut(&mut self, col: usize) -> Result<&mut Column> {
        self.columns.get_mut(col).ok_or(StrataError::ColumnNotFound(col))
    }

    // ===== Rows =====

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn add_empty_row(&mut self) -> Result<usize> {
        self.add_empty_rows(1)
    }

    /// Appends `count` default rows and returns the index of the first.
    pub fn add_empty_rows(&mut self, count: usize) -> Result<usize> {
        let first = self.size;
        for _ in 0..count {
            let row = self.size;
            for column in &mut self.columns {
                column.insert_default(row)?;
            }
            self.size += 1;
        }
        Ok(first)
    }

    pub fn insert_empty_row(&mut self, row: usize) -> Result<()> {
        if row > self.size {
            return Err(StrataError::IndexOutOfBounds { index: row, size: self.size });
        }
        for column in &mut self.columns {
            column.insert_default(row)?;
        }
        self.size += 1;
        Ok(())
    }

    pub fn remove(&mut self, row: usize) -> Result<()> {
        self.check_row(row)?;
        for column in &mut self.columns {
            column.erase(row)?;
        }
        self.size -= 1;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        for column in &mut self.columns {
            column.clear()?;
        }
        self.size = 0;
        Ok(())
    }

    /// Frees every column. The table is left without columns or rows.
    pub fn destroy(&mut self) {
        for column in &mut self.columns {
            column.destroy();
        }
        self.columns.clear();
        self.spec.clear();
        self.size = 0;
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.size {
            return Err(StrataError::IndexOutOfBounds { index: row, size: self.size });
        }
        Ok(())
    }

    fn mismatch(&self, col: usize, expected: &str) -> StrataError {
        let actual = self
            .get_real_column_type(col)
            .map(|t| t.name().to_string())
            .unwrap_or_else(|_| "none".to_string());
        StrataError::ColumnTypeMismatch {
            column: col,
            expected: expected.to_string(),
            actual,
        }
    }

    // ===== Typed column access =====

    pub fn int_column(&self, col: usize) -> Result<&IntColumn> {
        match self.column(col)? {
            Column::Int(c) => Ok(c),
            _ => Err(self.mismatch(col, "Int")),
        }
    }

    /// Mutable column `col`, checked with `accepts` before borrowing.
    fn checked_column_mut(&mut self, col: usize, expected: &str, accepts: fn(&Column) -> bool) -> Result<&mut Column> {
        if !accepts(self.column(col)?) {
            return Err(self.mismatch(col, expected));
        }
        self.column_mut(col)
    }

    pub fn float_column(&self, col: usize) -> Result<&FloatColumn> {
        match self.column(col)? {
            Column::Float(c) => Ok(c),
            _ => Err(self.mismatch(col, "Float")),
        }
    }

    pub fn double_column(&self, col: usize) -> Result<&DoubleColumn> {
        match self.column(col)? {
            Column::Double(c) => Ok(c),
            _ => Err(self.mismatch(col, "Double")),
        }
    }

    pub fn binary_column(&self, col: usize) -> Result<&BinaryColumn> {
        match self.column(col)? {
            Column::Binary(c) => Ok(c),
            _ => Err(self.mismatch(col, "Binary")),
        }
    }

    pub fn link_column(&self, col: usize) -> Result<&LinkColumn> {
        match self.column(col)? {
            Column::Link(c) => Ok(c),
            _ => Err(self.mismatch(col, "Link")),
        }
    }

    pub fn link_list_column(&self, col: usize) -> Result<&LinkListColumn> {
        match self.column(col)? {
            Column::LinkList(c) => Ok(c),
            _ => Err(self.mismatch(col, "LinkList")),
        }
    }

    pub fn subtable_column(&self, col: usize) -> Result<&SubtableColumn> {
        match self.column(col)? {
            Column::Table(c) => Ok(c),
            _ => Err(self.mismatch(col, "Table")),
        }
    }

    // ===== Cells =====

    pub fn get_int(&self, col: usize, row: usize) -> Result<i64> {
        self.check_row(row)?;
        Ok(self.int_column(col)?.get(row))
    }

    pub fn set_int(&mut self, col: usize, row: usize, value: i64) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Int", |c| matches!(c, Column::Int(_)))? {
            Column::Int(c) => c.set(row, value),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    /// Adds `diff` to every value of an integer column.
    pub fn adjust_int(&mut self, col: usize, diff: i64) -> Result<()> {
        match self.checked_column_mut(col, "Int", |c| matches!(c, Column::Int(_)))? {
            Column::Int(c) => c.adjust_all(diff),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_bool(&self, col: usize, row: usize) -> Result<bool> {
        Ok(self.get_int(col, row)? != 0)
    }

    pub fn set_bool(&mut self, col: usize, row: usize, value: bool) -> Result<()> {
        self.set_int(col, row, i64::from(value))
    }

    /// Seconds since the epoch.
    pub fn get_datetime(&self, col: usize, row: usize) -> Result<i64> {
        self.get_int(col, row)
    }

    pub fn set_datetime(&mut self, col: usize, row: usize, value: i64) -> Result<()> {
        self.set_int(col, row, value)
    }

    pub fn get_float(&self, col: usize, row: usize) -> Result<f32> {
        self.check_row(row)?;
        Ok(self.float_column(col)?.get(row))
    }

    pub fn set_float(&mut self, col: usize, row: usize, value: f32) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Float", |c| matches!(c, Column::Float(_)))? {
            Column::Float(c) => c.set(row, value),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_double(&self, col: usize, row: usize) -> Result<f64> {
        self.check_row(row)?;
        Ok(self.double_column(col)?.get(row))
    }

    pub fn set_double(&mut self, col: usize, row: usize, value: f64) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Double", |c| matches!(c, Column::Double(_)))? {
            Column::Double(c) => c.set(row, value),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_string(&self, col: usize, row: usize) -> Result<String> {
        self.check_row(row)?;
        match self.column(col)? {
            Column::String(c) => Ok(c.get(row)),
            Column::StringEnum(c) => Ok(c.get(row)),
            _ => Err(self.mismatch(col, "String")),
        }
    }

    pub fn set_string(&mut self, col: usize, row: usize, value: &str) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "String", |c| matches!(c, Column::String(_) | Column::StringEnum(_)))? {
            Column::String(c) => c.set(row, value),
            Column::StringEnum(c) => c.set(row, value),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_binary(&self, col: usize, row: usize) -> Result<Vec<u8>> {
        self.check_row(row)?;
        Ok(self.binary_column(col)?.get(row))
    }

    pub fn set_binary(&mut self, col: usize, row: usize, value: &[u8]) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Binary", |c| matches!(c, Column::Binary(_)))? {
            Column::Binary(c) => c.set(row, value),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_link(&self, col: usize, row: usize) -> Result<Option<usize>> {
        self.check_row(row)?;
        Ok(self.link_column(col)?.get_link(row))
    }

    pub fn set_link(&mut self, col: usize, row: usize, target: Option<usize>) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Link", |c| matches!(c, Column::Link(_)))? {
            Column::Link(c) => c.set_link(row, target),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    pub fn get_link_list(&self, col: usize, row: usize) -> Result<Vec<usize>> {
        self.check_row(row)?;
        Ok(self.link_list_column(col)?.get_links(row))
    }

    pub fn add_link_list_entry(&mut self, col: usize, row: usize, target: usize) -> Result<()> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "LinkList", |c| matches!(c, Column::LinkList(_)))? {
            Column::LinkList(c) => c.add_link(row, target),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    /// Subtable at `(col, row)`; `None` if it was never created.
    pub fn get_subtable(&self, col: usize, row: usize) -> Option<&Table> {
        match self.columns.get(col) {
            Some(Column::Table(c)) if row < c.size() => c.get(row),
            _ => None,
        }
    }

    /// Subtable at `(col, row)`, created on first use.
    pub fn get_subtable_mut(&mut self, col: usize, row: usize) -> Result<&mut Table> {
        self.check_row(row)?;
        match self.checked_column_mut(col, "Table", |c| matches!(c, Column::Table(_)))? {
            Column::Table(c) => c.get_or_create(row),
            _ => Err(StrataError::Internal(format!("column {col} changed type"))),
        }
    }

    // ===== Indexing and optimization =====

    /// Builds a search index on a string column.
    pub fn add_search_index(&mut self, col: usize) -> Result<()> {
        match self.column_mut(col)? {
            Column::String(c) => c.add_search_index(),
            Column::StringEnum(c) => c.add_search_index(),
            _ => return Err(StrataError::NotIndexable(col)),
        }
        debug!(col, "added search index");
        Ok(())
    }

    pub fn has_search_index(&self, col: usize) -> bool {
        match self.columns.get(col) {
            Some(Column::String(c)) => c.has_search_index(),
            Some(Column::StringEnum(c)) => c.has_search_index(),
            _ => false,
        }
    }

    /// Converts a string column to an enumerated column when at most half
    /// of its values are distinct. Returns true if the column was converted.
    pub fn optimize(&mut self, col: usize) -> Result<bool> {
        let alloc = Arc::clone(&self.alloc);
        let max = self.config.max_node_size;
        let Column::String(source) = self.column_mut(col)? else {
            return Ok(false);
        };
        let mut enumerated = StringEnumColumn::from_strings(&alloc, source, max)?;
        if enumerated.key_count() * 2 > source.size() {
            enumerated.destroy();
            return Ok(false);
        }
        enumerated.set_search_index(source.take_search_index());
        source.destroy();
        debug!(col, keys = enumerated.key_count(), "enumerated string column");
        self.columns[col] = Column::StringEnum(enumerated);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_alloc::SlabAlloc;

    fn table() -> Table {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        Table::new(&alloc, StorageConfig::default()).unwrap()
    }

    #[test]
    fn test_rows_and_cells() {
        let mut t = table();
        let age = t.add_column(ColumnType::Int, "age").unwrap();
        let name = t.add_column(ColumnType::String, "name").unwrap();
        let score = t.add_column(ColumnType::Double, "score").unwrap();
        for i in 0..5 {
            let row = t.add_empty_row().unwrap();
            t.set_int(age, row, 20 + i).unwrap();
            t.set_string(name, row, &format!("p{i}")).unwrap();
            t.set_double(score, row, i as f64 / 2.0).unwrap();
        }
        t.insert_empty_row(2).unwrap();
        assert_eq!(t.size(), 6);
        assert_eq!(t.get_int(age, 2).unwrap(), 0);
        assert_eq!(t.get_string(name, 3).unwrap(), "p2");
        t.remove(0).unwrap();
        assert_eq!(t.get_int(age, 0).unwrap(), 21);
        assert_eq!(t.get_double(score, 4).unwrap(), 2.0);
        assert_eq!(t.find_column("score"), Some(score));
    }

    #[test]
    fn test_errors() {
        let mut t = table();
        let c = t.add_column(ColumnType::Int, "n").unwrap();
        t.add_empty_row().unwrap();
        assert!(matches!(t.get_int(c, 1), Err(StrataError::IndexOutOfBounds { .. })));
        assert!(matches!(t.get_string(c, 0), Err(StrataError::ColumnTypeMismatch { .. })));
        assert!(matches!(t.get_int(5, 0), Err(StrataError::ColumnNotFound(5))));
        assert!(matches!(t.add_search_index(c), Err(StrataError::NotIndexable(0))));
    }

    #[test]
    fn test_adjust_int() {
        let mut t = table();
        let c = t.add_column(ColumnType::Int, "n").unwrap();
        let s = t.add_column(ColumnType::String, "s").unwrap();
        t.add_empty_rows(3).unwrap();
        t.set_int(c, 1, 10).unwrap();
        t.adjust_int(c, 5).unwrap();
        assert_eq!((0..3).map(|r| t.get_int(c, r).unwrap()).collect::<Vec<_>>(), vec![5, 15, 5]);
        assert!(matches!(t.adjust_int(s, 1), Err(StrataError::ColumnTypeMismatch { .. })));
    }

    #[test]
    fn test_optimize_keeps_values_and_index() {
        let mut t = table();
        let c = t.add_column(ColumnType::String, "color").unwrap();
        let colors = ["red", "green", "red", "blue", "red", "green"];
        t.add_empty_rows(colors.len()).unwrap();
        for (row, color) in colors.iter().enumerate() {
            t.set_string(c, row, color).unwrap();
        }
        t.add_search_index(c).unwrap();
        assert!(t.optimize(c).unwrap());
        assert_eq!(t.get_column_type(c).unwrap(), ColumnType::String);
        assert_eq!(t.get_real_column_type(c).unwrap(), ColumnType::StringEnum);
        assert!(t.has_search_index(c));
        for (row, color) in colors.iter().enumerate() {
            assert_eq!(t.get_string(c, row).unwrap(), *color);
        }
        t.set_string(c, 1, "purple").unwrap();
        assert_eq!(t.get_string(c, 1).unwrap(), "purple");
    }

    #[test]
    fn test_optimize_skips_mostly_distinct() {
        let mut t = table();
        let c = t.add_column(ColumnType::String, "id").unwrap();
        t.add_empty_rows(4).unwrap();
        for row in 0..4 {
            t.set_string(c, row, &row.to_string()).unwrap();
        }
        assert!(!t.optimize(c).unwrap());
        assert_eq!(t.get_real_column_type(c).unwrap(), ColumnType::String);
    }

    #[test]
    fn test_subtables_and_links() {
        let mut t = table();
        let sub = t
            .add_subtable_column("items", vec![ColumnSpec::new(ColumnType::Int, "qty")])
            .unwrap();
        let link = t.add_column(ColumnType::Link, "next").unwrap();
        let list = t.add_column(ColumnType::LinkList, "refs").unwrap();
        t.add_empty_rows(3).unwrap();

        assert!(t.get_subtable(sub, 0).is_none());
        {
            let inner = t.get_subtable_mut(sub, 1).unwrap();
            let row = inner.add_empty_row().unwrap();
            inner.set_int(0, row, 9).unwrap();
        }
        assert_eq!(t.get_subtable(sub, 1).map(|s| s.size()), Some(1));

        t.set_link(link, 0, Some(2)).unwrap();
        assert_eq!(t.get_link(link, 0).unwrap(), Some(2));
        assert_eq!(t.get_link(link, 1).unwrap(), None);
        t.add_link_list_entry(list, 2, 0).unwrap();
        t.add_link_list_entry(list, 2, 1).unwrap();
        assert_eq!(t.get_link_list(list, 2).unwrap(), vec![0, 1]);

        t.remove(0).unwrap();
        assert_eq!(t.get_subtable(sub, 0).map(|s| s.get_int(0, 0).unwrap()), Some(9));
    }
}
