//! Subtable columns.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Result, StorageConfig};

use crate::table::{ColumnSpec, Table};

/// A column whose cells are tables sharing one schema.
///
/// A cell is degenerate (`None`) until its table is first requested for
/// writing.
pub struct SubtableColumn {
    alloc: Arc<dyn Allocator>,
    config: StorageConfig,
    spec: Vec<ColumnSpec>,
    tables: Vec<Option<Table>>,
}

impl SubtableColumn {
    pub fn new(alloc: &Arc<dyn Allocator>, config: StorageConfig, spec: Vec<ColumnSpec>) -> Self {
        Self {
            alloc: Arc::clone(alloc),
            config,
            spec,
            tables: Vec::new(),
        }
    }

    /// Schema shared by every subtable.
    pub fn spec(&self) -> &[ColumnSpec] {
        &self.spec
    }

    pub fn size(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Subtable at `row`, or `None` if it was never created.
    pub fn get(&self, row: usize) -> Option<&Table> {
        self.tables[row].as_ref()
    }

    /// Subtable at `row`, created empty on first use.
    pub fn get_or_create(&mut self, row: usize) -> Result<&mut Table> {
        let table = match self.tables[row].take() {
            Some(table) => table,
            None => Table::with_spec(&self.alloc, self.config, &self.spec)?,
        };
        Ok(self.tables[row].insert(table))
    }

    /// Inserts a degenerate cell.
    pub fn insert(&mut self, row: usize) {
        self.tables.insert(row, None);
    }

    pub fn erase(&mut self, row: usize) {
        if let Some(mut table) = self.tables.remove(row) {
            table.destroy();
        }
    }

    pub fn clear(&mut self) {
        for mut table in self.tables.drain(..).flatten() {
            table.destroy();
        }
    }

    pub fn destroy(&mut self) {
        self.clear();
    }
}
