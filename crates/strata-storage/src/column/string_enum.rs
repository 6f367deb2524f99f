//! Enumerated string columns.
//!
//! ```text
//! keys:   [ "blue", "green", "red" ]      distinct values
//! values: [ 2, 0, 0, 1, 2, ... ]          key index per row
//! ```
//!
//! Equality scans resolve the needle to a key index once and then run an
//! integer scan over `values`.

use std::sync::Arc;

use strata_alloc::Allocator;
use strata_common::{Ref, Result, NOT_FOUND, NPOS};

use crate::write::{write_ref_node, ArrayWriter};

use super::{IntColumn, StringColumn, StringIndex};

/// A string column stored as key indexes into a list of distinct values.
pub struct StringEnumColumn {
    keys: StringColumn,
    values: IntColumn,
    index: Option<StringIndex>,
}

impl StringEnumColumn {
    /// Creates an empty column without keys.
    pub fn create(alloc: &Arc<dyn Allocator>, max_node_size: usize) -> Result<Self> {
        Ok(Self {
            keys: StringColumn::create(alloc, max_node_size)?,
            values: IntColumn::create(alloc, max_node_size)?,
            index: None,
        })
    }

    /// Enumerates the values of `source`. Keys are sorted.
    pub fn from_strings(alloc: &Arc<dyn Allocator>, source: &StringColumn, max_node_size: usize) -> Result<Self> {
        let strings: Vec<String> = (0..source.size()).map(|i| source.get(i)).collect();
        let mut distinct = strings.clone();
        distinct.sort_unstable();
        distinct.dedup();

        let mut keys = StringColumn::create(alloc, max_node_size)?;
        for key in &distinct {
            keys.add(key)?;
        }
        let mut values = IntColumn::create(alloc, max_node_size)?;
        for s in &strings {
            // Every string is present in `distinct`.
            let ndx = distinct.binary_search(s).unwrap_or(0);
            values.add(ndx as i64)?;
        }
        Ok(Self {
            keys,
            values,
            index: None,
        })
    }

    pub fn keys(&self) -> &StringColumn {
        &self.keys
    }

    pub fn values(&self) -> &IntColumn {
        &self.values
    }

    pub fn key_count(&self) -> usize {
        self.keys.size()
    }

    /// Index of `value` among the keys.
    pub fn get_key_ndx(&self, value: &str) -> Option<usize> {
        match self.keys.find_first(value, 0, NPOS) {
            NOT_FOUND => None,
            ndx => Some(ndx),
        }
    }

    fn get_key_ndx_or_add(&mut self, value: &str) -> Result<usize> {
        if let Some(ndx) = self.get_key_ndx(value) {
            return Ok(ndx);
        }
        self.keys.add(value)?;
        Ok(self.keys.size() - 1)
    }

    pub fn size(&self) -> usize {
        self.values.size()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, ndx: usize) -> String {
        self.keys.get(self.values.get(ndx) as usize)
    }

    pub fn set(&mut self, ndx: usize, value: &str) -> Result<()> {
        if let Some(index) = self.index.as_mut() {
            let old = self.keys.get(self.values.get(ndx) as usize);
            index.set(ndx, &old, value);
        }
        let key = self.get_key_ndx_or_add(value)?;
        self.values.set(ndx, key as i64)
    }

    pub fn insert(&mut self, ndx: usize, value: &str) -> Result<()> {
        let size = self.size();
        let row = if ndx == NPOS { size } else { ndx };
        let key = self.get_key_ndx_or_add(value)?;
        self.values.insert(row, key as i64)?;
        if let Some(index) = self.index.as_mut() {
            index.insert(row, value, row == size);
        }
        Ok(())
    }

    pub fn add(&mut self, value: &str) -> Result<()> {
        self.insert(NPOS, value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        if self.index.is_some() {
            let old = self.get(ndx);
            let is_last = ndx + 1 == self.size();
            if let Some(index) = self.index.as_mut() {
                index.erase(ndx, &old, is_last);
            }
        }
        self.values.erase(ndx)
    }

    /// Removes every row. Keys are kept.
    pub fn clear(&mut self) -> Result<()> {
        if let Some(index) = self.index.as_mut() {
            index.clear();
        }
        self.values.clear()
    }

    pub fn destroy(&mut self) {
        self.keys.destroy();
        self.values.destroy();
    }

    // ===== Search index =====

    pub fn add_search_index(&mut self) {
        let values: Vec<String> = (0..self.size()).map(|i| self.get(i)).collect();
        self.index = Some(StringIndex::build(values.iter().enumerate().map(|(i, v)| (i, v.as_str()))));
    }

    pub(crate) fn set_search_index(&mut self, index: Option<StringIndex>) {
        self.index = index;
    }

    pub fn has_search_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn search_index(&self) -> Option<&StringIndex> {
        self.index.as_ref()
    }

    // ===== Search =====

    /// First row in `[start, end)` holding `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: &str, start: usize, end: usize) -> usize {
        match self.get_key_ndx(value) {
            Some(key) => self.values.find_first(key as i64, start, end),
            None => NOT_FOUND,
        }
    }

    pub fn find_all(&self, value: &str, start: usize, end: usize) -> Vec<usize> {
        match self.get_key_ndx(value) {
            Some(key) => self.values.find_all(key as i64, start, end),
            None => Vec::new(),
        }
    }

    pub fn count(&self, value: &str) -> usize {
        match self.get_key_ndx(value) {
            Some(key) => self.values.count(key as i64),
            None => 0,
        }
    }

    /// Writes keys and values under a two-slot top node.
    pub fn write(&self, writer: &mut dyn ArrayWriter) -> Result<Ref> {
        let keys = self.keys.write(writer)?;
        let values = self.values.write(writer)?;
        write_ref_node(writer, &[keys, values])
    }
}
