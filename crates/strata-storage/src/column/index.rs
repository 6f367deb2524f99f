//! Search index for string columns.

use std::collections::BTreeMap;

use strata_common::NOT_FOUND;

/// Maps each distinct value to the ascending list of rows holding it.
#[derive(Debug, Clone, Default)]
pub struct StringIndex {
    map: BTreeMap<String, Vec<usize>>,
}

impl StringIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index over `(row, value)` pairs given in row order.
    pub fn build<'a>(values: impl IntoIterator<Item = (usize, &'a str)>) -> Self {
        let mut index = Self::new();
        for (row, value) in values {
            index.map.entry(value.to_string()).or_default().push(row);
        }
        index
    }

    /// Records `value` at `row`. Unless appending, rows at or after `row`
    /// move up by one first.
    pub fn insert(&mut self, row: usize, value: &str, is_append: bool) {
        if !is_append {
            self.shift(row, 1);
        }
        let rows = self.map.entry(value.to_string()).or_default();
        let pos = rows.partition_point(|&r| r < row);
        rows.insert(pos, row);
    }

    /// Moves `row` from `old` to `new`.
    pub fn set(&mut self, row: usize, old: &str, new: &str) {
        if old == new {
            return;
        }
        self.remove_row(row, old);
        let rows = self.map.entry(new.to_string()).or_default();
        let pos = rows.partition_point(|&r| r < row);
        rows.insert(pos, row);
    }

    /// Forgets `row` (holding `value`). Unless it was the last row, later
    /// rows move down by one.
    pub fn erase(&mut self, row: usize, value: &str, is_last: bool) {
        self.remove_row(row, value);
        if !is_last {
            self.shift(row + 1, -1);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// First row holding `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: &str) -> usize {
        self.map.get(value).and_then(|rows| rows.first().copied()).unwrap_or(NOT_FOUND)
    }

    /// Every row holding `value`, ascending.
    pub fn find_all(&self, value: &str) -> &[usize] {
        self.map.get(value).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, value: &str) -> usize {
        self.find_all(value).len()
    }

    /// Number of distinct values.
    pub fn distinct(&self) -> usize {
        self.map.len()
    }

    fn remove_row(&mut self, row: usize, value: &str) {
        if let Some(rows) = self.map.get_mut(value) {
            if let Ok(pos) = rows.binary_search(&row) {
                rows.remove(pos);
            }
            if rows.is_empty() {
                self.map.remove(value);
            }
        }
    }

    fn shift(&mut self, from: usize, diff: isize) {
        for rows in self.map.values_mut() {
            let pos = rows.partition_point(|&r| r < from);
            for r in &mut rows[pos..] {
                *r = r.wrapping_add_signed(diff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_tracks_row_moves() {
        let mut index = StringIndex::build([(0, "a"), (1, "b"), (2, "a")]);
        assert_eq!(index.find_all("a"), &[0, 2]);

        index.insert(1, "c", false);
        assert_eq!(index.find_all("a"), &[0, 3]);
        assert_eq!(index.find_all("b"), &[2]);
        assert_eq!(index.find_first("c"), 1);

        index.set(3, "a", "b");
        assert_eq!(index.find_all("b"), &[2, 3]);

        index.erase(0, "a", false);
        assert_eq!(index.find_first("a"), NOT_FOUND);
        assert_eq!(index.find_all("b"), &[1, 2]);
        assert_eq!(index.find_all("c"), &[0]);
        assert_eq!(index.distinct(), 2);
    }
}
