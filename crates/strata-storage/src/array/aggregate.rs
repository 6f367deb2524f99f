//! Range aggregates over packed arrays.

use super::find::{CountMatches, Equal};
use super::width::get_direct;
use super::Array;

impl Array {
    /// Wrapping sum of elements in `[start, end)`.
    pub fn sum(&self, start: usize, end: usize) -> i64 {
        let end = end.min(self.size);
        if start >= end {
            return 0;
        }
        match self.width {
            0 => 0,
            1 => self.sum_bits::<1>(start, end),
            2 => self.sum_bits::<2>(start, end),
            4 => self.sum_bits::<4>(start, end),
            8 => self.sum_width::<8>(start, end),
            16 => self.sum_width::<16>(start, end),
            32 => self.sum_width::<32>(start, end),
            _ => self.sum_width::<64>(start, end),
        }
    }

    fn sum_width<const W: usize>(&self, start: usize, end: usize) -> i64 {
        let mut total = 0i64;
        for i in start..end {
            // SAFETY: i < end <= size.
            total = total.wrapping_add(unsafe { get_direct::<W>(self.data, i) });
        }
        total
    }

    /// Sub-byte widths: whole 64-bit chunks are summed by popcount per bit
    /// plane.
    fn sum_bits<const W: usize>(&self, start: usize, end: usize) -> i64 {
        let per_chunk = 64 / W;
        let first = start.next_multiple_of(per_chunk).min(end);
        let mut total = self.sum_width::<W>(start, first);
        let mut i = first;
        let mask = (1u64 << W) - 1;
        let lower = !0u64 / mask;
        while i + per_chunk <= end {
            let mut bytes = [0u8; 8];
            // SAFETY: the chunk lies below end <= size.
            unsafe { std::ptr::copy_nonoverlapping(self.data.add(i * W / 8), bytes.as_mut_ptr(), 8) };
            let chunk = u64::from_le_bytes(bytes);
            for bit in 0..W {
                let plane = (chunk >> bit) & lower;
                total += i64::from(plane.count_ones()) << bit;
            }
            i += per_chunk;
        }
        total + self.sum_width::<W>(i, end)
    }

    /// Smallest element in `[start, end)` and its first index.
    pub fn minimum(&self, start: usize, end: usize) -> Option<(i64, usize)> {
        self.extreme(start, end, |v, best| v < best)
    }

    /// Largest element in `[start, end)` and its first index.
    pub fn maximum(&self, start: usize, end: usize) -> Option<(i64, usize)> {
        self.extreme(start, end, |v, best| v > best)
    }

    fn extreme(&self, start: usize, end: usize, better: impl Fn(i64, i64) -> bool) -> Option<(i64, usize)> {
        let end = end.min(self.size);
        if start >= end {
            return None;
        }
        let mut best = (self.get(start), start);
        if self.width == 0 {
            return Some(best);
        }
        for i in start + 1..end {
            let v = self.get(i);
            if better(v, best.0) {
                best = (v, i);
            }
        }
        Some(best)
    }

    /// Number of elements equal to `value`.
    pub fn count(&self, value: i64) -> usize {
        let mut state = CountMatches::default();
        self.find::<Equal, _>(value, 0, self.size, 0, &mut state);
        state.count
    }
}

#[cfg(test)]
mod tests {
    use crate::array::{Array, ArrayType};
    use std::sync::Arc;
    use strata_alloc::{Allocator, SlabAlloc};
    use strata_common::StorageConfig;

    fn array_of(values: &[i64]) -> Array {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let mut a = Array::create_new(&alloc, ArrayType::Normal).unwrap();
        for &v in values {
            a.add(v).unwrap();
        }
        a
    }

    #[test]
    fn test_sum_sub_byte_planes() {
        for modulus in [2i64, 4, 16] {
            let values: Vec<i64> = (0..333).map(|i| (i * 7) % modulus).collect();
            let a = array_of(&values);
            for &(s, e) in &[(0usize, 333usize), (5, 300), (64, 128), (3, 4)] {
                let expected: i64 = values[s..e].iter().sum();
                assert_eq!(a.sum(s, e), expected, "mod {modulus} [{s},{e})");
            }
        }
    }

    #[test]
    fn test_sum_wide_and_empty() {
        let a = array_of(&[-5, 1000, 70_000, -3]);
        assert_eq!(a.sum(0, 4), 70_992);
        assert_eq!(a.sum(2, 2), 0);
        assert_eq!(a.sum(0, 100), 70_992);
    }

    #[test]
    fn test_min_max_first_index() {
        let a = array_of(&[4, 1, 9, 1, 9]);
        assert_eq!(a.minimum(0, 5), Some((1, 1)));
        assert_eq!(a.maximum(0, 5), Some((9, 2)));
        assert_eq!(a.maximum(3, 4), Some((1, 3)));
        assert_eq!(a.minimum(5, 5), None);
    }

    #[test]
    fn test_count() {
        let a = array_of(&[3, 3, 3, 4, 4, 4, 5, 6, 7, 9, 9, 9]);
        assert_eq!(a.count(4), 3);
        assert_eq!(a.count(8), 0);
        let zeros = array_of(&[0; 100]);
        assert_eq!(zeros.count(0), 100);
    }
}
