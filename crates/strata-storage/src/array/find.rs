//! Condition search over packed arrays.
//!
//! `Array::find` runs in up to three stages for every width:
//!
//! 1. the first few elements are tested one by one (cheap when the caller
//!    resumes right after a previous match),
//! 2. the current width's bounds can prove that nothing or everything
//!    matches,
//! 3. the rest is scanned with 16-byte vector blocks (widths 8 to 64), or
//!    64-bit SWAR chunks (widths 1 to 32), or element by element.
//!
//! Every stage reports matches in ascending order through [`FindState`], and
//! scanning stops the moment the state asks it to.

use super::simd;
use super::width::get_direct;
use super::Array;
use strata_common::{NOT_FOUND, NPOS};

/// Comparison performed by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    None,
}

/// A comparison between a stored element and a needle.
pub trait Condition: Copy + Default + Send + Sync + 'static {
    /// Which comparison this is.
    const KIND: ConditionKind;

    /// Evaluates `element <op> needle`.
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool;
}

/// A condition the packed integer search can run.
pub trait IntegerCondition: Condition {
    /// Returns false if no value in `[lbound, ubound]` can match.
    fn can_match(needle: i64, lbound: i64, ubound: i64) -> bool;

    /// Returns true if every value in `[lbound, ubound]` matches.
    fn will_match(needle: i64, lbound: i64, ubound: i64) -> bool;
}

/// `element == needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct Equal;

/// `element != needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct NotEqual;

/// `element > needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct Greater;

/// `element >= needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct GreaterEqual;

/// `element < needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct Less;

/// `element <= needle`
#[derive(Debug, Clone, Copy, Default)]
pub struct LessEqual;

/// Matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCondition;

impl Condition for Equal {
    const KIND: ConditionKind = ConditionKind::Equal;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element == needle
    }
}

impl Condition for NotEqual {
    const KIND: ConditionKind = ConditionKind::NotEqual;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element != needle
    }
}

impl Condition for Greater {
    const KIND: ConditionKind = ConditionKind::Greater;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element > needle
    }
}

impl Condition for GreaterEqual {
    const KIND: ConditionKind = ConditionKind::GreaterEqual;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element >= needle
    }
}

impl Condition for Less {
    const KIND: ConditionKind = ConditionKind::Less;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element < needle
    }
}

impl Condition for LessEqual {
    const KIND: ConditionKind = ConditionKind::LessEqual;
    #[inline(always)]
    fn eval<T: PartialOrd>(element: T, needle: T) -> bool {
        element <= needle
    }
}

impl Condition for NoCondition {
    const KIND: ConditionKind = ConditionKind::None;
    #[inline(always)]
    fn eval<T: PartialOrd>(_element: T, _needle: T) -> bool {
        true
    }
}

impl IntegerCondition for Equal {
    fn can_match(needle: i64, lbound: i64, ubound: i64) -> bool {
        needle >= lbound && needle <= ubound
    }
    fn will_match(needle: i64, lbound: i64, ubound: i64) -> bool {
        needle == 0 && lbound == 0 && ubound == 0
    }
}

impl IntegerCondition for NotEqual {
    fn can_match(needle: i64, lbound: i64, ubound: i64) -> bool {
        !(needle == 0 && lbound == 0 && ubound == 0)
    }
    fn will_match(needle: i64, lbound: i64, ubound: i64) -> bool {
        needle > ubound || needle < lbound
    }
}

impl IntegerCondition for Greater {
    fn can_match(needle: i64, _lbound: i64, ubound: i64) -> bool {
        ubound > needle
    }
    fn will_match(needle: i64, lbound: i64, _ubound: i64) -> bool {
        lbound > needle
    }
}

impl IntegerCondition for Less {
    fn can_match(needle: i64, lbound: i64, _ubound: i64) -> bool {
        lbound < needle
    }
    fn will_match(needle: i64, _lbound: i64, ubound: i64) -> bool {
        ubound < needle
    }
}

impl IntegerCondition for NoCondition {
    fn can_match(_needle: i64, _lbound: i64, _ubound: i64) -> bool {
        true
    }
    fn will_match(_needle: i64, _lbound: i64, _ubound: i64) -> bool {
        true
    }
}

/// Receiver of matches found by [`Array::find`].
pub trait FindState {
    /// Records a match of `value` at `index`. Returns false to stop.
    fn match_index(&mut self, index: usize, value: i64) -> bool;

    /// Offers a batch of matches starting at element `index`. `mask` has one
    /// set bit per matching element. Returns true if the batch was consumed;
    /// otherwise the matches are reported one by one.
    fn match_pattern(&mut self, _index: usize, _mask: u64) -> bool {
        false
    }

    /// Offers the whole range `array[start..end]` as matches at once.
    /// Returns `None` to receive them one by one instead, or whether
    /// scanning should continue.
    fn match_all(
        &mut self,
        _array: &Array,
        _start: usize,
        _end: usize,
        _baseindex: usize,
    ) -> Option<bool> {
        None
    }
}

/// Stops at the first match.
#[derive(Debug)]
pub(crate) struct FirstMatch {
    pub index: usize,
}

impl FindState for FirstMatch {
    fn match_index(&mut self, index: usize, _value: i64) -> bool {
        self.index = index;
        false
    }
}

/// Collects every match.
pub(crate) struct CollectAll<'a> {
    pub out: &'a mut Vec<usize>,
}

impl FindState for CollectAll<'_> {
    fn match_index(&mut self, index: usize, _value: i64) -> bool {
        self.out.push(index);
        true
    }
}

/// Counts matches, consuming whole batches.
#[derive(Debug, Default)]
pub(crate) struct CountMatches {
    pub count: usize,
}

impl FindState for CountMatches {
    fn match_index(&mut self, _index: usize, _value: i64) -> bool {
        self.count += 1;
        true
    }

    fn match_pattern(&mut self, _index: usize, mask: u64) -> bool {
        self.count += mask.count_ones() as usize;
        true
    }

    fn match_all(&mut self, _array: &Array, start: usize, end: usize, _base: usize) -> Option<bool> {
        self.count += end - start;
        Some(true)
    }
}

/// All-ones mask for one lane of `width` bits.
#[inline(always)]
const fn lane_mask(width: usize) -> u64 {
    if width >= 64 {
        !0
    } else {
        (1u64 << width) - 1
    }
}

impl Array {
    /// Reports every element in `[start, end)` satisfying `element <C> value`
    /// to `state`, as index `baseindex + i`. `end` may be `NPOS`.
    ///
    /// Returns false if the state stopped the scan.
    pub fn find<C, S>(&self, value: i64, start: usize, end: usize, baseindex: usize, state: &mut S) -> bool
    where
        C: IntegerCondition,
        S: FindState + ?Sized,
    {
        let end = if end == NPOS { self.size } else { end.min(self.size) };
        let mut start = start;

        if start > 0 {
            for _ in 0..4 {
                if start >= end {
                    return true;
                }
                let v = self.get(start);
                if C::eval(v, value) && !state.match_index(start + baseindex, v) {
                    return false;
                }
                start += 1;
            }
        }
        if start >= end {
            return true;
        }

        if !C::can_match(value, self.lbound, self.ubound) {
            return true;
        }
        if C::will_match(value, self.lbound, self.ubound) {
            if let Some(cont) = state.match_all(self, start, end, baseindex) {
                return cont;
            }
            for i in start..end {
                if !state.match_index(i + baseindex, self.get(i)) {
                    return false;
                }
            }
            return true;
        }

        match self.width {
            0 => self.scan_scalar::<C, S, 0>(value, start, end, baseindex, state),
            1 => self.find_width::<C, S, 1>(value, start, end, baseindex, state),
            2 => self.find_width::<C, S, 2>(value, start, end, baseindex, state),
            4 => self.find_width::<C, S, 4>(value, start, end, baseindex, state),
            8 => self.find_width::<C, S, 8>(value, start, end, baseindex, state),
            16 => self.find_width::<C, S, 16>(value, start, end, baseindex, state),
            32 => self.find_width::<C, S, 32>(value, start, end, baseindex, state),
            _ => self.find_width::<C, S, 64>(value, start, end, baseindex, state),
        }
    }

    /// Index of the first element equal to `value` in `[start, end)`, or
    /// `NOT_FOUND`.
    pub fn find_first(&self, value: i64, start: usize, end: usize) -> usize {
        self.find_first_cond::<super::Equal>(value, start, end)
    }

    /// Index of the first element satisfying `C` in `[start, end)`, or
    /// `NOT_FOUND`.
    pub fn find_first_cond<C: IntegerCondition>(&self, value: i64, start: usize, end: usize) -> usize {
        let mut state = FirstMatch { index: NOT_FOUND };
        self.find::<C, _>(value, start, end, 0, &mut state);
        state.index
    }

    /// Appends `baseindex + i` for every element equal to `value`.
    pub fn find_all(&self, value: i64, start: usize, end: usize, baseindex: usize, out: &mut Vec<usize>) {
        let mut state = CollectAll { out };
        self.find::<Equal, _>(value, start, end, baseindex, &mut state);
    }

    /// Reports `baseindex + k` for every `k < count` where
    /// `self[start + k] <C> other[other_start + k]`.
    pub fn compare_leafs<C, S>(
        &self,
        start: usize,
        other: &Array,
        other_start: usize,
        count: usize,
        baseindex: usize,
        state: &mut S,
    ) -> bool
    where
        C: Condition,
        S: FindState + ?Sized,
    {
        debug_assert!(start + count <= self.size && other_start + count <= other.size);
        for k in 0..count {
            let v1 = self.get(start + k);
            let v2 = other.get(other_start + k);
            if C::eval(v1, v2) && !state.match_index(baseindex + k, v1) {
                return false;
            }
        }
        true
    }

    fn find_width<C, S, const W: usize>(
        &self,
        value: i64,
        start: usize,
        end: usize,
        baseindex: usize,
        state: &mut S,
    ) -> bool
    where
        C: IntegerCondition,
        S: FindState + ?Sized,
    {
        if W >= 8 && simd::supported::<W>(C::KIND) {
            let lanes = 128 / W;
            let first = start.next_multiple_of(lanes).min(end);
            let last = first + (end - first) / lanes * lanes;
            if last > first {
                return self.scan_scalar::<C, S, W>(value, start, first, baseindex, state)
                    && simd::find_blocks::<C, S, W>(self.data, value, first, last, baseindex, state)
                    && self.scan_scalar::<C, S, W>(value, last, end, baseindex, state);
            }
        }
        match C::KIND {
            ConditionKind::Equal if W < 64 => {
                self.compare_equality::<C, S, W>(true, value, start, end, baseindex, state)
            }
            ConditionKind::NotEqual if W < 64 => {
                self.compare_equality::<C, S, W>(false, value, start, end, baseindex, state)
            }
            ConditionKind::Greater if W < 64 => {
                self.compare_relation::<C, S, W>(true, value, start, end, baseindex, state)
            }
            ConditionKind::Less if W < 64 => {
                self.compare_relation::<C, S, W>(false, value, start, end, baseindex, state)
            }
            _ => self.scan_scalar::<C, S, W>(value, start, end, baseindex, state),
        }
    }

    #[inline]
    fn scan_scalar<C, S, const W: usize>(
        &self,
        value: i64,
        start: usize,
        end: usize,
        baseindex: usize,
        state: &mut S,
    ) -> bool
    where
        C: Condition,
        S: FindState + ?Sized,
    {
        for i in start..end {
            // SAFETY: i < end <= size.
            let v = unsafe { get_direct::<W>(self.data, i) };
            if C::eval(v, value) && !state.match_index(i + baseindex, v) {
                return false;
            }
        }
        true
    }

    /// Reads the 64-bit chunk holding elements `[i, i + 64/W)`.
    #[inline(always)]
    fn chunk_at<const W: usize>(&self, i: usize) -> u64 {
        let mut bytes = [0u8; 8];
        // SAFETY: i is chunk aligned and the chunk lies below end <= size.
        unsafe {
            std::ptr::copy_nonoverlapping(self.data.add(i * W / 8), bytes.as_mut_ptr(), 8);
        }
        u64::from_le_bytes(bytes)
    }

    /// Reports the lanes flagged in `hits` (one set bit per lane) for the
    /// chunk starting at element `i`.
    #[inline(always)]
    fn report_lanes<S, const W: usize>(&self, i: usize, hits: u64, baseindex: usize, state: &mut S) -> bool
    where
        S: FindState + ?Sized,
    {
        if hits == 0 || state.match_pattern(i + baseindex, hits) {
            return true;
        }
        let mut m = hits;
        while m != 0 {
            let idx = i + m.trailing_zeros() as usize / W;
            // SAFETY: idx lies inside the current chunk.
            let v = unsafe { get_direct::<W>(self.data, idx) };
            if !state.match_index(idx + baseindex, v) {
                return false;
            }
            m &= m - 1;
        }
        true
    }

    /// SWAR equality. XOR with the lane-replicated needle turns matches into
    /// zero lanes, which are flagged exactly in each lane's high bit.
    fn compare_equality<C, S, const W: usize>(
        &self,
        eq: bool,
        value: i64,
        start: usize,
        end: usize,
        baseindex: usize,
        state: &mut S,
    ) -> bool
    where
        C: Condition,
        S: FindState + ?Sized,
    {
        let per_chunk = 64 / W;
        let first = start.next_multiple_of(per_chunk).min(end);
        if !self.scan_scalar::<C, S, W>(value, start, first, baseindex, state) {
            return false;
        }

        let mask = lane_mask(W);
        let lower = !0u64 / mask;
        let high = lower << (W - 1);
        let needle = lower.wrapping_mul(value as u64 & mask);

        let mut i = first;
        while i + per_chunk <= end {
            let x = self.chunk_at::<W>(i) ^ needle;
            let nonzero = (((x & !high).wrapping_add(!high)) | x) & high;
            let hits = if eq { !nonzero & high } else { nonzero };
            if !self.report_lanes::<S, W>(i, hits, baseindex, state) {
                return false;
            }
            i += per_chunk;
        }
        self.scan_scalar::<C, S, W>(value, i, end, baseindex, state)
    }

    /// SWAR greater/less. When no lane has its high bit set and the needle
    /// is a small non-negative value, `((chunk | H) - T) & H` flags exactly
    /// the lanes `>= T`. Other chunks are checked element by element.
    fn compare_relation<C, S, const W: usize>(
        &self,
        gt: bool,
        value: i64,
        start: usize,
        end: usize,
        baseindex: usize,
        state: &mut S,
    ) -> bool
    where
        C: Condition,
        S: FindState + ?Sized,
    {
        let mask = lane_mask(W);
        let lane_max = (mask >> 1) as i64;
        let fast = W >= 2 && value >= 0 && value <= lane_max - i64::from(gt);
        if !fast {
            return self.scan_scalar::<C, S, W>(value, start, end, baseindex, state);
        }

        let per_chunk = 64 / W;
        let first = start.next_multiple_of(per_chunk).min(end);
        if !self.scan_scalar::<C, S, W>(value, start, first, baseindex, state) {
            return false;
        }

        let lower = !0u64 / mask;
        let high = lower << (W - 1);
        let threshold = if gt { value + 1 } else { value };
        let t = lower.wrapping_mul(threshold as u64);

        let mut i = first;
        while i + per_chunk <= end {
            let chunk = self.chunk_at::<W>(i);
            let cont = if chunk & high != 0 {
                self.scan_scalar::<C, S, W>(value, i, i + per_chunk, baseindex, state)
            } else {
                let ge = (chunk | high).wrapping_sub(t) & high;
                let hits = if gt { ge } else { !ge & high };
                self.report_lanes::<S, W>(i, hits, baseindex, state)
            };
            if !cont {
                return false;
            }
            i += per_chunk;
        }
        self.scan_scalar::<C, S, W>(value, i, end, baseindex, state)
    }
}
