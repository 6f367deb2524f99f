//! 16-byte vector comparison for byte-aligned widths.
//!
//! Widths 8, 16 and 32 use SSE2, which every x86_64 CPU has. Width 64 needs
//! SSE4.2 for the signed 64-bit compare and is only used when the CPU reports
//! it. Other targets fall back to the SWAR and scalar paths in `find`.

use super::find::{Condition, ConditionKind, FindState};
use super::width::get_direct;

/// Returns true if `find_blocks` can run `kind` at width `W` on this CPU.
pub(crate) fn supported<const W: usize>(kind: ConditionKind) -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        let op = matches!(
            kind,
            ConditionKind::Equal | ConditionKind::NotEqual | ConditionKind::Greater | ConditionKind::Less
        );
        match W {
            8 | 16 | 32 => op,
            64 => op && std::is_x86_feature_detected!("sse4.2"),
            _ => false,
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = kind;
        false
    }
}

/// Scans `[start, end)` in 16-byte blocks. `start` and `end` must be
/// multiples of the lane count, and `value` must fit a lane.
///
/// Returns false if the state stopped the scan.
pub(crate) fn find_blocks<C, S, const W: usize>(
    data: *const u8,
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
    let lane_bytes = W / 8;
    let lanes = 16 / lane_bytes;
    debug_assert!(start % lanes == 0 && end % lanes == 0);

    let mut i = start;
    while i < end {
        let hits = lane_bits(block_mask::<C, W>(data, i * lane_bytes, value), lane_bytes);
        if hits != 0 && !state.match_pattern(i + baseindex, hits) {
            let mut m = hits;
            while m != 0 {
                let idx = i + m.trailing_zeros() as usize;
                // SAFETY: idx lies inside the current block.
                let v = unsafe { get_direct::<W>(data, idx) };
                if !state.match_index(idx + baseindex, v) {
                    return false;
                }
                m &= m - 1;
            }
        }
        i += lanes;
    }
    true
}

/// Compresses a per-byte movemask into one bit per lane.
#[inline(always)]
fn lane_bits(byte_mask: u32, lane_bytes: usize) -> u64 {
    if lane_bytes == 1 {
        return u64::from(byte_mask);
    }
    let mut out = 0u64;
    for lane in 0..16 / lane_bytes {
        if byte_mask >> (lane * lane_bytes) & 1 != 0 {
            out |= 1 << lane;
        }
    }
    out
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn block_mask<C: Condition, const W: usize>(data: *const u8, offset: usize, value: i64) -> u32 {
    // SAFETY: the block lies inside the node's data and `supported` was
    // checked before the first call.
    unsafe {
        if W == 64 {
            x86::mask_sse42(C::KIND, data.add(offset), value)
        } else {
            x86::mask_sse2::<W>(C::KIND, data.add(offset), value)
        }
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
fn block_mask<C: Condition, const W: usize>(data: *const u8, offset: usize, value: i64) -> u32 {
    let lane_bytes = W / 8;
    let mut mask = 0u32;
    for lane in 0..16 / lane_bytes {
        // SAFETY: the block lies inside the node's data.
        let v = unsafe { get_direct::<W>(data, offset / lane_bytes + lane) };
        if C::eval(v, value) {
            mask |= ((1u32 << lane_bytes) - 1) << (lane * lane_bytes);
        }
    }
    mask
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use super::ConditionKind;
    use std::arch::x86_64::*;

    /// Per-byte match mask of one 16-byte block at width 8, 16 or 32.
    #[inline(always)]
    pub(super) unsafe fn mask_sse2<const W: usize>(kind: ConditionKind, p: *const u8, value: i64) -> u32 {
        unsafe {
            let block = _mm_loadu_si128(p as *const __m128i);
            let needle = match W {
                8 => _mm_set1_epi8(value as i8),
                16 => _mm_set1_epi16(value as i16),
                _ => _mm_set1_epi32(value as i32),
            };
            let cmp = match (kind, W) {
                (ConditionKind::Equal | ConditionKind::NotEqual, 8) => _mm_cmpeq_epi8(block, needle),
                (ConditionKind::Equal | ConditionKind::NotEqual, 16) => _mm_cmpeq_epi16(block, needle),
                (ConditionKind::Equal | ConditionKind::NotEqual, _) => _mm_cmpeq_epi32(block, needle),
                (ConditionKind::Greater, 8) => _mm_cmpgt_epi8(block, needle),
                (ConditionKind::Greater, 16) => _mm_cmpgt_epi16(block, needle),
                (ConditionKind::Greater, _) => _mm_cmpgt_epi32(block, needle),
                (_, 8) => _mm_cmpgt_epi8(needle, block),
                (_, 16) => _mm_cmpgt_epi16(needle, block),
                (_, _) => _mm_cmpgt_epi32(needle, block),
            };
            let m = _mm_movemask_epi8(cmp) as u32;
            if kind == ConditionKind::NotEqual {
                !m & 0xFFFF
            } else {
                m
            }
        }
    }

    /// Per-byte match mask of one 16-byte block at width 64.
    #[target_feature(enable = "sse4.2")]
    pub(super) unsafe fn mask_sse42(kind: ConditionKind, p: *const u8, value: i64) -> u32 {
        unsafe {
            let block = _mm_loadu_si128(p as *const __m128i);
            let needle = _mm_set1_epi64x(value);
            let cmp = match kind {
                ConditionKind::Equal | ConditionKind::NotEqual => _mm_cmpeq_epi64(block, needle),
                ConditionKind::Greater => _mm_cmpgt_epi64(block, needle),
                _ => _mm_cmpgt_epi64(needle, block),
            };
            let m = _mm_movemask_epi8(cmp) as u32;
            if kind == ConditionKind::NotEqual {
                !m & 0xFFFF
            } else {
                m
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::find::CollectAll;
    use crate::array::{Equal, Greater, Less, NotEqual};

    fn encode<const W: usize>(values: &[i64]) -> Vec<u8> {
        let mut buf = vec![0u8; values.len() * W / 8];
        for (i, &v) in values.iter().enumerate() {
            unsafe { crate::array::width::set_direct::<W>(buf.as_mut_ptr(), i, v) };
        }
        buf
    }

    fn run<C: Condition, const W: usize>(values: &[i64], needle: i64) -> Vec<usize> {
        let buf = encode::<W>(values);
        let mut out = Vec::new();
        find_blocks::<C, _, W>(buf.as_ptr(), needle, 0, values.len(), 0, &mut CollectAll { out: &mut out });
        out
    }

    fn expected<C: Condition>(values: &[i64], needle: i64) -> Vec<usize> {
        (0..values.len()).filter(|&i| C::eval(values[i], needle)).collect()
    }

    #[test]
    fn test_lane_bits_compression() {
        assert_eq!(lane_bits(0xFFFF, 8), 0b11);
        assert_eq!(lane_bits(0x00F0, 4), 0b10);
        assert_eq!(lane_bits(0x0303, 2), 0b10001);
        assert_eq!(lane_bits(0x8001, 1), 0x8001);
    }

    #[test]
    fn test_blocks_match_scalar() {
        let values: Vec<i64> = (0..64).map(|i| (i * 37 % 23) - 11).collect();
        if supported::<8>(ConditionKind::Equal) {
            for needle in [-11, 0, 5] {
                assert_eq!(run::<Equal, 8>(&values, needle), expected::<Equal>(&values, needle));
                assert_eq!(run::<NotEqual, 8>(&values, needle), expected::<NotEqual>(&values, needle));
                assert_eq!(run::<Greater, 16>(&values, needle), expected::<Greater>(&values, needle));
                assert_eq!(run::<Less, 32>(&values, needle), expected::<Less>(&values, needle));
            }
        }
        if supported::<64>(ConditionKind::Greater) {
            let wide: Vec<i64> = values.iter().map(|v| v * (1 << 40)).collect();
            let needle = 3 * (1 << 40);
            assert_eq!(run::<Greater, 64>(&wide, needle), expected::<Greater>(&wide, needle));
            assert_eq!(run::<Equal, 64>(&wide, needle), expected::<Equal>(&wide, needle));
        }
    }
}
