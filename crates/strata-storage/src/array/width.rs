//! Per-width element codecs and value bounds.
//!
//! Widths 1, 2 and 4 hold unsigned values; widths 8 and up hold signed
//! little-endian values. Each codec is monomorphized over the width and
//! selected once into a function pointer when an accessor attaches or its
//! width changes.

/// Reads element `ndx` from packed data.
pub(crate) type Getter = unsafe fn(*const u8, usize) -> i64;

/// Writes element `ndx` into packed data.
pub(crate) type Setter = unsafe fn(*mut u8, usize, i64);

/// Reads element `ndx` at width `W`.
///
/// # Safety
/// `data` must cover element `ndx` at width `W`.
#[inline(always)]
pub(crate) unsafe fn get_direct<const W: usize>(data: *const u8, ndx: usize) -> i64 {
    match W {
        0 => 0,
        1 => ((*data.add(ndx >> 3) >> (ndx & 7)) & 0x1) as i64,
        2 => ((*data.add(ndx >> 2) >> ((ndx & 3) << 1)) & 0x3) as i64,
        4 => ((*data.add(ndx >> 1) >> ((ndx & 1) << 2)) & 0xF) as i64,
        8 => *(data.add(ndx) as *const i8) as i64,
        16 => i16::from_le(std::ptr::read_unaligned(data.add(ndx * 2) as *const i16)) as i64,
        32 => i32::from_le(std::ptr::read_unaligned(data.add(ndx * 4) as *const i32)) as i64,
        64 => i64::from_le(std::ptr::read_unaligned(data.add(ndx * 8) as *const i64)),
        _ => unreachable!("invalid width {W}"),
    }
}

/// Writes element `ndx` at width `W`. The value must fit the width.
///
/// # Safety
/// `data` must cover element `ndx` at width `W`.
#[inline(always)]
pub(crate) unsafe fn set_direct<const W: usize>(data: *mut u8, ndx: usize, value: i64) {
    match W {
        0 => debug_assert_eq!(value, 0),
        1 => {
            let p = data.add(ndx >> 3);
            let shift = ndx & 7;
            *p = (*p & !(0x1 << shift)) | (((value as u8) & 0x1) << shift);
        }
        2 => {
            let p = data.add(ndx >> 2);
            let shift = (ndx & 3) << 1;
            *p = (*p & !(0x3 << shift)) | (((value as u8) & 0x3) << shift);
        }
        4 => {
            let p = data.add(ndx >> 1);
            let shift = (ndx & 1) << 2;
            *p = (*p & !(0xF << shift)) | (((value as u8) & 0xF) << shift);
        }
        8 => *(data.add(ndx) as *mut i8) = value as i8,
        16 => std::ptr::write_unaligned(data.add(ndx * 2) as *mut i16, (value as i16).to_le()),
        32 => std::ptr::write_unaligned(data.add(ndx * 4) as *mut i32, (value as i32).to_le()),
        64 => std::ptr::write_unaligned(data.add(ndx * 8) as *mut i64, value.to_le()),
        _ => unreachable!("invalid width {W}"),
    }
}

/// Selects the reader for a width.
pub(crate) fn getter_for(width: usize) -> Getter {
    match width {
        0 => get_direct::<0>,
        1 => get_direct::<1>,
        2 => get_direct::<2>,
        4 => get_direct::<4>,
        8 => get_direct::<8>,
        16 => get_direct::<16>,
        32 => get_direct::<32>,
        _ => get_direct::<64>,
    }
}

/// Selects the writer for a width.
pub(crate) fn setter_for(width: usize) -> Setter {
    match width {
        0 => set_direct::<0>,
        1 => set_direct::<1>,
        2 => set_direct::<2>,
        4 => set_direct::<4>,
        8 => set_direct::<8>,
        16 => set_direct::<16>,
        32 => set_direct::<32>,
        _ => set_direct::<64>,
    }
}

/// Smallest value representable at `width`.
#[inline]
pub const fn lbound_for_width(width: usize) -> i64 {
    match width {
        0 | 1 | 2 | 4 => 0,
        8 => -0x80,
        16 => -0x8000,
        32 => -0x8000_0000,
        _ => i64::MIN,
    }
}

/// Largest value representable at `width`.
#[inline]
pub const fn ubound_for_width(width: usize) -> i64 {
    match width {
        0 => 0,
        1 => 0x1,
        2 => 0x3,
        4 => 0xF,
        8 => 0x7F,
        16 => 0x7FFF,
        32 => 0x7FFF_FFFF,
        _ => i64::MAX,
    }
}

/// Smallest legal width that represents `value`.
#[inline]
pub fn bit_width(value: i64) -> usize {
    if (value as u64) >> 4 == 0 {
        const BITS: [usize; 16] = [0, 1, 2, 2, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4, 4];
        return BITS[value as usize];
    }
    let v = if value < 0 { !value } else { value };
    if v >> 31 != 0 {
        64
    } else if v >> 15 != 0 {
        32
    } else if v >> 7 != 0 {
        16
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_width_boundaries() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(3), 2);
        assert_eq!(bit_width(4), 4);
        assert_eq!(bit_width(15), 4);
        assert_eq!(bit_width(16), 8);
        assert_eq!(bit_width(127), 8);
        assert_eq!(bit_width(-1), 8);
        assert_eq!(bit_width(-128), 8);
        assert_eq!(bit_width(128), 16);
        assert_eq!(bit_width(-129), 16);
        assert_eq!(bit_width(32767), 16);
        assert_eq!(bit_width(32768), 32);
        assert_eq!(bit_width(i32::MIN as i64), 32);
        assert_eq!(bit_width(i32::MAX as i64 + 1), 64);
        assert_eq!(bit_width(i64::MIN), 64);
    }

    #[test]
    fn test_bounds_agree_with_bit_width() {
        for &w in &[0usize, 1, 2, 4, 8, 16, 32, 64] {
            let lo = lbound_for_width(w);
            let hi = ubound_for_width(w);
            assert!(bit_width(lo) <= w);
            assert!(bit_width(hi) <= w);
            if w < 64 {
                assert!(bit_width(hi + 1) > w);
            }
        }
    }

    #[test]
    fn test_roundtrip_each_width() {
        for &w in &[1usize, 2, 4, 8, 16, 32, 64] {
            let mut buf = vec![0u8; 64 * 8];
            let get = getter_for(w);
            let set = setter_for(w);
            let lo = lbound_for_width(w);
            let hi = ubound_for_width(w);
            let values: Vec<i64> = (0..64)
                .map(|i| if i % 2 == 0 { hi - i as i64 % 3 } else { lo + i as i64 % 2 })
                .map(|v| v.clamp(lo, hi))
                .collect();
            unsafe {
                for (i, &v) in values.iter().enumerate() {
                    set(buf.as_mut_ptr(), i, v);
                }
                for (i, &v) in values.iter().enumerate() {
                    assert_eq!(get(buf.as_ptr(), i), v, "width {w} index {i}");
                }
            }
        }
    }

    #[test]
    fn test_sub_byte_neighbours_untouched() {
        let mut buf = [0xFFu8; 2];
        unsafe {
            set_direct::<2>(buf.as_mut_ptr(), 1, 0);
            assert_eq!(buf[0], 0b1111_0011);
            assert_eq!(get_direct::<2>(buf.as_ptr(), 0), 3);
            assert_eq!(get_direct::<2>(buf.as_ptr(), 1), 0);
            assert_eq!(get_direct::<4>(buf.as_ptr(), 2), 0xF);
        }
    }
}
