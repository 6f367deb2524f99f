//! Packed array node header.
//!
//! Layout (8 bytes):
//! ```text
//! byte:  0   1   2   3   4                                  5   6   7
//!      +---+---+---+---+----------------------------------+---+---+---+
//!      | capacity  |rsv| I | R | C | wtype(2) | wcode(3)  |   size    |
//!      +---+---+---+---+----------------------------------+---+---+---+
//! I = inner B+-tree node, R = has refs, C = context flag
//! capacity and size are 24-bit big-endian; width = (1 << wcode) >> 1
//! ```

use strata_common::MAX_ARRAY_CAPACITY;

/// Size of the node header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Capacity in bytes given to a freshly created array.
pub(crate) const INITIAL_CAPACITY: usize = 128;

/// Largest 8-aligned capacity that fits the header field.
pub(crate) const MAX_ALIGNED_CAPACITY: usize = MAX_ARRAY_CAPACITY & !7;

/// How the width field translates into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WidthType {
    /// Width is bits per element.
    Bits = 0,
    /// Width is bytes per element.
    Multiply = 1,
    /// Elements are raw bytes; width is ignored.
    Ignore = 2,
}

impl WidthType {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => WidthType::Multiply,
            2 => WidthType::Ignore,
            _ => WidthType::Bits,
        }
    }
}

/// Decoded node header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Node is an inner node of a B+-tree.
    pub is_inner_bptree_node: bool,
    /// Elements may be refs to child nodes.
    pub has_refs: bool,
    /// Free flag for the owner's use.
    pub context_flag: bool,
    /// Width interpretation.
    pub wtype: WidthType,
    /// Element width (bits or bytes depending on wtype).
    pub width: usize,
    /// Number of elements.
    pub size: usize,
    /// Allocated bytes, header included.
    pub capacity: usize,
}

impl NodeHeader {
    /// Decodes a header.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let flags = buf[4];
        Self {
            is_inner_bptree_node: flags & 0x80 != 0,
            has_refs: flags & 0x40 != 0,
            context_flag: flags & 0x20 != 0,
            wtype: WidthType::from_bits((flags >> 3) & 0x3),
            width: width_from_code(flags & 0x7),
            size: read_u24(&buf[5..8]),
            capacity: read_u24(&buf[0..3]),
        }
    }

    /// Encodes the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        write_u24(&mut buf[0..3], self.capacity);
        buf[4] = (u8::from(self.is_inner_bptree_node) << 7)
            | (u8::from(self.has_refs) << 6)
            | (u8::from(self.context_flag) << 5)
            | ((self.wtype as u8) << 3)
            | width_code(self.width);
        write_u24(&mut buf[5..8], self.size);
        buf
    }

    /// Bytes occupied by header and elements, rounded up to 8.
    pub fn byte_size(&self) -> usize {
        calc_byte_size(self.size, self.width, self.wtype)
    }
}

/// Encodes a width as its 3-bit code.
#[inline]
pub fn width_code(width: usize) -> u8 {
    debug_assert!(width == 0 || (width.is_power_of_two() && width <= 64));
    if width == 0 {
        0
    } else {
        width.trailing_zeros() as u8 + 1
    }
}

/// Decodes a 3-bit width code.
#[inline]
pub fn width_from_code(code: u8) -> usize {
    (1usize << code) >> 1
}

/// Bytes needed for `size` elements plus header, rounded up to 8.
#[inline]
pub fn calc_byte_size(size: usize, width: usize, wtype: WidthType) -> usize {
    let data = match wtype {
        WidthType::Bits => (size * width).div_ceil(8),
        WidthType::Multiply => size * width,
        WidthType::Ignore => size,
    };
    (HEADER_SIZE + data + 7) & !7
}

#[inline]
fn read_u24(buf: &[u8]) -> usize {
    (usize::from(buf[0]) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2])
}

#[inline]
fn write_u24(buf: &mut [u8], value: usize) {
    debug_assert!(value <= MAX_ARRAY_CAPACITY);
    buf[0] = (value >> 16) as u8;
    buf[1] = (value >> 8) as u8;
    buf[2] = value as u8;
}

// ===== Raw header access =====
//
// These operate on the first byte of a node as translated by the allocator.

/// Reads the header at `header`.
///
/// # Safety
/// `header` must point to at least 8 readable bytes.
#[inline]
pub unsafe fn read_header(header: *const u8) -> NodeHeader {
    NodeHeader::from_bytes(std::slice::from_raw_parts(header, HEADER_SIZE))
}

/// Writes a full header.
///
/// # Safety
/// `header` must point to at least 8 writable bytes.
#[inline]
pub unsafe fn write_header(header: *mut u8, h: &NodeHeader) {
    std::ptr::copy_nonoverlapping(h.to_bytes().as_ptr(), header, HEADER_SIZE);
}

/// Returns true if the node at `header` is an inner B+-tree node.
///
/// # Safety
/// `header` must point to a node header.
#[inline]
pub unsafe fn is_inner_bptree_node_from_header(header: *const u8) -> bool {
    *header.add(4) & 0x80 != 0
}

/// Returns true if the node at `header` may contain refs.
///
/// # Safety
/// `header` must point to a node header.
#[inline]
pub unsafe fn has_refs_from_header(header: *const u8) -> bool {
    *header.add(4) & 0x40 != 0
}

/// Returns the element count of the node at `header`.
///
/// # Safety
/// `header` must point to a node header.
#[inline]
pub unsafe fn size_from_header(header: *const u8) -> usize {
    read_u24(std::slice::from_raw_parts(header.add(5), 3))
}

/// Returns the capacity field of the node at `header`.
///
/// # Safety
/// `header` must point to a node header.
#[inline]
pub unsafe fn capacity_from_header(header: *const u8) -> usize {
    read_u24(std::slice::from_raw_parts(header, 3))
}

/// Stores the element count.
///
/// # Safety
/// `header` must point to a writable node header.
#[inline]
pub(crate) unsafe fn set_header_size(header: *mut u8, size: usize) {
    write_u24(std::slice::from_raw_parts_mut(header.add(5), 3), size);
}

/// Stores the capacity.
///
/// # Safety
/// `header` must point to a writable node header.
#[inline]
pub(crate) unsafe fn set_header_capacity(header: *mut u8, capacity: usize) {
    write_u24(std::slice::from_raw_parts_mut(header, 3), capacity);
}

/// Stores the width code.
///
/// # Safety
/// `header` must point to a writable node header.
#[inline]
pub(crate) unsafe fn set_header_width(header: *mut u8, width: usize) {
    let flags = header.add(4);
    *flags = (*flags & !0x7) | width_code(width);
}

/// Sets or clears the context flag.
///
/// # Safety
/// `header` must point to a writable node header.
#[inline]
pub(crate) unsafe fn set_header_context_flag(header: *mut u8, value: bool) {
    let flags = header.add(4);
    if value {
        *flags |= 0x20;
    } else {
        *flags &= !0x20;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_codes() {
        let widths = [0usize, 1, 2, 4, 8, 16, 32, 64];
        for (code, &w) in widths.iter().enumerate() {
            assert_eq!(width_code(w), code as u8);
            assert_eq!(width_from_code(code as u8), w);
        }
    }

    #[test]
    fn test_header_bit_layout() {
        let h = NodeHeader {
            is_inner_bptree_node: true,
            has_refs: true,
            context_flag: false,
            wtype: WidthType::Bits,
            width: 16,
            size: 0x01_0203,
            capacity: 0x0A_0B0C,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes, [0x0A, 0x0B, 0x0C, 0x00, 0xC5, 0x01, 0x02, 0x03]);
        assert_eq!(NodeHeader::from_bytes(&bytes), h);
    }

    #[test]
    fn test_header_wtype_bits() {
        let h = NodeHeader {
            is_inner_bptree_node: false,
            has_refs: false,
            context_flag: true,
            wtype: WidthType::Ignore,
            width: 1,
            size: 3,
            capacity: 128,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes[4], 0x20 | (2 << 3) | 1);
        assert_eq!(NodeHeader::from_bytes(&bytes).wtype, WidthType::Ignore);
    }

    #[test]
    fn test_calc_byte_size() {
        assert_eq!(calc_byte_size(0, 0, WidthType::Bits), 8);
        assert_eq!(calc_byte_size(10, 1, WidthType::Bits), 16);
        assert_eq!(calc_byte_size(64, 1, WidthType::Bits), 16);
        assert_eq!(calc_byte_size(3, 64, WidthType::Bits), 32);
        assert_eq!(calc_byte_size(3, 4, WidthType::Multiply), 24);
        assert_eq!(calc_byte_size(9, 1, WidthType::Ignore), 24);
    }

    #[test]
    fn test_raw_accessors() {
        let mut buf = [0u8; 8];
        unsafe {
            set_header_size(buf.as_mut_ptr(), 1000);
            set_header_capacity(buf.as_mut_ptr(), 4096);
            set_header_width(buf.as_mut_ptr(), 32);
            set_header_context_flag(buf.as_mut_ptr(), true);
            assert_eq!(size_from_header(buf.as_ptr()), 1000);
            assert_eq!(capacity_from_header(buf.as_ptr()), 4096);
            let h = read_header(buf.as_ptr());
            assert_eq!(h.width, 32);
            assert!(h.context_flag);
            assert!(!is_inner_bptree_node_from_header(buf.as_ptr()));
            assert!(!has_refs_from_header(buf.as_ptr()));
        }
    }
}
