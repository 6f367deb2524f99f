//! Allocator capability shared by every node accessor.

use strata_common::{Ref, Result};

/// A ref paired with its translated address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    /// Translated address of the first byte.
    pub addr: *mut u8,
    /// Logical handle.
    pub ref_: Ref,
}

// SAFETY: a MemRef is a plain address; all access through it is governed by
// the accessor that owns the node.
unsafe impl Send for MemRef {}
unsafe impl Sync for MemRef {}

impl MemRef {
    /// Creates a new MemRef.
    pub fn new(addr: *mut u8, ref_: Ref) -> Self {
        Self { addr, ref_ }
    }

    /// Translates `ref_` through `alloc`.
    pub fn from_ref(alloc: &dyn Allocator, ref_: Ref) -> Self {
        Self {
            addr: alloc.translate(ref_),
            ref_,
        }
    }
}

/// Source of node memory addressed by refs.
///
/// Refs below [`Allocator::baseline`] belong to an attached read-only image
/// and must be copied before they are written.
pub trait Allocator: Send + Sync {
    /// Allocates `size` bytes (a multiple of 8).
    fn alloc(&self, size: usize) -> Result<MemRef>;

    /// Moves a node to a block of `new_size` bytes, copying `old_size` bytes.
    fn realloc(&self, ref_: Ref, addr: *const u8, old_size: usize, new_size: usize)
        -> Result<MemRef>;

    /// Releases a block.
    fn free(&self, ref_: Ref, addr: *const u8, size: usize);

    /// Returns the address a ref points to.
    fn translate(&self, ref_: Ref) -> *mut u8;

    /// Returns true if the ref belongs to the read-only image.
    fn is_read_only(&self, ref_: Ref) -> bool {
        ref_ < self.baseline()
    }

    /// First ref handed out for mutable memory.
    fn baseline(&self) -> Ref;
}
