//! Packed integer array.
//!
//! An `Array` is an accessor over a node owned by an allocator. The node holds
//! an 8-byte header followed by elements packed at 0, 1, 2, 4, 8, 16, 32 or 64
//! bits. The width is the smallest one that fits every stored value; writing
//! a value outside the current bounds widens the node in place.
//!
//! Accessors do not own memory and do not point back at their parent.
//! Whenever a mutation moves the node (growth or copy-on-write) its ref
//! changes, and the caller patches the parent's slot through
//! [`ArrayParent`] using [`Array::update_parent`].

mod aggregate;
pub(crate) mod find;
pub mod header;
mod simd;
pub(crate) mod width;

use std::sync::Arc;
use strata_alloc::{Allocator, MemRef};
use strata_common::{is_ref_value, to_ref, Ref, Result, StrataError, NOT_FOUND};

pub use find::{
    Condition, ConditionKind, Equal, FindState, Greater, GreaterEqual, IntegerCondition, Less,
    LessEqual, NoCondition, NotEqual,
};
pub use header::{NodeHeader, WidthType, HEADER_SIZE};
pub use width::{bit_width, lbound_for_width, ubound_for_width};

use header::{
    calc_byte_size, read_header, set_header_capacity, set_header_context_flag, set_header_size,
    set_header_width, write_header, INITIAL_CAPACITY, MAX_ALIGNED_CAPACITY,
};
use width::{getter_for, setter_for, Getter, Setter};

/// Kind of node created by [`Array::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    /// Plain integers.
    Normal,
    /// Elements may be refs to child nodes.
    HasRefs,
    /// Inner node of a B+-tree (implies refs).
    InnerBptreeNode,
}

/// A node that stores the refs of its children.
pub trait ArrayParent {
    /// Stores `new_ref` in child slot `child_ndx`.
    fn update_child_ref(&mut self, child_ndx: usize, new_ref: Ref) -> Result<()>;

    /// Returns the ref stored in child slot `child_ndx`.
    fn get_child_ref(&self, child_ndx: usize) -> Ref;
}

/// Accessor over a packed integer node.
#[derive(Clone)]
pub struct Array {
    alloc: Arc<dyn Allocator>,
    ref_: Ref,
    /// First element byte; null when detached.
    data: *mut u8,
    size: usize,
    /// Allocated bytes, header included.
    capacity: usize,
    width: usize,
    wtype: WidthType,
    is_inner_bptree_node: bool,
    has_refs: bool,
    context_flag: bool,
    lbound: i64,
    ubound: i64,
    getter: Getter,
    setter: Setter,
    ndx_in_parent: usize,
}

// SAFETY: an accessor only reads through `&self`; every write goes through
// `&mut self`, so sharing follows the usual borrow rules.
unsafe impl Send for Array {}
unsafe impl Sync for Array {}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Array")
            .field("ref", &self.ref_)
            .field("size", &self.size)
            .field("width", &self.width)
            .field("has_refs", &self.has_refs)
            .field("inner", &self.is_inner_bptree_node)
            .finish()
    }
}

impl Array {
    /// Creates a detached accessor.
    pub fn new(alloc: Arc<dyn Allocator>) -> Self {
        Self {
            alloc,
            ref_: 0,
            data: std::ptr::null_mut(),
            size: 0,
            capacity: 0,
            width: 0,
            wtype: WidthType::Bits,
            is_inner_bptree_node: false,
            has_refs: false,
            context_flag: false,
            lbound: 0,
            ubound: 0,
            getter: getter_for(0),
            setter: setter_for(0),
            ndx_in_parent: 0,
        }
    }

    /// Creates a new empty node and returns an accessor attached to it.
    pub fn create_new(alloc: &Arc<dyn Allocator>, ty: ArrayType) -> Result<Self> {
        let mut array = Self::new(Arc::clone(alloc));
        array.create(ty)?;
        Ok(array)
    }

    /// Attaches an accessor to an existing node.
    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref) -> Self {
        let mut array = Self::new(Arc::clone(alloc));
        array.init_from_ref(ref_);
        array
    }

    /// Attaches an accessor to an existing, already translated node.
    pub fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        let mut array = Self::new(Arc::clone(alloc));
        array.init_from_mem(mem);
        array
    }

    /// Allocates a new empty node of the given type and attaches to it.
    pub fn create(&mut self, ty: ArrayType) -> Result<()> {
        self.create_typed(ty, WidthType::Bits, 0)
    }

    /// Allocates a new node with an explicit width type and width.
    pub(crate) fn create_typed(&mut self, ty: ArrayType, wtype: WidthType, width: usize) -> Result<()> {
        let mem = self.alloc.alloc(INITIAL_CAPACITY)?;
        let header = NodeHeader {
            is_inner_bptree_node: ty == ArrayType::InnerBptreeNode,
            has_refs: ty != ArrayType::Normal,
            context_flag: false,
            wtype,
            width,
            size: 0,
            capacity: INITIAL_CAPACITY,
        };
        // SAFETY: the block is INITIAL_CAPACITY bytes long.
        unsafe { write_header(mem.addr, &header) };
        self.init_from_mem(mem);
        Ok(())
    }

    /// Attaches to the node at `ref_`.
    pub fn init_from_ref(&mut self, ref_: Ref) {
        let mem = MemRef::from_ref(self.alloc.as_ref(), ref_);
        self.init_from_mem(mem);
    }

    /// Attaches to the node at `mem`.
    pub fn init_from_mem(&mut self, mem: MemRef) {
        debug_assert!(!mem.addr.is_null(), "attach to null node {}", mem.ref_);
        // SAFETY: mem points at a node header produced by this allocator.
        let header = unsafe { read_header(mem.addr) };
        self.ref_ = mem.ref_;
        // SAFETY: the data area directly follows the header.
        self.data = unsafe { mem.addr.add(HEADER_SIZE) };
        self.size = header.size;
        self.capacity = header.capacity;
        self.wtype = header.wtype;
        self.is_inner_bptree_node = header.is_inner_bptree_node;
        self.has_refs = header.has_refs;
        self.context_flag = header.context_flag;
        self.set_width(header.width);
    }

    /// Detaches from the node without freeing it.
    pub fn detach(&mut self) {
        self.data = std::ptr::null_mut();
        self.ref_ = 0;
    }

    /// Returns true if attached to a node.
    #[inline]
    pub fn is_attached(&self) -> bool {
        !self.data.is_null()
    }

    // ===== Accessors =====

    /// Returns the allocator.
    pub fn get_alloc(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    /// Returns the node's ref.
    #[inline]
    pub fn get_ref(&self) -> Ref {
        self.ref_
    }

    /// Returns the node's ref and header address.
    pub fn get_mem(&self) -> MemRef {
        MemRef::new(self.header_ptr(), self.ref_)
    }

    /// Number of elements.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns true if the node has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Element width in bits (or bytes for non-bit width types).
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Width interpretation.
    pub fn width_type(&self) -> WidthType {
        self.wtype
    }

    /// Returns true if elements may be child refs.
    #[inline]
    pub fn has_refs(&self) -> bool {
        self.has_refs
    }

    /// Returns true if this is an inner B+-tree node.
    #[inline]
    pub fn is_inner_bptree_node(&self) -> bool {
        self.is_inner_bptree_node
    }

    /// Returns the context flag.
    pub fn context_flag(&self) -> bool {
        self.context_flag
    }

    /// Smallest value representable at the current width.
    #[inline]
    pub fn lbound(&self) -> i64 {
        self.lbound
    }

    /// Largest value representable at the current width.
    #[inline]
    pub fn ubound(&self) -> i64 {
        self.ubound
    }

    /// Allocated bytes, header included.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes in use, header included, rounded up to 8.
    pub fn byte_size(&self) -> usize {
        calc_byte_size(self.size, self.width, self.wtype)
    }

    /// Slot of this node in its parent.
    #[inline]
    pub fn ndx_in_parent(&self) -> usize {
        self.ndx_in_parent
    }

    /// Sets the slot of this node in its parent.
    #[inline]
    pub fn set_ndx_in_parent(&mut self, ndx: usize) {
        self.ndx_in_parent = ndx;
    }

    /// Returns true if the node lives in a read-only image.
    pub fn is_read_only(&self) -> bool {
        self.alloc.is_read_only(self.ref_)
    }

    #[inline]
    pub(crate) fn header_ptr(&self) -> *mut u8 {
        // SAFETY: data always sits HEADER_SIZE bytes past the header.
        unsafe { self.data.sub(HEADER_SIZE) }
    }

    #[inline]
    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Used data bytes as a slice.
    pub(crate) fn data_bytes(&self) -> &[u8] {
        let len = self.byte_size() - HEADER_SIZE;
        // SAFETY: the node holds at least byte_size bytes.
        unsafe { std::slice::from_raw_parts(self.data, len) }
    }

    // ===== Element access =====

    /// Returns element `ndx`.
    #[inline]
    pub fn get(&self, ndx: usize) -> i64 {
        debug_assert!(ndx < self.size, "index {ndx} out of bounds ({})", self.size);
        debug_assert_eq!(self.wtype, WidthType::Bits);
        // SAFETY: ndx < size and the node covers size elements at this width.
        unsafe { (self.getter)(self.data, ndx) }
    }

    /// Returns element `ndx` as a ref.
    #[inline]
    pub fn get_as_ref(&self, ndx: usize) -> Ref {
        to_ref(self.get(ndx))
    }

    /// First element.
    pub fn front(&self) -> i64 {
        self.get(0)
    }

    /// Last element.
    pub fn back(&self) -> i64 {
        self.get(self.size - 1)
    }

    /// Copies all elements into a vector.
    pub fn to_vec(&self) -> Vec<i64> {
        (0..self.size).map(|i| self.get(i)).collect()
    }

    /// Sets element `ndx`, widening the node if needed.
    pub fn set(&mut self, ndx: usize, value: i64) -> Result<()> {
        debug_assert!(ndx < self.size);
        self.copy_on_write()?;
        self.ensure_minimum_width(value)?;
        // SAFETY: ndx < size and the width now fits value.
        unsafe { (self.setter)(self.data, ndx, value) };
        Ok(())
    }

    /// Inserts `value` before element `ndx`.
    pub fn insert(&mut self, ndx: usize, value: i64) -> Result<()> {
        debug_assert!(ndx <= self.size);
        self.copy_on_write()?;
        let old_getter = self.getter;
        let expand = value < self.lbound || value > self.ubound;
        let new_width = if expand { bit_width(value) } else { self.width };
        self.alloc(self.size + 1, new_width)?;
        if expand {
            self.set_width(new_width);
        }

        // SAFETY: the node now holds size + 1 elements at the new width; moves
        // run back to front so re-encoded values never overwrite unread ones.
        unsafe {
            if expand || self.width < 8 {
                let mut i = self.size;
                while i > ndx {
                    i -= 1;
                    let v = old_getter(self.data, i);
                    (self.setter)(self.data, i + 1, v);
                }
            } else if ndx != self.size {
                let w = self.width / 8;
                std::ptr::copy(
                    self.data.add(ndx * w),
                    self.data.add((ndx + 1) * w),
                    (self.size - ndx) * w,
                );
            }
            (self.setter)(self.data, ndx, value);
            if expand {
                let mut i = ndx;
                while i != 0 {
                    i -= 1;
                    let v = old_getter(self.data, i);
                    (self.setter)(self.data, i, v);
                }
            }
        }
        self.size += 1;
        Ok(())
    }

    /// Appends `value`.
    pub fn add(&mut self, value: i64) -> Result<()> {
        self.insert(self.size, value)
    }

    /// Removes element `ndx`.
    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        self.erase_range(ndx, ndx + 1)
    }

    /// Removes elements in `[begin, end)`.
    pub fn erase_range(&mut self, begin: usize, end: usize) -> Result<()> {
        debug_assert!(begin <= end && end <= self.size);
        if begin == end {
            return Ok(());
        }
        self.copy_on_write()?;
        let count = end - begin;
        // SAFETY: every index touched is below the old size.
        unsafe {
            if self.width < 8 {
                for i in end..self.size {
                    let v = (self.getter)(self.data, i);
                    (self.setter)(self.data, i - count, v);
                }
            } else {
                let w = self.width / 8;
                std::ptr::copy(
                    self.data.add(end * w),
                    self.data.add(begin * w),
                    (self.size - end) * w,
                );
            }
        }
        self.size -= count;
        // SAFETY: attached and mutable after copy_on_write.
        unsafe { set_header_size(self.header_ptr(), self.size) };
        Ok(())
    }

    /// Shrinks to `new_size` elements. Truncating to zero resets the width.
    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        debug_assert!(new_size <= self.size);
        self.copy_on_write()?;
        self.size = new_size;
        // SAFETY: attached and mutable after copy_on_write.
        unsafe { set_header_size(self.header_ptr(), new_size) };
        if new_size == 0 && self.wtype == WidthType::Bits {
            self.set_width(0);
            // SAFETY: as above.
            unsafe { set_header_width(self.header_ptr(), 0) };
        }
        Ok(())
    }

    /// Truncates and destroys every child subtree referenced past `new_size`.
    pub fn truncate_and_destroy_children(&mut self, new_size: usize) -> Result<()> {
        if self.has_refs {
            for i in new_size..self.size {
                let v = self.get(i);
                if is_ref_value(v) {
                    destroy_deep_ref(&self.alloc, to_ref(v));
                }
            }
        }
        self.truncate(new_size)
    }

    /// Removes every element.
    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// Sets every element to zero by dropping to width 0.
    pub fn set_all_to_zero(&mut self) -> Result<()> {
        self.copy_on_write()?;
        self.set_width(0);
        // SAFETY: attached and mutable after copy_on_write.
        unsafe { set_header_width(self.header_ptr(), 0) };
        Ok(())
    }

    /// Adds `diff` to element `ndx`.
    pub fn adjust(&mut self, ndx: usize, diff: i64) -> Result<()> {
        let v = self.get(ndx);
        self.set(ndx, v.wrapping_add(diff))
    }

    /// Adds `diff` to every element in `[begin, end)`.
    pub fn adjust_range(&mut self, begin: usize, end: usize, diff: i64) -> Result<()> {
        for i in begin..end {
            self.adjust(i, diff)?;
        }
        Ok(())
    }

    /// Adds `diff` to every element `>= limit`.
    pub fn adjust_ge(&mut self, limit: i64, diff: i64) -> Result<()> {
        for i in 0..self.size {
            if self.get(i) >= limit {
                self.adjust(i, diff)?;
            }
        }
        Ok(())
    }

    /// Sets or clears the context flag.
    pub fn set_context_flag(&mut self, value: bool) -> Result<()> {
        if self.context_flag == value {
            return Ok(());
        }
        self.copy_on_write()?;
        self.context_flag = value;
        // SAFETY: attached and mutable after copy_on_write.
        unsafe { set_header_context_flag(self.header_ptr(), value) };
        Ok(())
    }

    // ===== Width management =====

    /// Widens the node so that `value` can be stored.
    pub fn ensure_minimum_width(&mut self, value: i64) -> Result<()> {
        if value >= self.lbound && value <= self.ubound {
            return Ok(());
        }
        self.copy_on_write()?;
        let width = bit_width(value);
        debug_assert!(width > self.width);
        let old_getter = self.getter;
        self.alloc(self.size, width)?;
        self.set_width(width);
        // SAFETY: the node now covers size elements at the wider width; back
        // to front re-encoding never overwrites an element not yet read.
        unsafe {
            let mut i = self.size;
            while i != 0 {
                i -= 1;
                let v = old_getter(self.data, i);
                (self.setter)(self.data, i, v);
            }
        }
        Ok(())
    }

    /// Updates cached width, bounds and codecs (header untouched).
    fn set_width(&mut self, width: usize) {
        self.width = width;
        if self.wtype == WidthType::Bits {
            self.lbound = lbound_for_width(width);
            self.ubound = ubound_for_width(width);
            self.getter = getter_for(width);
            self.setter = setter_for(width);
        }
    }

    /// Makes room for `count` elements at `width`, growing the node if needed.
    ///
    /// Writes size and width into the header; the accessor's cached size and
    /// width are left to the caller.
    pub(crate) fn alloc(&mut self, count: usize, width: usize) -> Result<()> {
        let needed = calc_byte_size(count, width, self.wtype);
        if needed > self.capacity {
            if needed > MAX_ALIGNED_CAPACITY {
                return Err(StrataError::CapacityExceeded {
                    requested: needed,
                    max: MAX_ALIGNED_CAPACITY,
                });
            }
            let new_capacity = (self.capacity * 2).max(needed).min(MAX_ALIGNED_CAPACITY);
            let new_capacity = (new_capacity + 7) & !7;
            let mem = self.alloc.realloc(
                self.ref_,
                self.header_ptr(),
                self.byte_size(),
                new_capacity,
            )?;
            self.ref_ = mem.ref_;
            // SAFETY: the new block starts with the copied header.
            self.data = unsafe { mem.addr.add(HEADER_SIZE) };
            self.capacity = new_capacity;
            // SAFETY: as above.
            unsafe { set_header_capacity(mem.addr, new_capacity) };
        }
        // SAFETY: attached and mutable.
        unsafe {
            set_header_width(self.header_ptr(), width);
            set_header_size(self.header_ptr(), count);
        }
        Ok(())
    }

    /// Cached size update for wrappers that manage elements themselves.
    pub(crate) fn set_cached_size(&mut self, size: usize) {
        self.size = size;
    }

    /// Copies the node out of a read-only image before it is modified.
    ///
    /// The accessor's ref changes; the caller patches the parent.
    pub fn copy_on_write(&mut self) -> Result<()> {
        if !self.alloc.is_read_only(self.ref_) {
            return Ok(());
        }
        let used = self.byte_size();
        let new_capacity = (used + 64).min(MAX_ALIGNED_CAPACITY).max(used);
        let mem = self.alloc.alloc(new_capacity)?;
        let old_ref = self.ref_;
        let old_header = self.header_ptr();
        // SAFETY: the source covers `used` bytes and the new block is larger.
        unsafe {
            std::ptr::copy_nonoverlapping(old_header, mem.addr, used);
            set_header_capacity(mem.addr, new_capacity);
        }
        let old_capacity = self.capacity;
        self.ref_ = mem.ref_;
        // SAFETY: data follows the copied header.
        self.data = unsafe { mem.addr.add(HEADER_SIZE) };
        self.capacity = new_capacity;
        self.alloc.free(old_ref, old_header, old_capacity.max(used));
        Ok(())
    }

    // ===== Parent patching =====

    /// Stores this node's ref in its parent if it changed.
    pub fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        if parent.get_child_ref(self.ndx_in_parent) != self.ref_ {
            parent.update_child_ref(self.ndx_in_parent, self.ref_)?;
        }
        Ok(())
    }

    // ===== Lifecycle =====

    /// Frees this node (children are left alone) and detaches.
    pub fn destroy(&mut self) {
        if !self.is_attached() {
            return;
        }
        self.alloc
            .free(self.ref_, self.header_ptr(), self.capacity.max(self.byte_size()));
        self.detach();
    }

    /// Frees this node and every subtree it references, then detaches.
    pub fn destroy_deep(&mut self) {
        if !self.is_attached() {
            return;
        }
        if self.has_refs {
            for i in 0..self.size {
                let v = self.get(i);
                if is_ref_value(v) {
                    destroy_deep_ref(&self.alloc, to_ref(v));
                }
            }
        }
        self.destroy();
    }

    /// Copies this node and every subtree it references into `target`.
    pub fn clone_deep(&self, target: &Arc<dyn Allocator>) -> Result<MemRef> {
        if !self.has_refs {
            let used = self.byte_size();
            let mem = target.alloc(used)?;
            // SAFETY: both blocks cover `used` bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(self.header_ptr(), mem.addr, used);
                set_header_capacity(mem.addr, used);
            }
            return Ok(mem);
        }

        let ty = if self.is_inner_bptree_node {
            ArrayType::InnerBptreeNode
        } else {
            ArrayType::HasRefs
        };
        let mut copy = Array::create_new(target, ty)?;
        if self.context_flag {
            copy.set_context_flag(true)?;
        }
        for i in 0..self.size {
            let v = self.get(i);
            if is_ref_value(v) {
                let child = Array::from_ref(&self.alloc, to_ref(v));
                let child_mem = child.clone_deep(target)?;
                copy.add(child_mem.ref_ as i64)?;
            } else {
                copy.add(v)?;
            }
        }
        Ok(copy.get_mem())
    }

    // ===== Sorted search =====

    /// First index whose element is `>= value` (elements must be sorted).
    pub fn lower_bound_int(&self, value: i64) -> usize {
        let (mut lo, mut hi) = (0, self.size);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// First index whose element is `> value` (elements must be sorted).
    pub fn upper_bound_int(&self, value: i64) -> usize {
        let (mut lo, mut hi) = (0, self.size);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) <= value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// First index at or after `start` whose element is `>= target`, or
    /// `NOT_FOUND`. Elements must be sorted.
    pub fn find_gte(&self, target: i64, start: usize) -> usize {
        if start >= self.size {
            return NOT_FOUND;
        }
        // Gallop, then bisect.
        let mut step = 1;
        let mut lo = start;
        let mut hi = start;
        while hi < self.size && self.get(hi) < target {
            lo = hi + 1;
            hi = start + step;
            step *= 2;
        }
        let hi = hi.min(self.size);
        let (mut lo, mut hi) = (lo, hi);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < self.size {
            lo
        } else {
            NOT_FOUND
        }
    }
}

impl ArrayParent for Array {
    fn update_child_ref(&mut self, child_ndx: usize, new_ref: Ref) -> Result<()> {
        self.set(child_ndx, new_ref as i64)
    }

    fn get_child_ref(&self, child_ndx: usize) -> Ref {
        self.get_as_ref(child_ndx)
    }
}

/// Frees the subtree rooted at `ref_`.
pub fn destroy_deep_ref(alloc: &Arc<dyn Allocator>, ref_: Ref) {
    let mut array = Array::from_ref(alloc, ref_);
    array.destroy_deep();
}
