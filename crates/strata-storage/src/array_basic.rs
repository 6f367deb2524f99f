//! Fixed-width floating point leaves.

use std::marker::PhantomData;
use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{Ref, Result, NOT_FOUND};

use crate::array::{Array, ArrayParent, ArrayType, WidthType};
use crate::bptree::LeafArray;

/// Element type of an [`ArrayBasic`].
pub trait BasicType: Copy + PartialOrd + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Encoded size in bytes.
    const WIDTH: usize;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    fn to_f64(self) -> f64;
}

impl BasicType for f32 {
    const WIDTH: usize = 4;

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        let mut b = [0u8; 4];
        b.copy_from_slice(&bytes[..4]);
        f32::from_le_bytes(b)
    }

    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }
}

impl BasicType for f64 {
    const WIDTH: usize = 8;

    #[inline]
    fn read(bytes: &[u8]) -> Self {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(b)
    }

    #[inline]
    fn write(self, bytes: &mut [u8]) {
        bytes[..8].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }
}

/// A leaf of `f32` or `f64` values stored with the multiply width type.
#[derive(Debug, Clone)]
pub struct ArrayBasic<T: BasicType> {
    inner: Array,
    _marker: PhantomData<T>,
}

impl<T: BasicType> ArrayBasic<T> {
    /// Creates an empty leaf.
    pub fn create_new(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        let mut inner = Array::new(Arc::clone(alloc));
        inner.create_typed(ArrayType::Normal, WidthType::Multiply, T::WIDTH)?;
        Ok(Self {
            inner,
            _marker: PhantomData,
        })
    }

    /// Attaches to an existing leaf.
    pub fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        let inner = Array::from_mem(alloc, mem);
        debug_assert_eq!(inner.width_type(), WidthType::Multiply);
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Attaches to the leaf at `ref_`.
    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref) -> Self {
        Self::from_mem(alloc, MemRef::from_ref(alloc.as_ref(), ref_))
    }

    pub fn get_ref(&self) -> Ref {
        self.inner.get_ref()
    }

    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Underlying node accessor.
    pub fn as_array(&self) -> &Array {
        &self.inner
    }

    fn slot(&self, ndx: usize) -> &[u8] {
        &self.inner.data_bytes()[ndx * T::WIDTH..(ndx + 1) * T::WIDTH]
    }

    fn slot_mut(&mut self, ndx: usize) -> &mut [u8] {
        // SAFETY: the caller keeps ndx below the node's element count, and
        // the node is mutable.
        unsafe { std::slice::from_raw_parts_mut(self.inner.data_ptr().add(ndx * T::WIDTH), T::WIDTH) }
    }

    pub fn get(&self, ndx: usize) -> T {
        debug_assert!(ndx < self.size());
        T::read(self.slot(ndx))
    }

    pub fn set(&mut self, ndx: usize, value: T) -> Result<()> {
        debug_assert!(ndx < self.size());
        self.inner.copy_on_write()?;
        value.write(self.slot_mut(ndx));
        Ok(())
    }

    pub fn insert(&mut self, ndx: usize, value: T) -> Result<()> {
        let size = self.size();
        debug_assert!(ndx <= size);
        self.inner.copy_on_write()?;
        self.inner.alloc(size + 1, T::WIDTH)?;
        let data = self.inner.data_ptr();
        // SAFETY: the node now holds size + 1 elements.
        unsafe {
            std::ptr::copy(
                data.add(ndx * T::WIDTH),
                data.add((ndx + 1) * T::WIDTH),
                (size - ndx) * T::WIDTH,
            );
        }
        self.inner.set_cached_size(size + 1);
        value.write(self.slot_mut(ndx));
        Ok(())
    }

    pub fn add(&mut self, value: T) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        let size = self.size();
        debug_assert!(ndx < size);
        self.inner.copy_on_write()?;
        let data = self.inner.data_ptr();
        // SAFETY: both ranges lie inside the old element area.
        unsafe {
            std::ptr::copy(
                data.add((ndx + 1) * T::WIDTH),
                data.add(ndx * T::WIDTH),
                (size - ndx - 1) * T::WIDTH,
            );
        }
        self.inner.alloc(size - 1, T::WIDTH)?;
        self.inner.set_cached_size(size - 1);
        Ok(())
    }

    pub fn truncate(&mut self, size: usize) -> Result<()> {
        self.inner.truncate(size)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// First index in `[start, end)` holding `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: T, start: usize, end: usize) -> usize {
        let end = end.min(self.size());
        (start..end).find(|&i| self.get(i) == value).unwrap_or(NOT_FOUND)
    }

    /// Sum of `[start, end)`, accumulated in `f64`.
    pub fn sum(&self, start: usize, end: usize) -> f64 {
        let end = end.min(self.size());
        (start..end).map(|i| self.get(i).to_f64()).sum()
    }

    /// Smallest value in `[start, end)` and its first index.
    pub fn minimum(&self, start: usize, end: usize) -> Option<(T, usize)> {
        self.extreme(start, end, |v, best| v < best)
    }

    /// Largest value in `[start, end)` and its first index.
    pub fn maximum(&self, start: usize, end: usize) -> Option<(T, usize)> {
        self.extreme(start, end, |v, best| v > best)
    }

    fn extreme(&self, start: usize, end: usize, better: impl Fn(T, T) -> bool) -> Option<(T, usize)> {
        let end = end.min(self.size());
        if start >= end {
            return None;
        }
        let mut best = (self.get(start), start);
        for i in start + 1..end {
            let v = self.get(i);
            if better(v, best.0) {
                best = (v, i);
            }
        }
        Some(best)
    }

    pub fn set_ndx_in_parent(&mut self, ndx: usize) {
        self.inner.set_ndx_in_parent(ndx);
    }

    pub fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        self.inner.update_parent(parent)
    }

    pub fn destroy(&mut self) {
        self.inner.destroy();
    }
}

impl<T: BasicType> LeafArray for ArrayBasic<T> {
    type Value = T;

    fn create_leaf(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        Self::create_new(alloc)
    }

    fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        ArrayBasic::from_mem(alloc, mem)
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> T {
        self.get(ndx)
    }

    fn leaf_set(&mut self, ndx: usize, value: T) -> Result<()> {
        self.set(ndx, value)
    }

    fn leaf_insert(&mut self, ndx: usize, value: T) -> Result<()> {
        self.insert(ndx, value)
    }

    fn leaf_erase(&mut self, ndx: usize) -> Result<()> {
        self.erase(ndx)
    }

    fn leaf_truncate(&mut self, size: usize) -> Result<()> {
        self.truncate(size)
    }

    fn leaf_destroy(&mut self) {
        self.destroy();
    }

    fn set_ndx_in_parent(&mut self, ndx: usize) {
        ArrayBasic::set_ndx_in_parent(self, ndx);
    }

    fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        ArrayBasic::update_parent(self, parent)
    }
}
