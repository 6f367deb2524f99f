//! Variable length byte string leaves.
//!
//! ```text
//! top (has_refs): [ offsets ref | blob ref ]
//! offsets:        cumulative end position of each value in the blob
//! blob:           concatenated value bytes
//! ```

use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{to_ref, Ref, Result, NOT_FOUND};

use crate::array::{Array, ArrayParent, ArrayType};
use crate::array_blob::ArrayBlob;
use crate::bptree::LeafArray;

/// A leaf of byte strings.
#[derive(Debug, Clone)]
pub struct ArrayBinary {
    top: Array,
    offsets: Array,
    blob: ArrayBlob,
}

impl ArrayBinary {
    pub fn create_new(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        let mut top = Array::create_new(alloc, ArrayType::HasRefs)?;
        let mut offsets = Array::create_new(alloc, ArrayType::Normal)?;
        let mut blob = ArrayBlob::create_new(alloc)?;
        top.add(offsets.get_ref() as i64)?;
        top.add(blob.get_ref() as i64)?;
        offsets.set_ndx_in_parent(0);
        blob.set_ndx_in_parent(1);
        Ok(Self { top, offsets, blob })
    }

    pub fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        let top = Array::from_mem(alloc, mem);
        debug_assert!(top.has_refs() && top.size() == 2);
        let mut offsets = Array::from_ref(alloc, to_ref(top.get(0)));
        let mut blob = ArrayBlob::from_ref(alloc, to_ref(top.get(1)));
        offsets.set_ndx_in_parent(0);
        blob.set_ndx_in_parent(1);
        Self { top, offsets, blob }
    }

    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref) -> Self {
        Self::from_mem(alloc, MemRef::from_ref(alloc.as_ref(), ref_))
    }

    pub fn get_ref(&self) -> Ref {
        self.top.get_ref()
    }

    pub fn size(&self) -> usize {
        self.offsets.size()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    fn begin_of(&self, ndx: usize) -> usize {
        if ndx == 0 {
            0
        } else {
            self.offsets.get(ndx - 1) as usize
        }
    }

    /// Value `ndx` as a slice.
    pub fn get(&self, ndx: usize) -> &[u8] {
        let begin = self.begin_of(ndx);
        let end = self.offsets.get(ndx) as usize;
        self.blob.get_slice(begin, end)
    }

    /// Stores the refs of moved children in the top node.
    fn patch_top(&mut self) -> Result<()> {
        self.offsets.update_parent(&mut self.top)?;
        self.blob.update_parent(&mut self.top)
    }

    pub fn add(&mut self, value: &[u8]) -> Result<()> {
        self.insert(self.size(), value)
    }

    pub fn insert(&mut self, ndx: usize, value: &[u8]) -> Result<()> {
        debug_assert!(ndx <= self.size());
        let pos = self.begin_of(ndx);
        self.blob.insert(pos, value)?;
        self.offsets.insert(ndx, (pos + value.len()) as i64)?;
        let n = self.offsets.size();
        self.offsets.adjust_range(ndx + 1, n, value.len() as i64)?;
        self.patch_top()
    }

    pub fn set(&mut self, ndx: usize, value: &[u8]) -> Result<()> {
        let begin = self.begin_of(ndx);
        let end = self.offsets.get(ndx) as usize;
        self.blob.replace(begin, end, value)?;
        let diff = value.len() as i64 - (end - begin) as i64;
        if diff != 0 {
            let n = self.offsets.size();
            self.offsets.adjust_range(ndx, n, diff)?;
        }
        self.patch_top()
    }

    pub fn erase(&mut self, ndx: usize) -> Result<()> {
        let begin = self.begin_of(ndx);
        let end = self.offsets.get(ndx) as usize;
        self.blob.erase(begin, end)?;
        self.offsets.erase(ndx)?;
        let n = self.offsets.size();
        self.offsets.adjust_range(ndx, n, -((end - begin) as i64))?;
        self.patch_top()
    }

    pub fn truncate(&mut self, size: usize) -> Result<()> {
        let blob_size = self.begin_of(size);
        self.offsets.truncate(size)?;
        self.blob.truncate(blob_size)?;
        self.patch_top()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    /// First index in `[start, end)` equal to `value`, or `NOT_FOUND`.
    pub fn find_first(&self, value: &[u8], start: usize, end: usize) -> usize {
        let end = end.min(self.size());
        (start..end).find(|&i| self.get(i) == value).unwrap_or(NOT_FOUND)
    }

    pub fn set_ndx_in_parent(&mut self, ndx: usize) {
        self.top.set_ndx_in_parent(ndx);
    }

    pub fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        self.top.update_parent(parent)
    }

    pub fn destroy(&mut self) {
        self.top.destroy_deep();
    }
}

impl LeafArray for ArrayBinary {
    type Value = Vec<u8>;

    fn create_leaf(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        Self::create_new(alloc)
    }

    fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        ArrayBinary::from_mem(alloc, mem)
    }

    fn leaf_ref(&self) -> Ref {
        self.get_ref()
    }

    fn leaf_size(&self) -> usize {
        self.size()
    }

    fn leaf_get(&self, ndx: usize) -> Vec<u8> {
        self.get(ndx).to_vec()
    }

    fn leaf_set(&mut self, ndx: usize, value: Vec<u8>) -> Result<()> {
        self.set(ndx, &value)
    }

    fn leaf_insert(&mut self, ndx: usize, value: Vec<u8>) -> Result<()> {
        self.insert(ndx, &value)
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
        ArrayBinary::set_ndx_in_parent(self, ndx);
    }

    fn update_parent(&self, parent: &mut dyn ArrayParent) -> Result<()> {
        ArrayBinary::update_parent(self, parent)
    }
}
