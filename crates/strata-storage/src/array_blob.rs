//! Raw byte leaves.

use std::sync::Arc;

use strata_alloc::{Allocator, MemRef};
use strata_common::{Ref, Result};

use crate::array::{Array, ArrayParent, ArrayType, WidthType};

/// A node of raw bytes (ignore width type).
#[derive(Debug, Clone)]
pub struct ArrayBlob {
    inner: Array,
}

impl ArrayBlob {
    pub fn create_new(alloc: &Arc<dyn Allocator>) -> Result<Self> {
        let mut inner = Array::new(Arc::clone(alloc));
        inner.create_typed(ArrayType::Normal, WidthType::Ignore, 1)?;
        Ok(Self { inner })
    }

    pub fn from_mem(alloc: &Arc<dyn Allocator>, mem: MemRef) -> Self {
        let inner = Array::from_mem(alloc, mem);
        debug_assert_eq!(inner.width_type(), WidthType::Ignore);
        Self { inner }
    }

    pub fn from_ref(alloc: &Arc<dyn Allocator>, ref_: Ref) -> Self {
        Self::from_mem(alloc, MemRef::from_ref(alloc.as_ref(), ref_))
    }

    pub fn get_ref(&self) -> Ref {
        self.inner.get_ref()
    }

    /// Number of bytes.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn get(&self, ndx: usize) -> u8 {
        self.inner.data_bytes()[ndx]
    }

    /// Bytes `[begin, end)`.
    pub fn get_slice(&self, begin: usize, end: usize) -> &[u8] {
        &self.inner.data_bytes()[begin..end]
    }

    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        let size = self.size();
        self.replace(size, size, data)
    }

    pub fn insert(&mut self, pos: usize, data: &[u8]) -> Result<()> {
        self.replace(pos, pos, data)
    }

    /// Replaces bytes `[begin, end)` with `data`.
    pub fn replace(&mut self, begin: usize, end: usize, data: &[u8]) -> Result<()> {
        let size = self.size();
        debug_assert!(begin <= end && end <= size);
        self.inner.copy_on_write()?;
        let new_size = size - (end - begin) + data.len();
        if new_size > size {
            self.inner.alloc(new_size, 1)?;
        }
        let base = self.inner.data_ptr();
        // SAFETY: the node covers max(size, new_size) bytes; the tail moves
        // with an overlapping copy.
        unsafe {
            std::ptr::copy(base.add(end), base.add(begin + data.len()), size - end);
            std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(begin), data.len());
        }
        self.inner.alloc(new_size, 1)?;
        self.inner.set_cached_size(new_size);
        Ok(())
    }

    /// Removes bytes `[begin, end)`.
    pub fn erase(&mut self, begin: usize, end: usize) -> Result<()> {
        self.replace(begin, end, &[])
    }

    pub fn truncate(&mut self, size: usize) -> Result<()> {
        self.inner.truncate(size)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use strata_alloc::SlabAlloc;
    use strata_common::StorageConfig;

    #[test]
    fn test_blob_edits() {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let mut blob = ArrayBlob::create_new(&alloc).unwrap();
        blob.add(b"hello world").unwrap();
        blob.replace(0, 5, b"goodbye").unwrap();
        assert_eq!(blob.get_slice(0, blob.size()), b"goodbye world");
        blob.insert(7, b",").unwrap();
        blob.erase(8, 9).unwrap();
        assert_eq!(blob.get_slice(0, blob.size()), b"goodbye,world");
        assert_eq!(blob.get(0), b'g');
        blob.truncate(7).unwrap();
        assert_eq!(blob.get_slice(0, 7), b"goodbye");
    }

    #[test]
    fn test_blob_grows() {
        let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(StorageConfig::default()));
        let mut blob = ArrayBlob::create_new(&alloc).unwrap();
        let chunk = [7u8; 100];
        for _ in 0..50 {
            blob.add(&chunk).unwrap();
        }
        assert_eq!(blob.size(), 5000);
        assert!(blob.get_slice(0, 5000).iter().all(|&b| b == 7));
    }
}
