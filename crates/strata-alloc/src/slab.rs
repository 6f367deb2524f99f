//! Slab allocator with an optional read-only base image.
//!
//! Ref space layout:
//! ```text
//! 0                baseline          slab[0].ref_end    slab[1].ref_end
//! +----------------+-----------------+------------------+
//! | read-only base | slab 0          | slab 1 (>= 2x)   |
//! +----------------+-----------------+------------------+
//! ```
//!
//! Slabs never move once created, so translated addresses stay valid until
//! the block is freed. Freed base chunks are tracked separately from mutable
//! free space because they can never be reused for writes.

use crate::alloc::{Allocator, MemRef};
use crate::file_format::validate_image;
use crate::free_space::FreeSpace;
use parking_lot::RwLock;
use std::path::Path;
use strata_common::{Ref, Result, StorageConfig, StrataError};
use tracing::debug;

/// First ref handed out by an allocator without a base image.
/// Ref 0 is reserved as the null ref.
const EMPTY_BASELINE: Ref = 8;

/// 8-aligned heap region owned by the allocator.
struct Region {
    ptr: *mut u64,
    words: usize,
}

impl Region {
    fn zeroed(bytes: usize) -> Self {
        let words = bytes.div_ceil(8).max(1);
        let boxed: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        Self {
            ptr: Box::into_raw(boxed) as *mut u64,
            words,
        }
    }

    fn bytes(&self) -> usize {
        self.words * 8
    }

    fn as_ptr(&self) -> *mut u8 {
        self.ptr as *mut u8
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr and words come from Box::into_raw in Region::zeroed.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr, self.words,
            )));
        }
    }
}

struct Slab {
    ref_end: Ref,
    region: Region,
}

#[derive(Default)]
struct SlabState {
    slabs: Vec<Slab>,
    free_space: FreeSpace,
    free_read_only: FreeSpace,
    slab_bytes: usize,
}

impl SlabState {
    fn is_slab_boundary(slabs: &[Slab], ref_: Ref) -> bool {
        slabs.binary_search_by(|s| s.ref_end.cmp(&ref_)).is_ok()
    }
}

/// Slab allocator.
pub struct SlabAlloc {
    config: StorageConfig,
    base: Option<Region>,
    baseline: Ref,
    state: RwLock<SlabState>,
}

// SAFETY: raw region pointers are owned by the allocator and only handed out
// as addresses; all bookkeeping is behind the RwLock.
unsafe impl Send for SlabAlloc {}
unsafe impl Sync for SlabAlloc {}

impl SlabAlloc {
    /// Creates an allocator with no base image.
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            base: None,
            baseline: EMPTY_BASELINE,
            state: RwLock::new(SlabState::default()),
        }
    }

    /// Attaches a complete file image as the read-only base.
    ///
    /// Returns the allocator and the image's top ref.
    pub fn from_buffer(buf: &[u8], config: StorageConfig) -> Result<(Self, Ref)> {
        let top_ref = validate_image(buf)?;
        let region = Region::zeroed(buf.len());
        // SAFETY: region holds at least buf.len() bytes and does not alias buf.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), region.as_ptr(), buf.len());
        }
        debug!(size = buf.len(), top_ref, "attached read-only image");
        let alloc = Self {
            config,
            base: Some(region),
            baseline: buf.len(),
            state: RwLock::new(SlabState::default()),
        };
        Ok((alloc, top_ref))
    }

    /// Reads and attaches a file written by the file container.
    pub fn open(path: impl AsRef<Path>, config: StorageConfig) -> Result<(Self, Ref)> {
        let buf = std::fs::read(path.as_ref())?;
        Self::from_buffer(&buf, config)
    }

    /// Returns true if a read-only base image is attached.
    pub fn is_attached(&self) -> bool {
        self.base.is_some()
    }

    /// Number of mutable slabs.
    pub fn slab_count(&self) -> usize {
        self.state.read().slabs.len()
    }

    /// Total bytes held by mutable slabs.
    pub fn slab_bytes(&self) -> usize {
        self.state.read().slab_bytes
    }

    /// Free bytes available for reuse.
    pub fn free_bytes(&self) -> usize {
        self.state.read().free_space.total()
    }

    /// Bytes of the base image released by copy-on-write.
    pub fn free_read_only_bytes(&self) -> usize {
        self.state.read().free_read_only.total()
    }

    /// Returns true if every mutable byte is free again.
    pub fn is_all_free(&self) -> bool {
        let state = self.state.read();
        state.free_space.total() == state.slab_bytes
    }

    fn translate_locked(&self, slabs: &[Slab], ref_: Ref) -> *mut u8 {
        if ref_ < self.baseline {
            return match &self.base {
                // SAFETY: ref_ < baseline == base length.
                Some(base) => unsafe { base.as_ptr().add(ref_) },
                None => {
                    debug_assert!(false, "ref {ref_} below baseline without base image");
                    std::ptr::null_mut()
                }
            };
        }
        let idx = slabs.partition_point(|s| s.ref_end <= ref_);
        let Some(slab) = slabs.get(idx) else {
            debug_assert!(false, "ref {ref_} beyond last slab");
            return std::ptr::null_mut();
        };
        let start = if idx == 0 {
            self.baseline
        } else {
            slabs[idx - 1].ref_end
        };
        // SAFETY: start <= ref_ < ref_end and the slab spans ref_end - start bytes.
        unsafe { slab.region.as_ptr().add(ref_ - start) }
    }
}

impl Allocator for SlabAlloc {
    fn alloc(&self, size: usize) -> Result<MemRef> {
        debug_assert!(size > 0 && size % 8 == 0, "bad allocation size {size}");
        let mut guard = self.state.write();
        let state = &mut *guard;

        if let Some(ref_) = state.free_space.take(size) {
            let addr = self.translate_locked(&state.slabs, ref_);
            return Ok(MemRef::new(addr, ref_));
        }

        let last = state.slabs.last().map(|s| s.region.bytes()).unwrap_or(0);
        let mut slab_size = size.max(self.config.min_slab_size).max(last * 2);
        if let Some(limit) = self.config.memory_limit {
            if state.slab_bytes + slab_size > limit {
                if state.slab_bytes + size > limit {
                    return Err(StrataError::OutOfMemory { requested: size });
                }
                slab_size = size;
            }
        }

        let ref_start = state.slabs.last().map(|s| s.ref_end).unwrap_or(self.baseline);
        let region = Region::zeroed(slab_size);
        let slab_size = region.bytes();
        let addr = region.as_ptr();
        state.slabs.push(Slab {
            ref_end: ref_start + slab_size,
            region,
        });
        state.slab_bytes += slab_size;
        debug!(slab_size, ref_start, slabs = state.slabs.len(), "allocated slab");

        let SlabState {
            slabs, free_space, ..
        } = state;
        free_space.release(ref_start + size, slab_size - size, |r| {
            SlabState::is_slab_boundary(slabs, r)
        });
        Ok(MemRef::new(addr, ref_start))
    }

    fn realloc(
        &self,
        ref_: Ref,
        addr: *const u8,
        old_size: usize,
        new_size: usize,
    ) -> Result<MemRef> {
        let mem = self.alloc(new_size)?;
        // SAFETY: both blocks are live and distinct; at most min(old, new) bytes are copied.
        unsafe {
            std::ptr::copy_nonoverlapping(addr, mem.addr, old_size.min(new_size));
        }
        self.free(ref_, addr, old_size);
        Ok(mem)
    }

    fn free(&self, ref_: Ref, _addr: *const u8, size: usize) {
        let mut guard = self.state.write();
        let state = &mut *guard;
        if ref_ < self.baseline {
            state.free_read_only.release(ref_, size, |_| false);
            return;
        }
        let SlabState {
            slabs, free_space, ..
        } = state;
        free_space.release(ref_, size, |r| SlabState::is_slab_boundary(slabs, r));
    }

    fn translate(&self, ref_: Ref) -> *mut u8 {
        if ref_ < self.baseline {
            return self.translate_locked(&[], ref_);
        }
        let state = self.state.read();
        self.translate_locked(&state.slabs, ref_)
    }

    fn baseline(&self) -> Ref {
        self.baseline
    }
}

impl Default for SlabAlloc {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}
