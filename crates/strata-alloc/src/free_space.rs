//! Ordered free-chunk list with first-fit allocation.
//!
//! Chunks are kept sorted by ref. A released chunk merges with its neighbours
//! when they are contiguous, unless the shared edge is a slab boundary:
//!
//! ```text
//!   slab A                 slab B
//! +--------+------+      +------+--------+
//! |  used  | free |      | free |  used  |
//! +--------+------+      +------+--------+
//!                 ^ boundary: never merged
//! ```

use strata_common::Ref;

/// A contiguous run of free bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// First ref of the chunk.
    pub ref_: Ref,
    /// Length in bytes.
    pub size: usize,
}

impl Chunk {
    #[inline]
    fn end(&self) -> Ref {
        self.ref_ + self.size
    }
}

/// Free chunk list.
#[derive(Debug, Default)]
pub struct FreeSpace {
    chunks: Vec<Chunk>,
}

impl FreeSpace {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Returns the number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if no free space is tracked.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Total free bytes.
    pub fn total(&self) -> usize {
        self.chunks.iter().map(|c| c.size).sum()
    }

    /// Chunks in ref order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Takes `size` bytes from the first chunk large enough.
    pub fn take(&mut self, size: usize) -> Option<Ref> {
        let pos = self.chunks.iter().position(|c| c.size >= size)?;
        let chunk = &mut self.chunks[pos];
        let ref_ = chunk.ref_;
        if chunk.size == size {
            self.chunks.remove(pos);
        } else {
            chunk.ref_ += size;
            chunk.size -= size;
        }
        Some(ref_)
    }

    /// Releases a chunk, merging with neighbours that do not cross a boundary.
    pub fn release(&mut self, ref_: Ref, size: usize, is_boundary: impl Fn(Ref) -> bool) {
        if size == 0 {
            return;
        }
        let pos = self.chunks.partition_point(|c| c.ref_ < ref_);
        debug_assert!(
            pos == self.chunks.len() || self.chunks[pos].ref_ >= ref_ + size,
            "double free of ref {ref_}"
        );

        let merge_prev = pos > 0 && {
            let prev = self.chunks[pos - 1];
            prev.end() == ref_ && !is_boundary(ref_)
        };
        let merge_next = pos < self.chunks.len() && {
            let next = self.chunks[pos];
            ref_ + size == next.ref_ && !is_boundary(next.ref_)
        };

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.chunks.remove(pos);
                self.chunks[pos - 1].size += size + next.size;
            }
            (true, false) => self.chunks[pos - 1].size += size,
            (false, true) => {
                let next = &mut self.chunks[pos];
                next.ref_ = ref_;
                next.size += size;
            }
            (false, false) => self.chunks.insert(pos, Chunk { ref_, size }),
        }
    }

    /// Drops every chunk.
    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_boundary(_: Ref) -> bool {
        false
    }

    #[test]
    fn test_take_first_fit() {
        let mut fs = FreeSpace::new();
        fs.release(100, 16, no_boundary);
        fs.release(200, 64, no_boundary);
        assert_eq!(fs.take(32), Some(200));
        assert_eq!(fs.chunks(), &[Chunk { ref_: 100, size: 16 }, Chunk { ref_: 232, size: 32 }]);
        assert_eq!(fs.take(16), Some(100));
        assert_eq!(fs.len(), 1);
        assert_eq!(fs.take(64), None);
    }

    #[test]
    fn test_release_coalesces_both_sides() {
        let mut fs = FreeSpace::new();
        fs.release(0, 8, no_boundary);
        fs.release(16, 8, no_boundary);
        assert_eq!(fs.len(), 2);
        fs.release(8, 8, no_boundary);
        assert_eq!(fs.chunks(), &[Chunk { ref_: 0, size: 24 }]);
        assert_eq!(fs.total(), 24);
    }

    #[test]
    fn test_release_respects_slab_boundary() {
        let mut fs = FreeSpace::new();
        fs.release(0, 64, no_boundary);
        fs.release(64, 64, |r| r == 64);
        assert_eq!(fs.len(), 2);
        assert_eq!(fs.take(128), None);
    }

    #[test]
    fn test_release_zero_is_ignored() {
        let mut fs = FreeSpace::new();
        fs.release(40, 0, no_boundary);
        assert!(fs.is_empty());
    }
}
