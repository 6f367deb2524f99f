//! Allocator integration tests.
//!
//! Tests:
//! - Randomized alloc/free never hands out overlapping blocks
//! - Written bytes survive later allocations
//! - File images round-trip through a temp file

use rand::Rng;
use std::collections::BTreeMap;
use strata_alloc::{frame_image, Allocator, SlabAlloc};
use strata_common::{StorageConfig, StrataError};

// =============================================================================
// Randomized allocation
// =============================================================================

#[test]
fn test_random_alloc_free_no_overlap() {
    let alloc = SlabAlloc::new(StorageConfig {
        min_slab_size: 1024,
        ..Default::default()
    });
    let mut rng = rand::rng();
    let mut live: BTreeMap<usize, (usize, u8)> = BTreeMap::new();

    for step in 0..2000u32 {
        if live.is_empty() || rng.random_bool(0.6) {
            let size = rng.random_range(1..=32usize) * 8;
            let mem = alloc.alloc(size).unwrap();
            let tag = (step % 251) as u8;
            unsafe { std::ptr::write_bytes(mem.addr, tag, size) };

            if let Some((&prev, &(prev_size, _))) = live.range(..mem.ref_).next_back() {
                assert!(prev + prev_size <= mem.ref_, "overlap with previous block");
            }
            if let Some((&next, _)) = live.range(mem.ref_..).next() {
                assert!(mem.ref_ + size <= next, "overlap with next block");
            }
            live.insert(mem.ref_, (size, tag));
        } else {
            let idx = rng.random_range(0..live.len());
            let (&ref_, &(size, tag)) = live.iter().nth(idx).unwrap();
            let addr = alloc.translate(ref_);
            let bytes = unsafe { std::slice::from_raw_parts(addr, size) };
            assert!(bytes.iter().all(|&b| b == tag), "block {ref_} was clobbered");
            alloc.free(ref_, addr, size);
            live.remove(&ref_);
        }
    }

    for (ref_, (size, _)) in live {
        alloc.free(ref_, alloc.translate(ref_), size);
    }
    assert!(alloc.is_all_free());
}

// =============================================================================
// File images
// =============================================================================

#[test]
fn test_open_file_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.tdb");

    let nodes: Vec<u8> = (0..64u8).collect();
    std::fs::write(&path, frame_image(&nodes, 32)).unwrap();

    let (alloc, top) = SlabAlloc::open(&path, StorageConfig::default()).unwrap();
    assert_eq!(top, 32);
    assert!(alloc.is_read_only(top));
    assert_eq!(unsafe { *alloc.translate(top) }, 8);
}

#[test]
fn test_open_truncated_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.tdb");
    std::fs::write(&path, b"T-DB").unwrap();

    let err = SlabAlloc::open(&path, StorageConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, StrataError::InvalidDatabase(_)));
}

#[test]
fn test_open_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SlabAlloc::open(dir.path().join("missing"), StorageConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, StrataError::Io(_)));
}
