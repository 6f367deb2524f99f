//! Memory management for Strata.
//!
//! This crate provides:
//! - The `Allocator` capability that translates refs into addresses
//! - A slab allocator with first-fit reuse and a read-only base image
//! - The single-root file container (header, checksummed nodes, footer)

mod alloc;
mod file_format;
mod free_space;
mod slab;

use std::sync::Arc;

pub use alloc::{Allocator, MemRef};
pub use file_format::{
    frame_image, validate_image, FileFooter, FileHeader, FOOTER_MAGIC_COOKIE, FORMAT_VERSION,
    MNEMONIC,
};
pub use free_space::{Chunk, FreeSpace};
pub use slab::SlabAlloc;

/// Creates a shared slab allocator with default settings.
pub fn default_allocator() -> Arc<dyn Allocator> {
    Arc::new(SlabAlloc::default())
}
