//! Strata common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Strata components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{ParallelConfig, QueryConfig, StorageConfig, MAX_ARRAY_CAPACITY};
pub use error::{Result, StrataError};
pub use types::{is_ref_value, tagged, to_ref, untagged, ColumnType, Ref, NOT_FOUND, NPOS};
