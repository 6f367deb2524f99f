//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata operations.
#[derive(Debug, Error)]
pub enum StrataError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Allocation errors
    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Array capacity exceeded: {requested} bytes (max {max})")]
    CapacityExceeded { requested: usize, max: usize },

    #[error("Invalid ref: {0}")]
    InvalidRef(usize),

    // Storage format errors
    #[error("Invalid database: {0}")]
    InvalidDatabase(String),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Storage corrupted: {0}")]
    StorageCorrupted(String),

    // Column and table errors
    #[error("Index out of bounds: {index} (size {size})")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("Column type mismatch at column {column}: expected {expected}, got {actual}")]
    ColumnTypeMismatch {
        column: usize,
        expected: String,
        actual: String,
    },

    #[error("Column not found: {0}")]
    ColumnNotFound(usize),

    #[error("Column {0} cannot carry a search index")]
    NotIndexable(usize),

    // Query errors
    #[error("Query validation failed: {0}")]
    QueryValidation(String),

    #[error("Unsupported action {action} for {state} state")]
    UnsupportedAction { action: String, state: String },

    // Concurrency errors
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: StrataError = io_err.into();
        assert!(matches!(err, StrataError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_allocation_errors_display() {
        let err = StrataError::OutOfMemory { requested: 4096 };
        assert_eq!(err.to_string(), "Out of memory: requested 4096 bytes");

        let err = StrataError::CapacityExceeded {
            requested: 20_000_000,
            max: 16_777_215,
        };
        assert_eq!(
            err.to_string(),
            "Array capacity exceeded: 20000000 bytes (max 16777215)"
        );

        let err = StrataError::InvalidRef(17);
        assert_eq!(err.to_string(), "Invalid ref: 17");
    }

    #[test]
    fn test_format_errors_display() {
        let err = StrataError::InvalidDatabase("bad mnemonic".to_string());
        assert_eq!(err.to_string(), "Invalid database: bad mnemonic");

        let err = StrataError::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn test_column_errors_display() {
        let err = StrataError::IndexOutOfBounds { index: 10, size: 3 };
        assert_eq!(err.to_string(), "Index out of bounds: 10 (size 3)");

        let err = StrataError::ColumnTypeMismatch {
            column: 2,
            expected: "Int".to_string(),
            actual: "String".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Column type mismatch at column 2: expected Int, got String"
        );

        let err = StrataError::ColumnNotFound(7);
        assert_eq!(err.to_string(), "Column not found: 7");

        let err = StrataError::NotIndexable(1);
        assert_eq!(err.to_string(), "Column 1 cannot carry a search index");
    }

    #[test]
    fn test_query_errors_display() {
        let err = StrataError::QueryValidation("Missing argument to Not".to_string());
        assert_eq!(
            err.to_string(),
            "Query validation failed: Missing argument to Not"
        );

        let err = StrataError::UnsupportedAction {
            action: "Count".to_string(),
            state: "f64".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported action Count for f64 state");
    }

    #[test]
    fn test_config_errors_display() {
        let err = StrataError::ConfigError("worker_threads must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: worker_threads must be positive"
        );

        let err = StrataError::InvalidParameter {
            name: "max_node_size".to_string(),
            value: "1".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: max_node_size = 1");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(StrataError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StrataError>();
    }
}
