//! Configuration structures for Strata.

use crate::error::{Result, StrataError};
use serde::{Deserialize, Serialize};

/// Largest capacity representable in the 24-bit array header field.
pub const MAX_ARRAY_CAPACITY: usize = 0xFF_FFFF;

/// Storage layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum number of elements in a leaf and children in an inner node.
    pub max_node_size: usize,
    /// Smallest slab the allocator requests when it runs out of free space.
    pub min_slab_size: usize,
    /// Upper bound on mutable slab memory (None = unbounded).
    pub memory_limit: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_node_size: 1000,
            min_slab_size: 64 * 1024,
            memory_limit: None,
        }
    }
}

impl StorageConfig {
    /// Checks that every field is within its legal range.
    pub fn validate(&self) -> Result<()> {
        if self.max_node_size < 2 {
            return Err(invalid("max_node_size", self.max_node_size));
        }
        if self.min_slab_size == 0 || self.min_slab_size % 8 != 0 {
            return Err(invalid("min_slab_size", self.min_slab_size));
        }
        Ok(())
    }
}

/// Query scheduler tuning constants.
///
/// The cost of a condition node is
/// `distance_weight * bitwidth_time_unit / dD + dT`, where `dD` is the average
/// row distance between local matches and `dT` the time spent per row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Local matches the cheapest node collects per scheduling round.
    pub findlocals: usize,
    /// Row window given to each probing node.
    pub bestdist: usize,
    /// Local matches each probing node collects before yielding.
    pub probe_matches: usize,
    /// Bit width that corresponds to one unit of per-row time.
    pub bitwidth_time_unit: f64,
    /// Weight of match distance against per-row time.
    pub distance_weight: f64,
    /// Row window of the cheapest node when its dT is nonzero.
    pub aggregate_window: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            findlocals: 64,
            bestdist: 512,
            probe_matches: 4,
            bitwidth_time_unit: 64.0,
            distance_weight: 8.0,
            aggregate_window: 1000,
        }
    }
}

impl QueryConfig {
    /// Checks that every field is within its legal range.
    pub fn validate(&self) -> Result<()> {
        if self.findlocals == 0 {
            return Err(invalid("findlocals", self.findlocals));
        }
        if self.bestdist == 0 {
            return Err(invalid("bestdist", self.bestdist));
        }
        if self.probe_matches == 0 {
            return Err(invalid("probe_matches", self.probe_matches));
        }
        if !(self.bitwidth_time_unit > 0.0) {
            return Err(invalid("bitwidth_time_unit", self.bitwidth_time_unit));
        }
        if !(self.distance_weight >= 0.0) {
            return Err(invalid("distance_weight", self.distance_weight));
        }
        if self.aggregate_window == 0 {
            return Err(invalid("aggregate_window", self.aggregate_window));
        }
        Ok(())
    }
}

/// Parallel scan configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Number of scan workers.
    pub worker_threads: usize,
    /// Rows per work item.
    pub chunk_size: usize,
    /// Capacity of the bounded work queue.
    pub queue_depth: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus(),
            chunk_size: 64 * 1024,
            queue_depth: 16,
        }
    }
}

impl ParallelConfig {
    /// Checks that every field is within its legal range.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(StrataError::ConfigError(
                "worker_threads must be positive".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", self.chunk_size));
        }
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth", self.queue_depth));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl ToString) -> StrataError {
    StrataError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Returns the number of available CPUs.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.max_node_size, 1000);
        assert_eq!(config.min_slab_size, 65536);
        assert!(config.memory_limit.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_rejects_tiny_nodes() {
        let config = StorageConfig {
            max_node_size: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: max_node_size = 1");
    }

    #[test]
    fn test_storage_config_rejects_unaligned_slab() {
        let config = StorageConfig {
            min_slab_size: 100,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_query_config_defaults() {
        let config = QueryConfig::default();
        assert_eq!(config.findlocals, 64);
        assert_eq!(config.bestdist, 512);
        assert_eq!(config.probe_matches, 4);
        assert_eq!(config.bitwidth_time_unit, 64.0);
        assert_eq!(config.distance_weight, 8.0);
        assert_eq!(config.aggregate_window, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_query_config_rejects_zero_window() {
        let config = QueryConfig {
            bestdist: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = QueryConfig {
            bitwidth_time_unit: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parallel_config_defaults() {
        let config = ParallelConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.queue_depth, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parallel_config_rejects_zero_workers() {
        let config = ParallelConfig {
            worker_threads: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker_threads"));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let storage = StorageConfig {
            max_node_size: 4,
            memory_limit: Some(1 << 20),
            ..Default::default()
        };
        let json = serde_json::to_string(&storage).unwrap();
        let back: StorageConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, storage);

        let query = QueryConfig {
            findlocals: 16,
            ..Default::default()
        };
        let json = serde_json::to_string(&query).unwrap();
        let back: QueryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, query);

        let parallel = ParallelConfig {
            worker_threads: 3,
            chunk_size: 1000,
            queue_depth: 2,
        };
        let json = serde_json::to_string(&parallel).unwrap();
        let back: ParallelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, parallel);
    }
}
