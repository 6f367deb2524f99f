//! Parallel evaluation of a query over row chunks.
//!
//! ```text
//!   coordinator ──(chunk start, chunk end)──> bounded channel ──> worker 1..N
//!                                                                   │
//!   sorted concat <── Mutex<Vec<(chunk start, rows)>> <─────────────┘
//! ```
//!
//! Every worker builds its own copy of the condition tree, so node memos and
//! statistics are never shared between threads.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::bounded;
use parking_lot::Mutex;
use strata_common::{ParallelConfig, Result, StrataError, NOT_FOUND};
use strata_storage::Table;
use tracing::{debug, warn};

use crate::query::Query;
use crate::sink::IntSink;
use crate::state::{Action, QueryState};

/// Runs a validated [`Query`] on several threads.
pub struct ParallelScan<'q> {
    query: &'q Query,
    config: ParallelConfig,
}

impl<'q> ParallelScan<'q> {
    pub fn new(query: &'q Query, config: ParallelConfig) -> Result<Self> {
        config.validate()?;
        query.validate()?;
        Ok(Self { query, config })
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Matching rows in `[start, end)` in ascending order, at most `limit`.
    pub fn find_all(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<Vec<usize>> {
        let mut rows: Vec<usize> = self
            .run(table, start, end, limit)?
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .collect();
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn count(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<usize> {
        let found: usize = self.run(table, start, end, limit)?.iter().map(|(_, rows)| rows.len()).sum();
        Ok(found.min(limit))
    }

    /// Matches of every chunk, sorted by chunk start.
    fn run(&self, table: &Table, start: usize, end: usize, limit: usize) -> Result<Vec<(usize, Vec<usize>)>> {
        let end = if end == NOT_FOUND { table.size() } else { end.min(table.size()) };
        let start = start.min(end);
        if limit == 0 || start == end {
            return Ok(Vec::new());
        }

        let chunk_size = self.config.chunk_size;
        let chunks = (end - start).div_ceil(chunk_size);
        let workers = self.config.worker_threads.min(chunks);
        debug!(start, end, chunks, workers, "starting parallel scan");

        let (tx, rx) = bounded::<(usize, usize)>(self.config.queue_depth);
        let results: Mutex<Vec<(usize, Vec<usize>)>> = Mutex::new(Vec::with_capacity(chunks));
        let failure: Mutex<Option<StrataError>> = Mutex::new(None);

        thread::scope(|s| {
            for worker in 0..workers {
                let rx = rx.clone();
                let results = &results;
                let failure = &failure;
                s.spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<()> {
                        let mut chain = self.query.build_chain()?;
                        chain.init(table, self.query.config())?;
                        for (chunk_start, chunk_end) in rx.iter() {
                            let mut state = QueryState::new(Action::FindAll, limit)?;
                            chain.aggregate(table, &mut IntSink::new(&mut state, None), chunk_start, chunk_end);
                            results.lock().push((chunk_start, state.into_matches()));
                        }
                        Ok(())
                    }));
                    let error = match outcome {
                        Ok(Ok(())) => return,
                        Ok(Err(err)) => StrataError::WorkerFailed(format!("worker {worker}: {err}")),
                        Err(_) => StrataError::WorkerFailed(format!("worker {worker} panicked")),
                    };
                    warn!(worker, error = %error, "parallel scan worker failed");
                    failure.lock().get_or_insert(error);
                });
            }
            drop(rx);

            let mut chunk_start = start;
            while chunk_start < end {
                let chunk_end = end.min(chunk_start + chunk_size);
                // Every worker is gone once sending fails.
                if tx.send((chunk_start, chunk_end)).is_err() {
                    break;
                }
                chunk_start = chunk_end;
            }
            drop(tx);
        });

        if let Some(error) = failure.into_inner() {
            return Err(error);
        }
        let mut results = results.into_inner();
        if results.len() != chunks {
            return Err(StrataError::WorkerFailed(format!(
                "{} of {chunks} chunks were scanned",
                results.len()
            )));
        }
        results.sort_unstable_by_key(|(chunk_start, _)| *chunk_start);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::int_table;

    fn config(workers: usize, chunk_size: usize) -> ParallelConfig {
        ParallelConfig {
            worker_threads: workers,
            chunk_size,
            queue_depth: 2,
        }
    }

    #[test]
    fn test_matches_serial_scan() {
        let a: Vec<i64> = (0..1000).map(|i| (i * 7919) % 1009).collect();
        let table = int_table(&[&a]);
        let mut q = Query::new();
        q.greater(0, 900).or().equal(0, 3);
        let serial = q.find_all(&table, 0, NOT_FOUND, usize::MAX).unwrap();
        for (workers, chunk) in [(1, 1000), (3, 17), (8, 64)] {
            let scan = ParallelScan::new(&q, config(workers, chunk)).unwrap();
            assert_eq!(scan.find_all(&table, 0, NOT_FOUND, usize::MAX).unwrap(), serial);
            assert_eq!(scan.count(&table, 0, NOT_FOUND, usize::MAX).unwrap(), serial.len());
        }
    }

    #[test]
    fn test_range_and_limit() {
        let a: Vec<i64> = (0..300).collect();
        let table = int_table(&[&a]);
        let mut q = Query::new();
        q.not_equal(0, 150);
        let scan = ParallelScan::new(&q, config(4, 10)).unwrap();
        assert_eq!(scan.find_all(&table, 145, 155, usize::MAX).unwrap(), vec![145, 146, 147, 148, 149, 151, 152, 153, 154]);
        assert_eq!(scan.find_all(&table, 0, NOT_FOUND, 5).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(scan.count(&table, 0, NOT_FOUND, 25).unwrap(), 25);
        assert!(scan.find_all(&table, 300, NOT_FOUND, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut q = Query::new();
        q.group();
        assert!(matches!(
            ParallelScan::new(&q, ParallelConfig::default()),
            Err(StrataError::QueryValidation(_))
        ));
        let ok = Query::new();
        assert!(ParallelScan::new(&ok, config(0, 10)).is_err());
    }

    #[test]
    fn test_init_error_surfaces_as_worker_failure() {
        let table = int_table(&[&[1, 2, 3]]);
        let mut q = Query::new();
        q.equal(5, 1);
        let scan = ParallelScan::new(&q, config(2, 1)).unwrap();
        assert!(matches!(
            scan.find_all(&table, 0, NOT_FOUND, usize::MAX),
            Err(StrataError::WorkerFailed(_))
        ));
    }
}
