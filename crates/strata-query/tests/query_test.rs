//! Query integration tests.
//!
//! Runs built queries against tables end to end:
//! - AND, OR and NOT composition against a row-by-row filter
//! - The validation gate for malformed input
//! - Sorted columns with inclusive bounds
//! - A single match in two million rows, serial and parallel
//! - String, binary, link, subtable and expression conditions
//! - Floating point aggregates and early exit

use proptest::prelude::*;
use rand::Rng;
use std::sync::Arc;

use strata_alloc::{Allocator, SlabAlloc};
use strata_common::{ColumnType, ParallelConfig, QueryConfig, StorageConfig, StrataError, NOT_FOUND};
use strata_query::{ParallelScan, Query, Subexpr};
use strata_storage::{ColumnSpec, Greater, GreaterEqual, Less, LessEqual, Table};

// =============================================================================
// Helpers
// =============================================================================

fn new_table(max_node_size: usize) -> Table {
    let config = StorageConfig {
        max_node_size,
        ..StorageConfig::default()
    };
    let alloc: Arc<dyn Allocator> = Arc::new(SlabAlloc::new(config));
    Table::new(&alloc, config).unwrap()
}

fn int_table(columns: &[&[i64]], max_node_size: usize) -> Table {
    let mut table = new_table(max_node_size);
    for (c, _) in columns.iter().enumerate() {
        table.add_column(ColumnType::Int, &format!("c{c}")).unwrap();
    }
    let rows = columns.first().map_or(0, |c| c.len());
    table.add_empty_rows(rows).unwrap();
    for (c, values) in columns.iter().enumerate() {
        for (row, &v) in values.iter().enumerate() {
            table.set_int(c, row, v).unwrap();
        }
    }
    table
}

fn all(query: &Query, table: &Table) -> Vec<usize> {
    query.find_all(table, 0, NOT_FOUND, usize::MAX).unwrap()
}

fn filter(rows: usize, pred: impl Fn(usize) -> bool) -> Vec<usize> {
    (0..rows).filter(|&r| pred(r)).collect()
}

// =============================================================================
// Composition
// =============================================================================

#[test]
fn test_and_or_not_composition() {
    let mut rng = rand::rng();
    let a: Vec<i64> = (0..3000).map(|_| rng.random_range(0..100)).collect();
    let b: Vec<i64> = (0..3000).map(|_| rng.random_range(-5..5)).collect();
    let table = int_table(&[&a, &b], 64);

    let mut and = Query::new();
    and.greater(0, 20).less(1, 0);
    assert_eq!(all(&and, &table), filter(3000, |r| a[r] > 20 && b[r] < 0));

    let mut or = Query::new();
    or.equal(0, 7).or().equal(1, 4).or().greater(0, 97);
    assert_eq!(all(&or, &table), filter(3000, |r| a[r] == 7 || b[r] == 4 || a[r] > 97));

    let mut not = Query::new();
    not.not().greater(0, 10).not_equal(1, 0);
    assert_eq!(all(&not, &table), filter(3000, |r| a[r] <= 10 && b[r] != 0));

    let mut nested = Query::new();
    nested
        .group()
        .less(0, 50)
        .not()
        .group()
        .equal(1, 1)
        .or()
        .equal(1, 2)
        .end_group()
        .end_group()
        .or()
        .between(0, 90, 92);
    let expected = filter(3000, |r| (a[r] < 50 && b[r] != 1 && b[r] != 2) || (90..=92).contains(&a[r]));
    assert_eq!(all(&nested, &table), expected);
    assert_eq!(nested.count(&table, 0, NOT_FOUND, usize::MAX).unwrap(), expected.len());
}

#[test]
fn test_empty_query_matches_every_row() {
    let table = int_table(&[&[4, 5, 6]], 1000);
    let q = Query::new();
    assert_eq!(all(&q, &table), vec![0, 1, 2]);
    assert_eq!(q.find(&table, 1).unwrap(), 1);
    assert_eq!(q.sum_int(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), 15);
}

// =============================================================================
// Validation gate
// =============================================================================

#[test]
fn test_invalid_queries_return_no_rows() {
    let mut table = new_table(1000);
    table.add_column(ColumnType::String, "name").unwrap();
    table.add_empty_rows(3).unwrap();

    let mut malformed = Query::new();
    malformed.equal_string(0, [0xFFu8, 0xFE], false);
    match malformed.find_all(&table, 0, NOT_FOUND, usize::MAX) {
        Err(StrataError::QueryValidation(m)) => assert!(m.starts_with("Malformed UTF-8")),
        other => panic!("unexpected {other:?}"),
    }
    let mut raw = Query::new();
    raw.equal_string(0, [0xFFu8, 0xFE], true);
    assert!(raw.find_all(&table, 0, NOT_FOUND, usize::MAX).unwrap().is_empty());

    let mut unbalanced = Query::new();
    unbalanced.group().equal_string(0, "x", true);
    assert!(matches!(unbalanced.count(&table, 0, NOT_FOUND, usize::MAX), Err(StrataError::QueryValidation(_))));
    assert!(matches!(unbalanced.find(&table, 0), Err(StrataError::QueryValidation(_))));
    assert!(matches!(unbalanced.remove(&mut table, 0, NOT_FOUND, usize::MAX), Err(StrataError::QueryValidation(_))));
    assert_eq!(table.size(), 3);
}

#[test]
fn test_wrong_column_type_fails_before_scanning() {
    let table = int_table(&[&[1, 2, 3]], 1000);
    let mut q = Query::new();
    q.contains(0, "1", true);
    assert!(matches!(
        q.find_all(&table, 0, NOT_FOUND, usize::MAX),
        Err(StrataError::ColumnTypeMismatch { .. })
    ));
}

// =============================================================================
// Sorted bounds
// =============================================================================

#[test]
fn test_sorted_column_bounds() {
    let mut table = new_table(4);
    table.add_column(ColumnType::Int, "v").unwrap();
    for v in [3, 3, 3, 4, 4, 4, 5, 6, 7, 9, 9, 9] {
        let row = table.add_empty_row().unwrap();
        table.set_int(0, row, v).unwrap();
    }
    let column = table.int_column(0).unwrap();
    assert_eq!(column.lower_bound(4), 3);
    assert_eq!(column.upper_bound(4), 6);

    let mut eq = Query::new();
    eq.equal(0, 8);
    assert_eq!(eq.find(&table, 0).unwrap(), NOT_FOUND);

    let mut between = Query::new();
    between.between(0, 4, 6);
    assert_eq!(all(&between, &table), vec![3, 4, 5, 6, 7]);
}

// =============================================================================
// One match in two million rows
// =============================================================================

#[test]
fn test_single_match_in_two_million_rows() {
    const ROWS: usize = 2_000_000;
    const HIT: usize = 1_500_000;
    let mut table = new_table(1000);
    table.add_column(ColumnType::Int, "v").unwrap();
    table.add_empty_rows(ROWS).unwrap();
    table.adjust_int(0, 1).unwrap();
    table.set_int(0, HIT, 2).unwrap();

    let mut q = Query::new();
    q.greater(0, 1);
    assert_eq!(q.find(&table, 0).unwrap(), HIT);
    assert_eq!(q.find(&table, HIT + 1).unwrap(), NOT_FOUND);
    assert_eq!(all(&q, &table), vec![HIT]);
    assert_eq!(q.count(&table, 0, NOT_FOUND, usize::MAX).unwrap(), 1);
    assert_eq!(q.sum_int(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), 2);
    assert_eq!(q.maximum_int(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), Some((2, HIT)));
    let mut seen = Vec::new();
    q.find_each(&table, 0, NOT_FOUND, usize::MAX, |row| {
        seen.push(row);
        true
    })
    .unwrap();
    assert_eq!(seen, vec![HIT]);

    // Two nodes take the sibling-confirmation path.
    let mut two = Query::new();
    two.greater(0, 1).less(0, 3);
    assert_eq!(all(&two, &table), vec![HIT]);

    let mut expr = Query::new();
    expr.expression(Subexpr::column(0).greater(1));
    assert_eq!(expr.find(&table, 1_400_000).unwrap(), HIT);

    for workers in [1, 4] {
        let config = ParallelConfig {
            worker_threads: workers,
            ..ParallelConfig::default()
        };
        let scan = ParallelScan::new(&q, config).unwrap();
        assert_eq!(scan.find_all(&table, 0, NOT_FOUND, usize::MAX).unwrap(), vec![HIT]);
        assert_eq!(scan.count(&table, 0, NOT_FOUND, usize::MAX).unwrap(), 1);
    }
}

// =============================================================================
// Column kinds
// =============================================================================

#[test]
fn test_strings_plain_enumerated_and_indexed() {
    let names = ["alice", "Bob", "carol", "alice", "alice", "Bob", "alice", "carol"];
    let mut table = new_table(3);
    table.add_column(ColumnType::String, "name").unwrap();
    table.add_column(ColumnType::Int, "age").unwrap();
    table.add_empty_rows(names.len()).unwrap();
    for (row, name) in names.iter().enumerate() {
        table.set_string(0, row, name).unwrap();
        table.set_int(1, row, 20 + row as i64).unwrap();
    }

    let mut exact = Query::new();
    exact.equal_string(0, "alice", true).greater(1, 20);
    let mut folded = Query::new();
    folded.equal_string(0, "bob", false);
    let mut prefix = Query::new();
    prefix.begins_with(0, "CA", false).or().ends_with(0, "ob", true);

    for step in 0..3 {
        assert_eq!(all(&exact, &table), vec![3, 4, 6], "step {step}");
        assert_eq!(all(&folded, &table), vec![1, 5], "step {step}");
        assert_eq!(all(&prefix, &table), vec![1, 2, 5, 7], "step {step}");
        match step {
            0 => assert!(table.optimize(0).unwrap()),
            1 => table.add_search_index(0).unwrap(),
            _ => {}
        }
    }
}

#[test]
fn test_binary_conditions() {
    let mut table = new_table(2);
    table.add_column(ColumnType::Binary, "blob").unwrap();
    let blobs: [&[u8]; 4] = [b"\x00\x01", b"\x01\x02\x03", b"", b"\x02\x03"];
    table.add_empty_rows(blobs.len()).unwrap();
    for (row, blob) in blobs.iter().enumerate() {
        table.set_binary(0, row, blob).unwrap();
    }
    let mut q = Query::new();
    q.contains_binary(0, b"\x02\x03").not_equal_binary(0, b"\x02\x03");
    assert_eq!(all(&q, &table), vec![1]);
    let mut e = Query::new();
    e.equal_binary(0, b"");
    assert_eq!(all(&e, &table), vec![2]);
}

#[test]
fn test_links_and_subtables() {
    let mut table = new_table(4);
    table.add_column(ColumnType::Link, "parent").unwrap();
    table
        .add_subtable_column("scores", vec![ColumnSpec::new(ColumnType::Int, "points")])
        .unwrap();
    table.add_empty_rows(5).unwrap();
    for (row, parent) in [(1, 0), (2, 0), (3, 1), (4, 3)] {
        table.set_link(0, row, Some(parent)).unwrap();
    }
    for (row, points) in [(0, vec![10, 20]), (2, vec![]), (3, vec![99]), (4, vec![5, 50])] {
        let sub = table.get_subtable_mut(1, row).unwrap();
        for p in points {
            let r = sub.add_empty_row().unwrap();
            sub.set_int(0, r, p).unwrap();
        }
    }

    let mut children = Query::new();
    children.links_to(0, 0);
    assert_eq!(all(&children, &table), vec![1, 2]);

    let mut high = Query::new();
    high.subtable(1).greater(0, 40).end_subtable();
    assert_eq!(all(&high, &table), vec![3, 4]);

    let mut both = Query::new();
    both.not().subtable(1).less(0, 15).end_subtable().links_to(0, 3);
    assert_eq!(all(&both, &table), Vec::<usize>::new());
    let mut either = Query::new();
    either.subtable(1).less(0, 15).end_subtable().or().links_to(0, 1);
    assert_eq!(all(&either, &table), vec![0, 3, 4]);
}

#[test]
fn test_expressions_and_column_comparisons() {
    let mut table = new_table(8);
    table.add_column(ColumnType::Int, "qty").unwrap();
    table.add_column(ColumnType::Double, "price").unwrap();
    table.add_column(ColumnType::Double, "budget").unwrap();
    table.add_empty_rows(50).unwrap();
    for row in 0..50 {
        table.set_int(0, row, row as i64 % 7).unwrap();
        table.set_double(1, row, 1.5 * row as f64).unwrap();
        table.set_double(2, row, 30.0).unwrap();
    }
    let total = |r: usize| (r % 7) as f64 * 1.5 * r as f64;

    let mut q = Query::new();
    q.expression((Subexpr::column(0) * Subexpr::column(1)).greater(Subexpr::column(2)));
    assert_eq!(all(&q, &table), filter(50, |r| total(r) > 30.0));

    let mut cols = Query::new();
    cols.compare_columns::<f64, GreaterEqual>(1, 2);
    assert_eq!(all(&cols, &table), (20..50).collect::<Vec<_>>());
}

// =============================================================================
// Aggregates and early exit
// =============================================================================

#[test]
fn test_float_aggregates() {
    let mut table = new_table(16);
    table.add_column(ColumnType::Float, "f").unwrap();
    table.add_column(ColumnType::Int, "k").unwrap();
    table.add_empty_rows(40).unwrap();
    for row in 0..40 {
        table.set_float(0, row, row as f32 * 0.25).unwrap();
        table.set_int(1, row, row as i64 % 2).unwrap();
    }
    let mut q = Query::new();
    q.equal(1, 1).compare_float::<Less>(0, 5.0);
    let odd: Vec<f64> = (0..20).filter(|r| r % 2 == 1).map(|r| r as f64 * 0.25).collect();
    let sum: f64 = odd.iter().sum();
    assert_eq!(q.sum_float(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), sum);
    assert_eq!(q.average_float(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), sum / odd.len() as f64);
    assert_eq!(q.maximum_float(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), Some((4.75, 19)));
    assert_eq!(q.minimum_float(&table, 0, 0, NOT_FOUND, usize::MAX).unwrap(), Some((0.25, 1)));

    let mut range = Query::new();
    range.between_float(0, 1.0, 2.0).compare_float::<LessEqual>(0, 1.5);
    assert_eq!(all(&range, &table), vec![4, 5, 6]);
}

#[test]
fn test_limits_stop_early() {
    let values: Vec<i64> = (0..10_000).map(|i| i % 10).collect();
    let table = int_table(&[&values], 1000);
    let mut q = Query::new();
    q.equal(0, 3);
    assert_eq!(q.find_all(&table, 0, NOT_FOUND, 3).unwrap(), vec![3, 13, 23]);
    assert_eq!(q.count(&table, 0, NOT_FOUND, 250).unwrap(), 250);
    assert_eq!(q.find_all(&table, 500, 540, usize::MAX).unwrap(), vec![503, 513, 523, 533]);

    let mut calls = 0;
    let reported = q
        .find_each(&table, 0, NOT_FOUND, usize::MAX, |_| {
            calls += 1;
            calls < 5
        })
        .unwrap();
    assert_eq!((reported, calls), (5, 5));
}

#[test]
fn test_remove_matches() {
    let values: Vec<i64> = (0..100).collect();
    let mut table = int_table(&[&values], 8);
    let mut q = Query::new();
    q.greater(0, 89).or().less(0, 5);
    assert_eq!(q.remove(&mut table, 0, NOT_FOUND, usize::MAX).unwrap(), 15);
    assert_eq!(table.size(), 85);
    assert_eq!(table.get_int(0, 0).unwrap(), 5);
    assert_eq!(table.get_int(0, 84).unwrap(), 89);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_query_config_round_trip_and_tuning() {
    let config = QueryConfig {
        findlocals: 4,
        bestdist: 16,
        probe_matches: 1,
        aggregate_window: 32,
        ..QueryConfig::default()
    };
    let json = serde_json::to_string(&config).unwrap();
    let parsed: QueryConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
    parsed.validate().unwrap();

    let a: Vec<i64> = (0..2000).map(|i| (i * 31) % 97).collect();
    let b: Vec<i64> = (0..2000).map(|i| (i * 17) % 5).collect();
    let table = int_table(&[&a, &b], 50);
    let mut tuned = Query::with_config(parsed);
    tuned.greater(0, 60).equal(1, 2);
    assert_eq!(all(&tuned, &table), filter(2000, |r| a[r] > 60 && b[r] == 2));
}

// =============================================================================
// Property tests
// =============================================================================

proptest! {
    #[test]
    fn prop_query_matches_linear_filter(
        a in prop::collection::vec(-50i64..50, 0..400),
        x in -50i64..50,
        y in -50i64..50,
    ) {
        let b: Vec<i64> = a.iter().rev().copied().collect();
        let table = int_table(&[&a, &b], 8);
        let n = a.len();

        let mut q = Query::new();
        q.greater(0, x).or().not().less_equal(1, y);
        prop_assert_eq!(all(&q, &table), filter(n, |r| a[r] > x || b[r] > y));

        let mut r = Query::new();
        r.between(0, x.min(y), x.max(y)).not_equal(1, x);
        prop_assert_eq!(all(&r, &table), filter(n, |i| a[i] >= x.min(y) && a[i] <= x.max(y) && b[i] != x));

        let mut c = Query::new();
        c.compare_columns::<i64, Greater>(0, 1);
        prop_assert_eq!(all(&c, &table), filter(n, |i| a[i] > b[i]));
    }
}
