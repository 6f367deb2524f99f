//! Typed column access for nodes generic over the value type.

use strata_common::{Result, NOT_FOUND};
use strata_storage::{
    Array, ArrayBasic, BasicColumn, BasicType, BpTree, Condition, FindState, LeafArray, LeafCursor, Table,
};

/// A floating point type with a column kind of its own.
pub trait FloatKind: BasicType {
    /// Column type name used in error messages.
    const COLUMN: &'static str;

    fn column(table: &Table, col: usize) -> Result<&BasicColumn<Self>>;
}

impl FloatKind for f32 {
    const COLUMN: &'static str = "Float";

    fn column(table: &Table, col: usize) -> Result<&BasicColumn<f32>> {
        table.float_column(col)
    }
}

impl FloatKind for f64 {
    const COLUMN: &'static str = "Double";

    fn column(table: &Table, col: usize) -> Result<&BasicColumn<f64>> {
        table.double_column(col)
    }
}

/// Value type of two columns compared row by row.
pub trait PairValue: Send + Sync + 'static {
    type Leaf: LeafArray + Clone + Send + Sync;

    fn tree(table: &Table, col: usize) -> Result<&BpTree<Self::Leaf>>;

    /// First row in `[start, end)` where `left <C> right`, or `NOT_FOUND`.
    fn find_pair<C: Condition>(
        left: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        right: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        start: usize,
        end: usize,
    ) -> usize;
}

struct FirstHit(usize);

impl FindState for FirstHit {
    fn match_index(&mut self, index: usize, _value: i64) -> bool {
        self.0 = index;
        false
    }
}

impl PairValue for i64 {
    type Leaf = Array;

    fn tree(table: &Table, col: usize) -> Result<&BpTree<Array>> {
        Ok(table.int_column(col)?.tree())
    }

    fn find_pair<C: Condition>(
        (c1, t1): (&mut LeafCursor<Array>, &BpTree<Array>),
        (c2, t2): (&mut LeafCursor<Array>, &BpTree<Array>),
        start: usize,
        end: usize,
    ) -> usize {
        let mut s = start;
        while s < end {
            let (l1, b1) = c1.leaf_for(t1, s);
            let (l2, b2) = c2.leaf_for(t2, s);
            let stop = (b1 + l1.size()).min(b2 + l2.size()).min(end);
            let mut hit = FirstHit(NOT_FOUND);
            if !l1.compare_leafs::<C, _>(s - b1, l2, s - b2, stop - s, s, &mut hit) {
                return hit.0;
            }
            s = stop;
        }
        NOT_FOUND
    }
}

fn find_basic_pair<T: BasicType, C: Condition>(
    (c1, t1): (&mut LeafCursor<ArrayBasic<T>>, &BpTree<ArrayBasic<T>>),
    (c2, t2): (&mut LeafCursor<ArrayBasic<T>>, &BpTree<ArrayBasic<T>>),
    start: usize,
    end: usize,
) -> usize {
    (start..end)
        .find(|&row| C::eval(c1.get(t1, row), c2.get(t2, row)))
        .unwrap_or(NOT_FOUND)
}

impl PairValue for f32 {
    type Leaf = ArrayBasic<f32>;

    fn tree(table: &Table, col: usize) -> Result<&BpTree<ArrayBasic<f32>>> {
        Ok(table.float_column(col)?.tree())
    }

    fn find_pair<C: Condition>(
        left: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        right: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        start: usize,
        end: usize,
    ) -> usize {
        find_basic_pair::<f32, C>(left, right, start, end)
    }
}

impl PairValue for f64 {
    type Leaf = ArrayBasic<f64>;

    fn tree(table: &Table, col: usize) -> Result<&BpTree<ArrayBasic<f64>>> {
        Ok(table.double_column(col)?.tree())
    }

    fn find_pair<C: Condition>(
        left: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        right: (&mut LeafCursor<Self::Leaf>, &BpTree<Self::Leaf>),
        start: usize,
        end: usize,
    ) -> usize {
        find_basic_pair::<f64, C>(left, right, start, end)
    }
}

/// First row in `[start, end)` of an integer tree where `value <C> needle`,
/// read leaf by leaf through `cursor`. Calls `on_leaf` with the width of
/// every leaf visited.
pub(crate) fn find_in_int_tree<C: strata_storage::IntegerCondition>(
    cursor: &mut LeafCursor<Array>,
    tree: &BpTree<Array>,
    needle: i64,
    start: usize,
    end: usize,
    mut on_leaf: impl FnMut(usize),
) -> usize {
    let mut s = start;
    while s < end {
        let (leaf, leaf_start) = cursor.leaf_for(tree, s);
        let leaf_end = leaf_start + leaf.size();
        on_leaf(leaf.width());
        let i = leaf.find_first_cond::<C>(needle, s - leaf_start, leaf_end.min(end) - leaf_start);
        if i != NOT_FOUND {
            return leaf_start + i;
        }
        s = leaf_end;
    }
    NOT_FOUND
}
